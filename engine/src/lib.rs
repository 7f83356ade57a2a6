//! Orchestrator side of fedlink.
//!
//! The [`Driver`] trait is the seam between orchestration logic and a
//! transport. This crate ships an in-process transport ([`LinkState`],
//! [`InMemoryDriver`], [`NodeRunner`]) used for simulation and tests, the
//! legacy [`ClientProxy`] on top of a driver, and the [`ClientManager`] kept
//! fresh by a [`RegistryUpdater`].

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod client_manager;
mod config;
mod driver;
mod link;
mod memory;
mod node;
mod proxy;
mod registry;

pub use client_manager::ClientManager;
pub use config::{CONFIG_ENV, ConfigError, FedlinkConfig, ServerConfig, config_path};
pub use driver::{DEFAULT_POLL_INTERVAL, Driver, DriverError, DriverFut, send_and_receive};
pub use link::LinkState;
pub use memory::InMemoryDriver;
pub use node::{NodeHandle, NodeRunner};
pub use proxy::{ClientProxy, DriverClientProxy};
pub use registry::RegistryUpdater;
