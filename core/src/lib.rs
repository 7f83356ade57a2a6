//! Participant-side logic for fedlink.
//!
//! A [`ClientApp`] receives a [`Message`](fedlink_types::Message) together
//! with a per-run [`Context`], runs it through its mod pipeline inside the
//! lifespan scope and returns the reply. Everything here is synchronous; the
//! transport decides which thread a dispatch runs on.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod app;
mod client;
pub mod compat;
mod context;
mod lifespan;
mod message_handler;
mod mods;

pub use app::{AppError, ClientApp};
pub use client::{Client, ClientFn, client_fn};
pub use compat::{CompatError, EMPTY_TENSOR_KEY};
pub use context::Context;
pub use lifespan::{LifespanFn, LifespanScope, default_lifespan, lifespan_fn};
pub use message_handler::handle_legacy_message;
pub use mods::{Handler, Mod, Next, handler_fn, make_ffn, mod_fn};
