//! Core domain types for fedlink.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies:
//! the record model, the message envelope, the legacy instruction/result
//! structures and run metadata. Everything here can be used from any layer.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod ids;
pub mod legacy;
pub mod message;
mod record;
pub mod run;
mod value;

pub use ids::{MessageId, NodeId, RunId, SUPERLINK_NODE_ID};
pub use legacy::{
    Code, Config, DisconnectRes, EvaluateIns, EvaluateRes, FitIns, FitRes, GetParametersIns,
    GetParametersRes, GetPropertiesIns, GetPropertiesRes, Metrics, Parameters, Properties,
    ReconnectIns, Status,
};
pub use message::{
    DEFAULT_TTL, MESSAGE_TTL_TOLERANCE, Message, MessageError, Metadata, Payload, error_code,
    message_type,
};
pub use record::{
    Array, ConfigsPolicy, ConfigsRecord, MetricsPolicy, MetricsRecord, ParametersRecord,
    RecordError, RecordSet, TypedRecord, ValuePolicy,
};
pub use run::{Run, RunStatus, UserConfig, UserConfigValue, run_status, run_sub_status};
pub use value::{Scalar, Value, ValueKind};
