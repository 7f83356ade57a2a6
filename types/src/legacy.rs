//! Instruction/result structures of the per-operation client API.
//!
//! These predate `RecordSet`; the compat adapter in `fedlink-core` maps them
//! to and from record sections.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Scalar;

pub type Config = HashMap<String, Scalar>;
pub type Properties = HashMap<String, Scalar>;
pub type Metrics = HashMap<String, Scalar>;

/// Client status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Code {
    #[default]
    Ok,
    GetPropertiesNotImplemented,
    GetParametersNotImplemented,
    FitNotImplemented,
    EvaluateNotImplemented,
}

impl Code {
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Code::Ok => 0,
            Code::GetPropertiesNotImplemented => 1,
            Code::GetParametersNotImplemented => 2,
            Code::FitNotImplemented => 3,
            Code::EvaluateNotImplemented => 4,
        }
    }

    /// Returns `None` for values outside the closed set.
    #[must_use]
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Code::Ok),
            1 => Some(Code::GetPropertiesNotImplemented),
            2 => Some(Code::GetParametersNotImplemented),
            3 => Some(Code::FitNotImplemented),
            4 => Some(Code::EvaluateNotImplemented),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::GetPropertiesNotImplemented => "GET_PROPERTIES_NOT_IMPLEMENTED",
            Code::GetParametersNotImplemented => "GET_PARAMETERS_NOT_IMPLEMENTED",
            Code::FitNotImplemented => "FIT_NOT_IMPLEMENTED",
            Code::EvaluateNotImplemented => "EVALUATE_NOT_IMPLEMENTED",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    #[must_use]
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn ok() -> Self {
        Self::new(Code::Ok, "Success")
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

/// Flat list of serialized tensors sharing one type tag.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Parameters {
    pub tensors: Vec<Vec<u8>>,
    pub tensor_type: String,
}

impl Parameters {
    #[must_use]
    pub fn new(tensors: Vec<Vec<u8>>, tensor_type: impl Into<String>) -> Self {
        Self {
            tensors,
            tensor_type: tensor_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GetPropertiesIns {
    pub config: Config,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GetPropertiesRes {
    pub status: Status,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GetParametersIns {
    pub config: Config,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GetParametersRes {
    pub status: Status,
    pub parameters: Parameters,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FitIns {
    pub parameters: Parameters,
    pub config: Config,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FitRes {
    pub status: Status,
    pub parameters: Parameters,
    pub num_examples: u64,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluateIns {
    pub parameters: Parameters,
    pub config: Config,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluateRes {
    pub status: Status,
    pub loss: f64,
    pub num_examples: u64,
    pub metrics: Metrics,
}

/// Ask a client to disconnect, optionally reconnecting after `seconds`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReconnectIns {
    pub seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisconnectRes {
    pub reason: String,
}
