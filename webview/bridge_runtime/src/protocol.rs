use serde_json::Value;
use serde_json::value::RawValue;

use crate::error::BridgeError;

/// Settlement status handed to the engine's return primitive; the engine
/// resolves the script promise on `Ok` and rejects it otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Error => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub status: Status,
    pub body: String,
}

impl CallResult {
    pub fn ok(value: &Value) -> Self {
        Self {
            status: Status::Ok,
            body: value.to_string(),
        }
    }

    /// Error bodies are the message encoded as a JSON string.
    pub fn error(message: &str) -> Self {
        Self {
            status: Status::Error,
            body: Value::String(message.to_string()).to_string(),
        }
    }

    pub fn from_outcome(outcome: Result<Value, BridgeError>) -> Self {
        match outcome {
            Ok(value) => Self::ok(&value),
            Err(err) => Self::error(&err.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

pub fn parse_request(req: &str) -> Result<Vec<Box<RawValue>>, BridgeError> {
    serde_json::from_str::<Vec<Box<RawValue>>>(req).map_err(BridgeError::Request)
}
