use thiserror::Error;

use crate::signature::Arity;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("webview not created")]
    NotCreated,

    #[error("webview engine returned no handle")]
    CreationFailed,

    #[error("invalid binding signature: {0}")]
    Signature(String),

    #[error("binding name {0:?} contains a NUL byte")]
    InvalidName(String),

    #[error("function arguments mismatch: expected {expected}, got {got}")]
    ArgumentMismatch { expected: Arity, got: usize },

    #[error("call request is not a JSON array: {0}")]
    Request(#[source] serde_json::Error),

    #[error("argument {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Error returned by the host function itself, delivered verbatim.
    #[error("{0}")]
    Host(String),

    #[error("{0}")]
    ContractViolation(String),

    #[error("binding not found")]
    BindingNotFound,

    #[error("failed to encode result: {0}")]
    Encoding(#[source] serde_json::Error),

    #[error("host function panicked: {0}")]
    Panicked(String),

    #[error("webview library: {0}")]
    Library(#[from] libloading::Error),
}

impl BridgeError {
    pub(crate) fn signature(message: impl Into<String>) -> Self {
        Self::Signature(message.into())
    }

    pub(crate) fn contract(message: impl Into<String>) -> Self {
        Self::ContractViolation(message.into())
    }
}
