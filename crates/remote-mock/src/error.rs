use cdp_bridge::BridgeError;
use serde_json::Value;
use thiserror::Error;

use crate::instrument::InstrumentError;

/// Failure of a single round trip through the remote execution channel.
#[derive(Debug, Clone, Error)]
pub enum ExecuteError {
    #[error("bridge failure: {0}")]
    Bridge(#[from] BridgeError),
    /// The function threw (or its promise rejected) inside the main process.
    #[error("remote exception: {text}")]
    Exception { text: String, details: Option<Value> },
    #[error("unable to decode remote result: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Error)]
pub enum MockError {
    #[error("remote method not found: {api}.{method}")]
    RemoteMethodNotFound { api: String, method: String },
    #[error("unsupported function source: {0}")]
    SourceTransformUnsupported(#[from] InstrumentError),
    /// Remote failures pass through unchanged.
    #[error(transparent)]
    Remote(#[from] ExecuteError),
    #[error("no mock registered as {0}")]
    UnknownMock(String),
    #[error("invalid mock name {0:?}")]
    InvalidMockName(String),
}

impl MockError {
    pub fn not_found(api: &str, method: &str) -> Self {
        MockError::RemoteMethodNotFound {
            api: api.to_string(),
            method: method.to_string(),
        }
    }

    /// Stable identifier used in logs and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            MockError::RemoteMethodNotFound { .. } => "RemoteMethodNotFound",
            MockError::SourceTransformUnsupported(_) => "SourceTransformUnsupported",
            MockError::Remote(_) => "RemoteExecution",
            MockError::UnknownMock(_) => "UnknownMock",
            MockError::InvalidMockName(_) => "InvalidMockName",
        }
    }
}

impl From<BridgeError> for MockError {
    fn from(value: BridgeError) -> Self {
        MockError::Remote(ExecuteError::Bridge(value))
    }
}
