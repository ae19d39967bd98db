//! Spies on Electron main-process APIs, driven from the test side.
//!
//! A mocked method lives in the main process as a spy whose implementation was
//! instrumented to log a notification marker. The local [`MockHandle`] mirrors
//! the spy's call history: every notification schedules an [`MockHandle::update`]
//! through the [`UpdateScheduler`], and callers can [`UpdateScheduler::drain`]
//! before asserting.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod error;
pub mod execute;
pub mod installer;
pub mod instrument;
pub mod mock;
pub mod registry;
pub mod remote;
pub mod scheduler;
pub mod session;

pub use error::{ExecuteError, MockError};
pub use execute::{execute_typed, CdpExecutor, RemoteExecutor, ScriptFn};
pub use installer::MockInstaller;
pub use instrument::{instrument, FunctionKind, InstrumentError, InstrumentedSource};
pub use mock::{LocalBehavior, MockHandle};
pub use registry::MockRegistry;
pub use remote::{CallSnapshot, MockResult, RemoteBehavior, RemoteMockApi, ScriptedRemote};
pub use scheduler::{PendingUpdate, UpdateScheduler};
pub use session::MockSession;

/// Identity of a mocked method: `<api>.<method>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MockId {
    api: String,
    method: String,
}

impl MockId {
    pub fn new(api: impl Into<String>, method: impl Into<String>) -> Result<Self, MockError> {
        let api = api.into();
        let method = method.into();
        if api.is_empty() || method.is_empty() || api.contains('.') {
            return Err(MockError::InvalidMockName(format!("{api}.{method}")));
        }
        Ok(Self { api, method })
    }

    /// Parse the suffix of a notification marker.
    pub fn parse(name: &str) -> Result<Self, MockError> {
        let (api, method) = name
            .split_once('.')
            .ok_or_else(|| MockError::InvalidMockName(name.to_string()))?;
        Self::new(api, method)
    }

    pub fn api(&self) -> &str {
        &self.api
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Name a fresh handle reports until `mock_name` overrides it.
    pub fn default_mock_name(&self) -> String {
        format!("electron.{}.{}", self.api, self.method)
    }
}

impl fmt::Display for MockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.api, self.method)
    }
}

impl FromStr for MockId {
    type Err = MockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
