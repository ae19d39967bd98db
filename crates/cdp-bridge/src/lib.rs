//! CDP bridge to the Electron main process.
//!
//! The main process exposes Node's inspector when the app is started with
//! `--inspect=<host>:<port>`. This crate resolves that endpoint, speaks CDP to
//! it through a pluggable [`CdpTransport`], and routes the console messages the
//! remote mocks emit back to whoever registered a [`MockCallListener`].

use std::env;

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the bridge.
    #[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
    pub enum BridgeErrorKind {
        #[error("debugger endpoint not found")]
        EndpointNotFound,
        #[error("execution context id timed out")]
        ContextIdTimeout,
        #[error("cdp i/o failure")]
        CdpIo,
        #[error("cdp protocol error")]
        Protocol,
        #[error("command timed out")]
        CommandTimeout,
        #[error("bridge not connected")]
        NotConnected,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error metadata passed back to the mock layer.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct BridgeError {
        pub kind: BridgeErrorKind,
        pub hint: Option<String>,
        pub retriable: bool,
        pub data: Option<serde_json::Value>,
    }

    impl fmt::Display for BridgeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for BridgeError {}

    impl BridgeError {
        pub fn new(kind: BridgeErrorKind) -> Self {
            Self {
                kind,
                hint: None,
                retriable: false,
                data: None,
            }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn retriable(mut self, flag: bool) -> Self {
            self.retriable = flag;
            self
        }

        pub fn with_data(mut self, data: serde_json::Value) -> Self {
            self.data = Some(data);
            self
        }

        pub fn is(&self, kind: BridgeErrorKind) -> bool {
            self.kind == kind
        }
    }
}

pub mod config {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    /// Connection tuning for the bridge.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    #[serde(default)]
    pub struct BridgeConfig {
        /// Deadline for the default execution context and for each command.
        pub timeout_ms: u64,
        /// Skip `/json/list` discovery and connect to this websocket directly.
        pub websocket_url: Option<String>,
        pub connection_retry_count: u32,
        pub connection_retry_interval_ms: u64,
        /// Zero disables the keep-alive probe.
        pub heartbeat_interval_ms: u64,
    }

    impl Default for BridgeConfig {
        fn default() -> Self {
            Self {
                timeout_ms: super::resolve_timeout_default(),
                websocket_url: None,
                connection_retry_count: 3,
                connection_retry_interval_ms: 100,
                heartbeat_interval_ms: 0,
            }
        }
    }

    impl BridgeConfig {
        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
            self
        }

        pub fn timeout(&self) -> Duration {
            Duration::from_millis(self.timeout_ms)
        }

        pub fn retry_interval(&self) -> Duration {
            Duration::from_millis(self.connection_retry_interval_ms)
        }
    }
}

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

fn resolve_timeout_default() -> u64 {
    match env::var("ELECTRON_MOCK_CDP_TIMEOUT_MS") {
        Ok(value) => value.trim().parse().unwrap_or(DEFAULT_TIMEOUT_MS),
        Err(_) => DEFAULT_TIMEOUT_MS,
    }
}

/// Reserved console marker announcing that a remote mock was invoked.
///
/// The full message is `<NOTIFICATION_PREFIX><api>.<method>`.
pub const NOTIFICATION_PREFIX: &str = "__electron_mock_call__:";

/// Strip the notification prefix from a console message.
pub fn parse_notification(message: &str) -> Option<&str> {
    message.strip_prefix(NOTIFICATION_PREFIX)
}

pub mod bridge;
pub mod electron;
pub mod endpoint;
pub mod metrics;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transport;
pub mod util;

pub use bridge::{CdpBridge, EventHandler};
pub use config::BridgeConfig;
pub use electron::{ElectronCdpBridge, HostPlatform, MockCallListener};
pub use endpoint::{resolve, resolve_from_capabilities, DebuggerEndpoint};
pub use error::{BridgeError, BridgeErrorKind};
pub use metrics::BridgeMetricsSnapshot;
pub use transport::{CdpTransport, ChromiumTransport, TransportEvent};
