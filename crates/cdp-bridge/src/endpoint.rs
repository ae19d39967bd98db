//! Debugger endpoint resolution from capability arguments.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::error::{BridgeError, BridgeErrorKind};

const INSPECT_FLAG: &str = "--inspect=";

/// Host/port pair of the Node inspector inside the Electron main process.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebuggerEndpoint {
    pub host: String,
    pub port: u16,
}

impl DebuggerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Inspector target listing used to discover the websocket URL.
    pub fn json_list_url(&self) -> String {
        format!("http://{}:{}/json/list", self.host, self.port)
    }
}

/// Scan `args` for `--inspect=<host>:<port>`.
pub fn resolve<S: AsRef<str>>(args: &[S]) -> Result<DebuggerEndpoint, BridgeError> {
    trace!(target: "cdp-bridge", "detecting the node debugger endpoint");

    let debug_arg = args
        .iter()
        .map(AsRef::as_ref)
        .find(|arg| arg.starts_with(INSPECT_FLAG));
    trace!(target: "cdp-bridge", ?debug_arg, "detected debugger args");

    let not_found = || {
        BridgeError::new(BridgeErrorKind::EndpointNotFound)
            .with_hint("Failed to detect the debugger endpoint.")
    };

    let address = debug_arg.map(|arg| &arg[INSPECT_FLAG.len()..]).ok_or_else(not_found)?;
    let (host, port) = address.split_once(':').ok_or_else(not_found)?;
    if host.is_empty() {
        return Err(not_found());
    }
    let port = match port.parse::<u16>() {
        Ok(port) if port > 0 => port,
        _ => return Err(not_found()),
    };

    let endpoint = DebuggerEndpoint::new(host, port);
    trace!(target: "cdp-bridge", ?endpoint, "detected the node debugger endpoint");
    Ok(endpoint)
}

/// Resolve from a WebDriver capability object carrying `goog:chromeOptions.args`.
pub fn resolve_from_capabilities(capabilities: &Value) -> Result<DebuggerEndpoint, BridgeError> {
    let args: Vec<&str> = capabilities
        .get("goog:chromeOptions")
        .and_then(|opts| opts.get("args"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    resolve(&args)
}
