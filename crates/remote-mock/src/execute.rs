//! Remote execution channel: run a JavaScript function in the main process
//! with the `electron` module as its first argument.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cdp_bridge::ElectronCdpBridge;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::error::ExecuteError;
use crate::instrument::InstrumentedSource;

/// Source text of a JavaScript function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptFn(String);

impl ScriptFn {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScriptFn {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ScriptFn {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<InstrumentedSource> for ScriptFn {
    fn from(value: InstrumentedSource) -> Self {
        Self(value.source)
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `script(electron, ...args)` remotely and return its JSON result.
    async fn execute(&self, script: &ScriptFn, args: Vec<Value>) -> Result<Value, ExecuteError>;
}

/// [`RemoteExecutor::execute`] followed by deserialization into `T`.
pub async fn execute_typed<T, E>(
    executor: &E,
    script: &ScriptFn,
    args: Vec<Value>,
) -> Result<T, ExecuteError>
where
    T: DeserializeOwned,
    E: RemoteExecutor + ?Sized,
{
    let value = executor.execute(script, args).await?;
    serde_json::from_value(value).map_err(|err| ExecuteError::Decode(err.to_string()))
}

/// Executes scripts in the bridge's default context via `Runtime.evaluate`.
pub struct CdpExecutor {
    bridge: Arc<ElectronCdpBridge>,
}

impl CdpExecutor {
    pub fn new(bridge: Arc<ElectronCdpBridge>) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &Arc<ElectronCdpBridge> {
        &self.bridge
    }

    /// Expression that calls `script` with `globalThis.electron` and `args`.
    pub fn expression(script: &ScriptFn, args: &[Value]) -> Result<String, ExecuteError> {
        let args = serde_json::to_string(args).map_err(|err| ExecuteError::Decode(err.to_string()))?;
        Ok(format!(
            "(async () => {{ const fn = ({}); return await fn(globalThis.electron, ...{}); }})()",
            script.as_str(),
            args
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateResponse {
    #[serde(default)]
    result: Option<EvaluateResult>,
    #[serde(default)]
    exception_details: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct EvaluateResult {
    #[serde(default)]
    value: Option<Value>,
}

#[async_trait]
impl RemoteExecutor for CdpExecutor {
    async fn execute(&self, script: &ScriptFn, args: Vec<Value>) -> Result<Value, ExecuteError> {
        let expression = Self::expression(script, &args)?;
        trace!(target: "remote-mock", %expression, "evaluating in main process");
        let response = self
            .bridge
            .send(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "contextId": self.bridge.context_id(),
                    "awaitPromise": true,
                    "returnByValue": true,
                })),
            )
            .await?;
        decode_evaluate(response)
    }
}

fn decode_evaluate(response: Value) -> Result<Value, ExecuteError> {
    let parsed: EvaluateResponse =
        serde_json::from_value(response).map_err(|err| ExecuteError::Decode(err.to_string()))?;
    if let Some(details) = parsed.exception_details {
        let text = exception_text(&details);
        debug!(target: "remote-mock", %text, "remote function threw");
        return Err(ExecuteError::Exception {
            text,
            details: Some(details),
        });
    }
    Ok(parsed.result.and_then(|result| result.value).unwrap_or(Value::Null))
}

fn exception_text(details: &Value) -> String {
    details
        .pointer("/exception/description")
        .and_then(Value::as_str)
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("remote evaluation failed")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_bridge::testing::MockTransport;
    use cdp_bridge::{BridgeConfig, HostPlatform};

    async fn executor() -> (CdpExecutor, Arc<MockTransport>) {
        let (transport, _tx) = MockTransport::new_pair();
        transport.emit_on("Runtime.enable", MockTransport::default_context_event(7));
        let bridge = ElectronCdpBridge::new(BridgeConfig::default(), transport.clone())
            .with_platform(HostPlatform::Linux);
        bridge.connect().await.unwrap();
        (CdpExecutor::new(Arc::new(bridge)), transport)
    }

    #[test]
    fn expression_spreads_json_arguments() {
        let script = ScriptFn::new("(electron, a, b) => electron.app[a](b)");
        let expression = CdpExecutor::expression(&script, &[json!("getName"), json!({ "x": 1 })]).unwrap();
        assert_eq!(
            expression,
            "(async () => { const fn = ((electron, a, b) => electron.app[a](b)); return await fn(globalThis.electron, ...[\"getName\",{\"x\":1}]); })()"
        );
    }

    #[tokio::test]
    async fn evaluates_in_the_default_context() {
        let (executor, transport) = executor().await;
        transport.push_response(json!({ "result": { "type": "string", "value": "my-app" } }));

        let value = executor
            .execute(&ScriptFn::new("(electron) => electron.app.getName()"), vec![])
            .await
            .unwrap();
        assert_eq!(value, json!("my-app"));

        let (method, params) = transport.commands().pop().unwrap();
        assert_eq!(method, "Runtime.evaluate");
        assert_eq!(params["contextId"], 7);
        assert_eq!(params["awaitPromise"], true);
        assert_eq!(params["returnByValue"], true);
    }

    #[tokio::test]
    async fn undefined_results_become_null() {
        let (executor, transport) = executor().await;
        transport.push_response(json!({ "result": { "type": "undefined" } }));
        let value = executor.execute(&ScriptFn::new("() => {}"), vec![]).await.unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn exceptions_surface_unchanged() {
        let (executor, transport) = executor().await;
        transport.push_response(json!({
            "result": { "type": "object", "subtype": "error" },
            "exceptionDetails": {
                "text": "Uncaught",
                "exception": { "description": "Error: boom\n    at <anonymous>:1:1" }
            }
        }));
        let err = executor
            .execute(&ScriptFn::new("() => { throw new Error('boom'); }"), vec![])
            .await
            .unwrap_err();
        match err {
            ExecuteError::Exception { text, details } => {
                assert!(text.starts_with("Error: boom"));
                assert!(details.is_some());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn typed_results_decode() {
        let (executor, transport) = executor().await;
        transport.push_response(json!({ "result": { "value": [1, 2, 3] } }));
        let numbers: Vec<u32> = execute_typed(&executor, &ScriptFn::new("() => [1, 2, 3]"), vec![])
            .await
            .unwrap();
        assert_eq!(numbers, vec![1, 2, 3]);

        transport.push_response(json!({ "result": { "value": "nope" } }));
        let err = execute_typed::<Vec<u32>, _>(&executor, &ScriptFn::new("() => 'nope'"), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::Decode(_)));
    }
}
