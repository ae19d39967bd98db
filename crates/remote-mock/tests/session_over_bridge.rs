//! Mock session wired to an `ElectronCdpBridge` over the in-memory transport.
//! The main process is played by scripted `Runtime.evaluate` responses.

use std::sync::Arc;
use std::time::Duration;

use cdp_bridge::testing::MockTransport;
use cdp_bridge::{BridgeConfig, ElectronCdpBridge, HostPlatform, TransportEvent, NOTIFICATION_PREFIX};
use remote_mock::{MockError, MockSession};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const CONTEXT_ID: i64 = 3;

async fn connected() -> (Arc<ElectronCdpBridge>, Arc<MockTransport>, mpsc::Sender<TransportEvent>) {
    let (transport, tx) = MockTransport::new_pair();
    transport.emit_on("Runtime.enable", MockTransport::default_context_event(CONTEXT_ID));
    let bridge = ElectronCdpBridge::new(BridgeConfig::default(), transport.clone())
        .with_platform(HostPlatform::Linux);
    bridge.connect().await.expect("connect");
    (Arc::new(bridge), transport, tx)
}

fn by_value(value: Value) -> Value {
    json!({ "result": { "type": "object", "value": value } })
}

fn evaluated_expressions(transport: &MockTransport) -> Vec<String> {
    transport
        .commands()
        .into_iter()
        .filter(|(method, _)| method == "Runtime.evaluate")
        .filter_map(|(_, params)| params["expression"].as_str().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn notification_resyncs_history_through_the_bridge() {
    let (bridge, transport, tx) = connected().await;
    let session = MockSession::attach(bridge.clone());

    transport.push_response(by_value(json!(true)));
    transport.push_response(by_value(json!("ok")));
    transport.push_response(json!({ "result": { "type": "undefined" } }));
    let handle = session.mock("app", "getName").await.expect("mock");

    let expressions = evaluated_expressions(&transport);
    // bootstrap, runtime, resolve, install
    assert_eq!(expressions.len(), 4);
    assert!(expressions[1].contains("globalThis.__electronMock ??="));
    assert!(expressions[3].contains("__electron_mock_call__:app.getName"));
    for (_, params) in transport.commands().iter().skip(2) {
        assert_eq!(params["contextId"], CONTEXT_ID);
    }

    transport.push_response(by_value(json!({
        "calls": [["first"], ["second", 2]],
        "results": [{ "type": "return", "value": null }, { "type": "return", "value": "x" }]
    })));
    tx.send(MockTransport::console_log_event(&format!(
        "{NOTIFICATION_PREFIX}app.getName"
    )))
    .await
    .unwrap();

    timeout(Duration::from_secs(1), async {
        while handle.call_count() < 2 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("resync after notification");
    session.settle().await;

    assert_eq!(handle.calls(), vec![vec![json!("first")], vec![json!("second"), json!(2)]]);

    // a second pull of the same remote state changes nothing
    transport.push_response(by_value(json!({
        "calls": [["first"], ["second", 2]],
        "results": []
    })));
    handle.update().await.unwrap();
    assert_eq!(handle.call_count(), 2);

    session.close().await;
    bridge.close().await;
}

#[tokio::test]
async fn missing_remote_method_is_reported() {
    let (bridge, transport, _tx) = connected().await;
    let session = MockSession::attach(bridge.clone());

    transport.push_response(by_value(json!(true)));
    transport.push_response(by_value(json!("missing-api")));
    let err = session.mock("notAnApi", "nothing").await.unwrap_err();
    assert!(matches!(err, MockError::RemoteMethodNotFound { .. }));
    assert!(!session.is_mock_function("notAnApi.nothing"));
    bridge.close().await;
}

#[tokio::test]
async fn remote_exceptions_reach_the_caller() {
    let (bridge, transport, _tx) = connected().await;
    let session = MockSession::attach(bridge.clone());

    transport.push_response(by_value(json!(true)));
    transport.push_response(by_value(json!("ok")));
    transport.push_response(json!({ "result": {} }));
    let handle = session.mock("app", "quit").await.unwrap();

    transport.push_response(json!({
        "result": { "type": "object" },
        "exceptionDetails": { "text": "Uncaught", "exception": { "description": "Error: app.quit is not mocked" } }
    }));
    let err = handle.mock_clear().await.unwrap_err();
    assert!(err.to_string().contains("app.quit is not mocked"));
    bridge.close().await;
}
