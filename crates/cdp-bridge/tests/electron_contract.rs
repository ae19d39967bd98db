//! Contract tests against a running Electron app started with `--inspect`.
//! Ignored by default because they need a live main process.
//!
//! Run with:
//! ```bash
//! export ELECTRON_MOCK_CONTRACT=1
//! export ELECTRON_MOCK_INSPECT=127.0.0.1:9229
//! cargo test -p cdp-bridge --test electron_contract -- --ignored --nocapture
//! ```

use std::env;
use std::sync::Arc;

use cdp_bridge::{endpoint, BridgeConfig, ChromiumTransport, ElectronCdpBridge};
use serde_json::json;

fn contract_enabled() -> bool {
    env::var("ELECTRON_MOCK_CONTRACT")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn inspect_arg() -> String {
    let address = env::var("ELECTRON_MOCK_INSPECT").unwrap_or_else(|_| "127.0.0.1:9229".into());
    format!("--inspect={address}")
}

#[tokio::test]
#[ignore = "requires a running Electron app; set ELECTRON_MOCK_CONTRACT=1"]
async fn contract_connects_and_bootstraps() {
    if !contract_enabled() {
        eprintln!("skipping electron contract test (ELECTRON_MOCK_CONTRACT not enabled)");
        return;
    }

    let endpoint = endpoint::resolve(&[inspect_arg()]).expect("inspect arg");
    let cfg = BridgeConfig::default();
    let transport = Arc::new(ChromiumTransport::new(cfg.clone(), Some(endpoint)));
    let bridge = ElectronCdpBridge::new(cfg, transport);

    bridge.connect().await.expect("connect to the main process");
    assert!(bridge.context_id() > 0);

    let response = bridge
        .send(
            "Runtime.evaluate",
            Some(json!({
                "expression": "typeof globalThis.electron.app.getName",
                "contextId": bridge.context_id(),
                "returnByValue": true,
            })),
        )
        .await
        .expect("evaluate");
    assert_eq!(response["result"]["value"], "function");

    bridge.close().await;
}
