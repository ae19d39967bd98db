use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tokio::time::{timeout, Duration};

use crate::endpoint::DebuggerEndpoint;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InspectorTarget {
    #[serde(default)]
    r#type: Option<String>,
    web_socket_debugger_url: Option<String>,
}

/// Ask the inspector for its target list and pick the websocket of the main process.
pub async fn discover_ws_url(endpoint: &DebuggerEndpoint, deadline: Duration) -> Result<String> {
    let url = endpoint.json_list_url();
    let request = async {
        let targets: Vec<InspectorTarget> = reqwest::get(&url)
            .await
            .with_context(|| format!("inspector not reachable at {url}"))?
            .error_for_status()?
            .json()
            .await
            .context("inspector returned an unexpected target list")?;
        pick_ws_url(targets).ok_or_else(|| anyhow!("inspector at {url} exposes no debuggable target"))
    };

    timeout(deadline, request)
        .await
        .map_err(|_| anyhow!("timed out waiting for the inspector target list at {url}"))?
}

fn pick_ws_url(targets: Vec<InspectorTarget>) -> Option<String> {
    let mut fallback = None;
    for target in targets {
        let Some(ws) = target.web_socket_debugger_url else {
            continue;
        };
        if target.r#type.as_deref() == Some("node") {
            return Some(ws);
        }
        fallback.get_or_insert(ws);
    }
    fallback
}
