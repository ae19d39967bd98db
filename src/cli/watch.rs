use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{json, Value};
use tokio::time::{interval, sleep_until, Instant};
use tracing::{info, warn};

use super::runtime::inspect_capabilities;
use crate::config::ServiceOptions;
use crate::service::ElectronService;

#[derive(Args, Clone, Debug)]
pub struct WatchArgs {
    /// Inspector address, as passed to `--inspect=`
    #[arg(long, value_name = "HOST:PORT")]
    pub inspect: String,

    /// Electron API object, e.g. `dialog`
    pub api: String,

    /// Method on the API object, e.g. `showOpenDialog`
    pub method: String,

    /// JSON value the mock returns
    #[arg(long = "return", value_name = "JSON")]
    pub return_value: Option<String>,

    /// Stop after this many seconds (default: until Ctrl-C)
    #[arg(long = "for", value_name = "SECS")]
    pub duration: Option<u64>,

    /// How often to pull call history, in milliseconds
    #[arg(long, default_value_t = 250)]
    pub poll_ms: u64,
}

pub async fn cmd_watch(args: WatchArgs, options: ServiceOptions) -> Result<()> {
    let return_value: Option<Value> = args
        .return_value
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("--return is not valid JSON")?;

    let mut service = ElectronService::new(options);
    service.before(&inspect_capabilities(&args.inspect)).await?;

    let outcome = watch_calls(&service, &args, return_value).await;
    if let Err(err) = service.restore_all_mocks(Some(&args.api)).await {
        warn!("Failed to restore {}.{}: {:#}", args.api, args.method, err);
    }
    service.after().await;
    outcome
}

async fn watch_calls(
    service: &ElectronService,
    args: &WatchArgs,
    return_value: Option<Value>,
) -> Result<()> {
    let handle = service.mock(&args.api, &args.method).await?;
    if let Some(value) = return_value {
        handle.mock_return_value(value).await?;
    }
    info!("Watching {} (Ctrl-C to stop)", handle.get_mock_name());

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut ticker = interval(Duration::from_millis(args.poll_ms.max(10)));
    let mut seen = 0usize;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = async {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            } => break,
            _ = ticker.tick() => {
                service.session()?.settle().await;
                handle.update().await?;
                let calls = handle.calls();
                for (index, call) in calls.iter().enumerate().skip(seen) {
                    println!("{}", json!({ "mock": handle.id().to_string(), "index": index, "args": call }));
                }
                seen = calls.len();
            }
        }
    }

    info!("{} received {} call(s)", handle.get_mock_name(), seen);
    Ok(())
}
