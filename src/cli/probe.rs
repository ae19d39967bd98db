use anyhow::Result;
use cdp_bridge::metrics;
use clap::Args;
use serde_json::json;

use super::runtime::inspect_capabilities;
use crate::config::ServiceOptions;
use crate::service::ElectronService;

#[derive(Args, Clone, Debug)]
pub struct ProbeArgs {
    /// Inspector address, as passed to `--inspect=`
    #[arg(long, value_name = "HOST:PORT")]
    pub inspect: String,
}

pub async fn cmd_probe(args: ProbeArgs, options: ServiceOptions) -> Result<()> {
    let mut service = ElectronService::new(options);
    service.before(&inspect_capabilities(&args.inspect)).await?;

    let bridge = service.bridge()?;
    let endpoint = service.endpoint()?;
    let stats = metrics::snapshot();
    let report = json!({
        "host": endpoint.host,
        "port": endpoint.port,
        "contextId": bridge.context_id(),
        "platform": format!("{:?}", bridge.platform()),
        "metrics": stats,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    service.after().await;
    Ok(())
}
