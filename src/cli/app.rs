use anyhow::Result;
use clap::Parser;
use tracing::{debug, error};

use super::commands::Commands;
use super::config::cmd_config;
use super::endpoint::cmd_endpoint;
use super::env::CliArgs;
use super::exec::cmd_exec;
use super::probe::cmd_probe;
use super::runtime::{init_logging, load_config};
use super::watch::cmd_watch;

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    init_logging(&cli.log_level, cli.debug, cli.log_format)?;
    debug!("Starting electron-mock v{}", env!("CARGO_PKG_VERSION"));

    let loaded = load_config(cli.config.as_ref()).await?;

    let result = match cli.command {
        Commands::Endpoint(args) => cmd_endpoint(args),
        Commands::Probe(args) => cmd_probe(args, loaded.options).await,
        Commands::Exec(args) => cmd_exec(args, loaded.options).await,
        Commands::Watch(args) => cmd_watch(args, loaded.options).await,
        Commands::Config(args) => cmd_config(args, &loaded),
    };
    if let Err(err) = &result {
        error!("Command failed: {:#}", err);
    }
    result
}
