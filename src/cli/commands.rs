use clap::Subcommand;

use super::config::ConfigArgs;
use super::endpoint::EndpointArgs;
use super::exec::ExecArgs;
use super::probe::ProbeArgs;
use super::watch::WatchArgs;

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Resolve the debugger endpoint from app arguments
    Endpoint(EndpointArgs),

    /// Connect to a running app and report its main-process context
    Probe(ProbeArgs),

    /// Run a function against the main-process Electron API
    Exec(ExecArgs),

    /// Mock a method and stream its calls
    Watch(WatchArgs),

    /// Inspect the effective configuration
    Config(ConfigArgs),
}
