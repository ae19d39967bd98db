use anyhow::Result;
use cdp_bridge::endpoint;
use clap::Args;

#[derive(Args, Clone, Debug)]
pub struct EndpointArgs {
    /// Arguments the Electron app is launched with
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub args: Vec<String>,
}

pub fn cmd_endpoint(args: EndpointArgs) -> Result<()> {
    let endpoint = endpoint::resolve(&args.args)?;
    println!("{}", serde_json::to_string(&endpoint)?);
    Ok(())
}
