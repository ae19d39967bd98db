use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

use super::runtime::inspect_capabilities;
use crate::config::ServiceOptions;
use crate::service::ElectronService;

#[derive(Args, Clone, Debug)]
pub struct ExecArgs {
    /// Inspector address, as passed to `--inspect=`
    #[arg(long, value_name = "HOST:PORT")]
    pub inspect: String,

    /// Function source; receives the `electron` module first
    pub script: String,

    /// JSON argument appended after `electron` (repeatable)
    #[arg(long = "arg", value_name = "JSON")]
    pub args: Vec<String>,
}

pub fn parse_json_args(raw: &[String]) -> Result<Vec<Value>> {
    raw.iter()
        .map(|arg| {
            serde_json::from_str(arg).with_context(|| format!("Argument is not valid JSON: {arg}"))
        })
        .collect()
}

pub async fn cmd_exec(args: ExecArgs, options: ServiceOptions) -> Result<()> {
    let values = parse_json_args(&args.args)?;
    let mut service = ElectronService::new(options);
    service.before(&inspect_capabilities(&args.inspect)).await?;

    let result = service.execute(args.script.as_str(), values).await;
    service.after().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_arguments_are_parsed_in_order() {
        let parsed = parse_json_args(&["1".into(), "\"two\"".into(), "{\"x\":[3]}".into()]).unwrap();
        assert_eq!(parsed, vec![json!(1), json!("two"), json!({ "x": [3] })]);
        assert!(parse_json_args(&["not json".into()]).is_err());
    }
}
