use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::{LoadedOptions, DEFAULT_CONFIG_FILES};

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show where configuration is read from
    Path,
}

pub fn cmd_config(args: ConfigArgs, loaded: &LoadedOptions) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            match &loaded.path {
                Some(path) => println!("# from {}", path.display()),
                None => println!("# built-in defaults"),
            }
            print!("{}", serde_yaml::to_string(&loaded.options)?);
        }
        ConfigAction::Path => match &loaded.path {
            Some(path) => println!("{}", path.display()),
            None => println!(
                "no config file found (searched {})",
                DEFAULT_CONFIG_FILES.join(", ")
            ),
        },
    }
    Ok(())
}
