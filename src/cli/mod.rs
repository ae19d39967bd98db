pub mod app;
pub mod commands;
pub mod config;
pub mod endpoint;
pub mod env;
pub mod exec;
pub mod probe;
pub mod runtime;
pub mod watch;

pub use app::run;
pub use env::CliArgs;
