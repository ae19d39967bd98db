//! electron-mock
//!
//! Mock Electron main-process APIs from test code over the Node inspector.
//! [`ElectronService`] turns session capabilities into a connected
//! [`remote_mock::MockSession`]; the `electron-mock` binary wraps it in a CLI.

pub mod cli;
pub mod config;
pub mod service;

pub use cdp_bridge;
pub use config::{load_options, ServiceOptions};
pub use remote_mock;
pub use service::ElectronService;
