//! Service options
//!
//! Built-in defaults, then an optional YAML/JSON file, then `ELECTRON_MOCK_*`
//! environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cdp_bridge::BridgeConfig;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

pub const ENV_PREFIX: &str = "ELECTRON_MOCK";

/// Searched in the working directory when no file is given.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "electron-mock.yaml",
    "electron-mock.yml",
    "electron-mock.json",
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceOptions {
    /// Deadline for the default execution context and for each CDP command.
    pub cdp_timeout_ms: u64,
    pub connection_retry_count: u32,
    pub connection_retry_interval_ms: u64,
    /// Applied by `before_test`, in this order.
    pub clear_mocks: bool,
    pub reset_mocks: bool,
    pub restore_mocks: bool,
    /// Zero disables the keep-alive probe.
    pub heartbeat_interval_ms: u64,
    /// Connect to this inspector websocket instead of discovering it.
    pub websocket_url: Option<String>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            cdp_timeout_ms: 10_000,
            connection_retry_count: 3,
            connection_retry_interval_ms: 100,
            clear_mocks: false,
            reset_mocks: false,
            restore_mocks: false,
            heartbeat_interval_ms: 0,
            websocket_url: None,
        }
    }
}

impl ServiceOptions {
    pub fn cdp_timeout(&self) -> Duration {
        Duration::from_millis(self.cdp_timeout_ms)
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            timeout_ms: self.cdp_timeout_ms,
            websocket_url: self.websocket_url.clone(),
            connection_retry_count: self.connection_retry_count,
            connection_retry_interval_ms: self.connection_retry_interval_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
        }
    }
}

pub struct LoadedOptions {
    pub options: ServiceOptions,
    /// File the options came from, if any.
    pub path: Option<PathBuf>,
}

pub async fn load_options(explicit: Option<&Path>) -> Result<LoadedOptions> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            Some(path.to_path_buf())
        }
        None => DEFAULT_CONFIG_FILES
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists()),
    };

    let base = match &path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let options = parse_options(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            info!("Loaded configuration from: {}", path.display());
            options
        }
        None => {
            debug!("No config file found, using defaults");
            ServiceOptions::default()
        }
    };

    let options = apply_env_overrides(base)?;
    Ok(LoadedOptions { options, path })
}

/// YAML is a superset of JSON, so one parser covers both file kinds.
pub fn parse_options(content: &str) -> Result<ServiceOptions> {
    if content.trim().is_empty() {
        return Ok(ServiceOptions::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

pub fn apply_env_overrides(base: ServiceOptions) -> Result<ServiceOptions> {
    let merged = config::Config::builder()
        .add_source(config::Config::try_from(&base).context("Failed to stage options")?)
        .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()
        .context("Failed to merge environment overrides")?;
    merged
        .try_deserialize()
        .with_context(|| format!("Invalid {ENV_PREFIX}_* environment override"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    struct EnvGuard(&'static str);

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            env::set_var(key, value);
            Self(key)
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            env::remove_var(self.0);
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let options = ServiceOptions::default();
        assert_eq!(options.cdp_timeout_ms, 10_000);
        assert_eq!(options.connection_retry_count, 3);
        assert_eq!(options.connection_retry_interval_ms, 100);
        assert!(!options.clear_mocks && !options.reset_mocks && !options.restore_mocks);
        let bridge = options.bridge_config();
        assert_eq!(bridge.timeout(), Duration::from_secs(10));
        assert_eq!(bridge.websocket_url, None);
    }

    #[test]
    fn partial_files_keep_defaults() {
        let options = parse_options("clear_mocks: true\ncdp_timeout_ms: 2500\n").unwrap();
        assert!(options.clear_mocks);
        assert_eq!(options.cdp_timeout_ms, 2500);
        assert_eq!(options.connection_retry_count, 3);

        let options = parse_options(r#"{ "restore_mocks": true }"#).unwrap();
        assert!(options.restore_mocks);
        assert_eq!(parse_options("  \n").unwrap(), ServiceOptions::default());
        assert!(parse_options("cdp_timeout_ms: soon").is_err());
    }

    #[tokio::test]
    #[serial]
    async fn file_then_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("electron-mock.yaml");
        std::fs::write(&path, "reset_mocks: true\nconnection_retry_count: 7\n").unwrap();
        let _timeout = EnvGuard::set("ELECTRON_MOCK_CDP_TIMEOUT_MS", "1234");
        let _retries = EnvGuard::set("ELECTRON_MOCK_CONNECTION_RETRY_COUNT", "9");

        let loaded = load_options(Some(&path)).await.unwrap();
        assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
        assert!(loaded.options.reset_mocks);
        assert_eq!(loaded.options.cdp_timeout_ms, 1234);
        assert_eq!(loaded.options.connection_retry_count, 9);
    }

    #[tokio::test]
    #[serial]
    async fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_options(Some(&dir.path().join("nope.yaml")))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    #[serial]
    fn malformed_environment_override_is_reported() {
        let _bad = EnvGuard::set("ELECTRON_MOCK_CLEAR_MOCKS", "sometimes");
        assert!(apply_env_overrides(ServiceOptions::default()).is_err());
    }
}
