//! Test-runner facing service: capabilities in, connected mock session out.

use std::sync::Arc;

use anyhow::{Context, Result};
use cdp_bridge::{
    resolve_from_capabilities, CdpTransport, ChromiumTransport, DebuggerEndpoint,
    ElectronCdpBridge, HostPlatform,
};
use remote_mock::{CdpExecutor, MockHandle, MockSession, RemoteExecutor, ScriptFn};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ServiceOptions;

struct Connected {
    endpoint: DebuggerEndpoint,
    bridge: Arc<ElectronCdpBridge>,
    executor: CdpExecutor,
    session: Arc<MockSession>,
}

pub struct ElectronService {
    options: ServiceOptions,
    platform: HostPlatform,
    connected: Option<Connected>,
}

impl ElectronService {
    pub fn new(options: ServiceOptions) -> Self {
        Self {
            options,
            platform: HostPlatform::current(),
            connected: None,
        }
    }

    pub fn with_platform(mut self, platform: HostPlatform) -> Self {
        self.platform = platform;
        self
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.connected.is_some()
    }

    /// Resolve the inspector from `capabilities` and connect to it.
    pub async fn before(&mut self, capabilities: &Value) -> Result<()> {
        let endpoint = resolve_from_capabilities(capabilities)
            .context("Failed to resolve the Electron debugger endpoint")?;
        let transport = Arc::new(ChromiumTransport::new(
            self.options.bridge_config(),
            Some(endpoint.clone()),
        ));
        self.connect_with(endpoint, transport).await
    }

    /// Connect over an already built transport.
    pub async fn connect_with(
        &mut self,
        endpoint: DebuggerEndpoint,
        transport: Arc<dyn CdpTransport>,
    ) -> Result<()> {
        if self.connected.is_some() {
            debug!(target: "electron-mock", "service already connected");
            return Ok(());
        }
        let bridge = Arc::new(
            ElectronCdpBridge::new(self.options.bridge_config(), transport)
                .with_platform(self.platform),
        );
        let session = MockSession::attach(Arc::clone(&bridge));
        bridge.connect().await.with_context(|| {
            format!(
                "Failed to connect to the Electron main process at {}:{}",
                endpoint.host, endpoint.port
            )
        })?;
        info!(
            target: "electron-mock",
            host = %endpoint.host,
            port = endpoint.port,
            context_id = bridge.context_id(),
            "connected to the Electron main process"
        );

        self.connected = Some(Connected {
            endpoint,
            executor: CdpExecutor::new(Arc::clone(&bridge)),
            bridge,
            session,
        });
        Ok(())
    }

    fn connected(&self) -> Result<&Connected> {
        self.connected
            .as_ref()
            .context("Electron service is not connected; call before() first")
    }

    pub fn endpoint(&self) -> Result<&DebuggerEndpoint> {
        Ok(&self.connected()?.endpoint)
    }

    pub fn bridge(&self) -> Result<&Arc<ElectronCdpBridge>> {
        Ok(&self.connected()?.bridge)
    }

    pub fn session(&self) -> Result<&Arc<MockSession>> {
        Ok(&self.connected()?.session)
    }

    /// Run `script(electron, ...args)` in the main process.
    pub async fn execute(&self, script: impl Into<ScriptFn>, args: Vec<Value>) -> Result<Value> {
        let script = script.into();
        Ok(self.connected()?.executor.execute(&script, args).await?)
    }

    pub async fn mock(&self, api: &str, method: &str) -> Result<Arc<MockHandle>> {
        Ok(self.session()?.mock(api, method).await?)
    }

    pub async fn mock_all(&self, api: &str) -> Result<Vec<Arc<MockHandle>>> {
        Ok(self.session()?.mock_all(api).await?)
    }

    pub async fn clear_all_mocks(&self, api: Option<&str>) -> Result<()> {
        Ok(self.session()?.clear_all_mocks(api).await?)
    }

    pub async fn reset_all_mocks(&self, api: Option<&str>) -> Result<()> {
        Ok(self.session()?.reset_all_mocks(api).await?)
    }

    pub async fn restore_all_mocks(&self, api: Option<&str>) -> Result<()> {
        Ok(self.session()?.restore_all_mocks(api).await?)
    }

    pub fn is_mock_function(&self, name: &str) -> bool {
        self.connected
            .as_ref()
            .map_or(false, |connected| connected.session.is_mock_function(name))
    }

    /// Apply the configured per-test mock hygiene.
    pub async fn before_test(&self) -> Result<()> {
        let Some(connected) = self.connected.as_ref() else {
            return Ok(());
        };
        if self.options.clear_mocks {
            connected.session.clear_all_mocks(None).await?;
        }
        if self.options.reset_mocks {
            connected.session.reset_all_mocks(None).await?;
        }
        if self.options.restore_mocks {
            connected.session.restore_all_mocks(None).await?;
        }
        Ok(())
    }

    /// Wait for in-flight resyncs, then disconnect.
    pub async fn after(&mut self) {
        let Some(connected) = self.connected.take() else {
            return;
        };
        connected.session.close().await;
        connected.bridge.close().await;
        info!(target: "electron-mock", "disconnected from the Electron main process");
    }
}
