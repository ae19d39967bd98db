//! Electron flavour of the bridge: default-context discovery, main-process
//! bootstrap and routing of mock call notifications.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::bridge::CdpBridge;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeErrorKind};
use crate::transport::CdpTransport;
use crate::{metrics, parse_notification};

pub const CONTEXT_CREATED_EVENT: &str = "Runtime.executionContextCreated";
pub const CONSOLE_API_CALLED_EVENT: &str = "Runtime.consoleAPICalled";

const CONTEXT_TIMEOUT_MESSAGE: &str = "Timeout exceeded to get the ContextId.";

const NAME_HELPER_SCRIPT: &str = "globalThis.__name = globalThis.__name ?? ((func) => func);";
const ELECTRON_ALIAS_SCRIPT: &str = "globalThis.electron = require('electron');";
const PROCESS_ALIAS_SCRIPT: &str = "globalThis.process = require('node:process');";

/// Receives the `<api>.<method>` suffix of every mock call notification.
pub trait MockCallListener: Send + Sync {
    fn on_mock_call(&self, mock_name: &str);
}

/// Operating system of the machine running the Electron app.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            HostPlatform::Windows
        } else if cfg!(target_os = "macos") {
            HostPlatform::MacOs
        } else if cfg!(target_os = "linux") {
            HostPlatform::Linux
        } else {
            HostPlatform::Other
        }
    }

    /// Windows main processes do not expose `process` on the inspector's global.
    pub fn needs_process_alias(self) -> bool {
        matches!(self, HostPlatform::Windows)
    }
}

/// Script evaluated once in the default context after `Runtime.enable`.
pub fn bootstrap_script(platform: HostPlatform) -> String {
    let mut scripts = vec![NAME_HELPER_SCRIPT, ELECTRON_ALIAS_SCRIPT];
    if platform.needs_process_alias() {
        scripts.push(PROCESS_ALIAS_SCRIPT);
    }
    scripts.join("\n")
}

#[derive(Debug, Deserialize)]
struct ContextCreatedParams {
    context: ExecutionContextDescription,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionContextDescription {
    id: i64,
    #[serde(default)]
    aux_data: Option<ContextAuxData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextAuxData {
    #[serde(default)]
    is_default: bool,
}

#[derive(Debug, Deserialize)]
struct ConsoleApiCalledParams {
    #[serde(default)]
    args: Vec<RemoteObject>,
}

#[derive(Debug, Deserialize)]
struct RemoteObject {
    r#type: String,
    #[serde(default)]
    value: Option<Value>,
}

type ListenerSlot = Arc<RwLock<Option<Weak<dyn MockCallListener>>>>;

pub struct ElectronCdpBridge {
    base: CdpBridge,
    platform: HostPlatform,
    context_id: AtomicI64,
    listener: ListenerSlot,
}

impl ElectronCdpBridge {
    pub fn new(cfg: BridgeConfig, transport: Arc<dyn CdpTransport>) -> Self {
        Self {
            base: CdpBridge::new(cfg, transport),
            platform: HostPlatform::current(),
            context_id: AtomicI64::new(0),
            listener: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_platform(mut self, platform: HostPlatform) -> Self {
        self.platform = platform;
        self
    }

    pub fn platform(&self) -> HostPlatform {
        self.platform
    }

    /// Id of the default execution context; zero until `connect` succeeds.
    pub fn context_id(&self) -> i64 {
        self.context_id.load(Ordering::SeqCst)
    }

    pub fn base(&self) -> &CdpBridge {
        &self.base
    }

    /// Route notifications to `listener`. Only a weak reference is kept.
    pub fn set_mock_listener(&self, listener: &Arc<dyn MockCallListener>) {
        *self.listener.write() = Some(Arc::downgrade(listener));
    }

    /// Resolve the default context and bootstrap the main process. A bridge
    /// that already holds a context id is left untouched.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        if self.context_id() != 0 {
            debug!(target: "cdp-bridge", context_id = self.context_id(), "already connected");
            return Ok(());
        }
        self.base.connect().await?;

        let context_rx = self.context_id_handler();
        self.register_console_handler();

        self.base.send("Runtime.enable", None).await?;

        let context_id = self.wait_for_context(context_rx).await?;
        self.context_id.store(context_id, Ordering::SeqCst);
        info!(target: "cdp-bridge", context_id, platform = ?self.platform, "default execution context resolved");

        self.base
            .send(
                "Runtime.evaluate",
                Some(json!({
                    "expression": bootstrap_script(self.platform),
                    "includeCommandLineAPI": true,
                    "replMode": true,
                    "contextId": context_id,
                })),
            )
            .await?;
        Ok(())
    }

    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value, BridgeError> {
        self.base.send(method, params).await
    }

    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.base.on(event, handler)
    }

    pub async fn close(&self) {
        self.base.close().await;
        *self.listener.write() = None;
    }

    fn context_id_handler(&self) -> (Instant, oneshot::Receiver<i64>) {
        let deadline = Instant::now() + self.base.timeout();
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        self.base.on(CONTEXT_CREATED_EVENT, move |params| {
            let Some(id) = default_context_id(params) else {
                return;
            };
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(id);
            }
        });
        (deadline, rx)
    }

    async fn wait_for_context(
        &self,
        (deadline, rx): (Instant, oneshot::Receiver<i64>),
    ) -> Result<i64, BridgeError> {
        match timeout_at(deadline, rx).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(_)) => Err(BridgeError::new(BridgeErrorKind::ContextIdTimeout)
                .with_hint("event stream closed before the default context appeared")),
            Err(_) => {
                error!(target: "cdp-bridge", "{CONTEXT_TIMEOUT_MESSAGE}");
                Err(BridgeError::new(BridgeErrorKind::ContextIdTimeout)
                    .with_hint(CONTEXT_TIMEOUT_MESSAGE))
            }
        }
    }

    fn register_console_handler(&self) {
        let slot = Arc::clone(&self.listener);
        self.base.on(CONSOLE_API_CALLED_EVENT, move |params| {
            let Some(mock_name) = notification_target(params) else {
                return;
            };
            metrics::record_mock_notification(&mock_name);
            let listener = slot.read().as_ref().and_then(Weak::upgrade);
            match listener {
                Some(listener) => {
                    debug!(target: "cdp-bridge", mock = %mock_name, "mock call notification");
                    listener.on_mock_call(&mock_name);
                }
                None => {
                    warn!(target: "cdp-bridge", mock = %mock_name, "mock call notification without a listener");
                }
            }
        });
    }
}

fn default_context_id(params: &Value) -> Option<i64> {
    let parsed: ContextCreatedParams = serde_json::from_value(params.clone()).ok()?;
    let is_default = parsed
        .context
        .aux_data
        .map(|aux| aux.is_default)
        .unwrap_or(false);
    is_default.then_some(parsed.context.id)
}

fn notification_target(params: &Value) -> Option<String> {
    let parsed: ConsoleApiCalledParams = serde_json::from_value(params.clone()).ok()?;
    let first = parsed.args.into_iter().next()?;
    if first.r#type != "string" {
        return None;
    }
    match first.value? {
        Value::String(message) => parse_notification(&message).map(str::to_string),
        _ => None,
    }
}
