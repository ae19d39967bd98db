//! Generic CDP client: `connect`, `send`, `on`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeErrorKind};
use crate::metrics;
use crate::transport::{CdpTransport, TransportEvent};

pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

type HandlerMap = Arc<RwLock<HashMap<String, Vec<EventHandler>>>>;

pub struct CdpBridge {
    cfg: BridgeConfig,
    transport: Arc<dyn CdpTransport>,
    handlers: HandlerMap,
    connected: AtomicBool,
    shutdown: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl CdpBridge {
    pub fn new(cfg: BridgeConfig, transport: Arc<dyn CdpTransport>) -> Self {
        Self {
            cfg,
            transport,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            connected: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            pump: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.cfg
    }

    pub fn timeout(&self) -> Duration {
        self.cfg.timeout()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Start the transport and begin dispatching events to handlers. Idempotent.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = self.transport.start().await {
            self.connected.store(false, Ordering::SeqCst);
            return Err(err);
        }

        let pump = tokio::spawn(Self::event_pump(
            Arc::clone(&self.transport),
            Arc::clone(&self.handlers),
            self.shutdown.clone(),
        ));
        *self.pump.lock() = Some(pump);
        info!(target: "cdp-bridge", "bridge connected");
        Ok(())
    }

    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value, BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::new(BridgeErrorKind::NotConnected)
                .with_hint(format!("cannot send {method} before connect")));
        }

        metrics::record_command(method);
        let started = Instant::now();
        let result = self
            .transport
            .send_command(method, params.unwrap_or_else(|| json!({})))
            .await;
        match &result {
            Ok(_) => metrics::record_command_success(method, started.elapsed()),
            Err(err) => {
                metrics::record_command_failure(method);
                debug!(target: "cdp-bridge", method, %err, "command failed");
            }
        }
        result
    }

    /// Register a handler for every future event named `event`.
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.read().get(event).map_or(0, Vec::len)
    }

    /// Stop the event pump and drop every handler.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let pump = self.pump.lock().take();
        if let Some(handle) = pump {
            let _ = handle.await;
        }
        self.handlers.write().clear();
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn event_pump(
        transport: Arc<dyn CdpTransport>,
        handlers: HandlerMap,
        shutdown: CancellationToken,
    ) {
        debug!(target: "cdp-bridge", "event pump entered");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = transport.next_event() => match event {
                    Some(event) => Self::dispatch(&handlers, event),
                    None => {
                        warn!(target: "cdp-bridge", "transport event stream ended");
                        break;
                    }
                }
            }
        }
        debug!(target: "cdp-bridge", "event pump exiting");
    }

    fn dispatch(handlers: &HandlerMap, event: TransportEvent) {
        metrics::record_event(&event.method);
        let matching: Vec<EventHandler> = handlers
            .read()
            .get(&event.method)
            .cloned()
            .unwrap_or_default();
        if matching.is_empty() {
            trace!(target: "cdp-bridge", method = %event.method, "unhandled cdp event");
            return;
        }
        for handler in matching {
            handler(&event.params);
        }
    }
}

impl Drop for CdpBridge {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.pump.get_mut().take() {
            handle.abort();
        }
    }
}
