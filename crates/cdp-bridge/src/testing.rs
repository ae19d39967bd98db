//! In-memory transport for exercising the bridge without an Electron process.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::error::BridgeError;
use crate::transport::{CdpTransport, TransportEvent};

pub struct MockTransport {
    start_calls: AtomicUsize,
    events_tx: mpsc::Sender<TransportEvent>,
    rx: AsyncMutex<mpsc::Receiver<TransportEvent>>,
    commands: Mutex<Vec<(String, Value)>>,
    responses: Mutex<VecDeque<Result<Value, BridgeError>>>,
    triggers: Mutex<HashMap<String, Vec<TransportEvent>>>,
}

impl MockTransport {
    pub fn new_pair() -> (Arc<Self>, mpsc::Sender<TransportEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Arc::new(Self {
                start_calls: AtomicUsize::new(0),
                events_tx: tx.clone(),
                rx: AsyncMutex::new(rx),
                commands: Mutex::new(Vec::new()),
                responses: Mutex::new(VecDeque::new()),
                triggers: Mutex::new(HashMap::new()),
            }),
            tx,
        )
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<(String, Value)> {
        self.commands.lock().clone()
    }

    /// Queue the next command result. Unqueued commands answer `{}`.
    pub fn push_response(&self, value: Value) {
        self.responses.lock().push_back(Ok(value));
    }

    pub fn push_error(&self, err: BridgeError) {
        self.responses.lock().push_back(Err(err));
    }

    /// Emit `event` as soon as a command named `method` is received.
    pub fn emit_on(&self, method: &str, event: TransportEvent) {
        self.triggers
            .lock()
            .entry(method.to_string())
            .or_default()
            .push(event);
    }

    /// The `Runtime.executionContextCreated` payload Node sends for its main context.
    pub fn default_context_event(id: i64) -> TransportEvent {
        TransportEvent::new(
            "Runtime.executionContextCreated",
            json!({
                "context": {
                    "id": id,
                    "origin": "",
                    "name": "Electron Main Context",
                    "auxData": { "isDefault": true }
                }
            }),
        )
    }

    /// A `console.log(message)` observed through `Runtime.consoleAPICalled`.
    pub fn console_log_event(message: &str) -> TransportEvent {
        TransportEvent::new(
            "Runtime.consoleAPICalled",
            json!({
                "type": "log",
                "executionContextId": 1,
                "args": [{ "type": "string", "value": message }]
            }),
        )
    }
}

#[async_trait]
impl CdpTransport for MockTransport {
    async fn start(&self) -> Result<(), BridgeError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.rx.lock().await;
        guard.recv().await
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        self.commands.lock().push((method.to_string(), params));
        let triggered = self.triggers.lock().remove(method).unwrap_or_default();
        for event in triggered {
            let _ = self.events_tx.send(event).await;
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({})))
    }
}
