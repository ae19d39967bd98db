//! Websocket transport to Node's inspector.

use std::collections::HashMap;
use std::convert::TryInto;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::endpoint::DebuggerEndpoint;
use crate::error::{BridgeError, BridgeErrorKind};
use crate::util::discover_ws_url;

#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
}

impl TransportEvent {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), BridgeError>;
    /// `None` once the connection is gone.
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(&self, method: &str, params: Value) -> Result<Value, BridgeError>;
}

/// Inspector transport over chromiumoxide's websocket connection.
///
/// `start` opens a single connection for the lifetime of the transport. It is
/// never re-established: the default execution context and every installed spy
/// belong to that one inspector session.
pub struct ChromiumTransport {
    cfg: BridgeConfig,
    endpoint: Option<DebuggerEndpoint>,
    link: OnceCell<InspectorLink>,
}

impl ChromiumTransport {
    pub fn new(cfg: BridgeConfig, endpoint: Option<DebuggerEndpoint>) -> Self {
        Self {
            cfg,
            endpoint,
            link: OnceCell::new(),
        }
    }

    fn link(&self) -> Result<&InspectorLink, BridgeError> {
        self.link.get().ok_or_else(|| {
            BridgeError::new(BridgeErrorKind::NotConnected)
                .with_hint("inspector transport used before start()")
        })
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), BridgeError> {
        self.link
            .get_or_try_init(|| InspectorLink::open(&self.cfg, self.endpoint.as_ref()))
            .await
            .map(|_| ())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let link = self.link.get()?;
        let mut events = link.events.lock().await;
        events.recv().await
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        let link = self.link()?;
        request(&link.requests, method, params, self.cfg.timeout()).await
    }
}

type Reply = oneshot::Sender<Result<Value, BridgeError>>;

struct Request {
    method: String,
    params: Value,
    reply: Reply,
}

struct InspectorLink {
    requests: mpsc::Sender<Request>,
    events: Mutex<mpsc::Receiver<TransportEvent>>,
    tasks: Vec<JoinHandle<()>>,
}

impl InspectorLink {
    async fn open(cfg: &BridgeConfig, endpoint: Option<&DebuggerEndpoint>) -> Result<Self, BridgeError> {
        let (url, conn) = connect_with_retry(cfg, endpoint).await?;

        let (requests, request_rx) = mpsc::channel(128);
        let (event_tx, events) = mpsc::channel(512);
        let pump = Pump {
            conn,
            inflight: HashMap::new(),
            events: event_tx,
        };
        let mut tasks = vec![tokio::spawn(pump.run(request_rx))];
        if cfg.heartbeat_interval_ms > 0 {
            tasks.push(spawn_heartbeat(
                requests.clone(),
                Duration::from_millis(cfg.heartbeat_interval_ms),
                cfg.timeout(),
            ));
        }

        info!(target: "cdp-transport", %url, "inspector connection established");
        Ok(Self {
            requests,
            events: Mutex::new(events),
            tasks,
        })
    }
}

impl Drop for InspectorLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn connection_closed() -> BridgeError {
    BridgeError::new(BridgeErrorKind::CdpIo).with_hint("inspector connection closed")
}

async fn request(
    requests: &mpsc::Sender<Request>,
    method: &str,
    params: Value,
    deadline: Duration,
) -> Result<Value, BridgeError> {
    let (reply, reply_rx) = oneshot::channel();
    requests
        .send(Request {
            method: method.to_string(),
            params,
            reply,
        })
        .await
        .map_err(|_| connection_closed())?;

    match timeout(deadline, reply_rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(connection_closed()),
        Err(_) => Err(BridgeError::new(BridgeErrorKind::CommandTimeout)
            .with_hint(format!("{method} got no reply within {deadline:?}"))),
    }
}

/// Websocket URL to dial: the configured one, or the first target `/json/list` offers.
async fn websocket_url(
    cfg: &BridgeConfig,
    endpoint: Option<&DebuggerEndpoint>,
) -> Result<String, BridgeError> {
    let url = match (&cfg.websocket_url, endpoint) {
        (Some(url), _) => url.clone(),
        (None, Some(endpoint)) => discover_ws_url(endpoint, cfg.timeout())
            .await
            .map_err(|err| {
                BridgeError::new(BridgeErrorKind::CdpIo)
                    .with_hint(format!("{err:#}"))
                    .retriable(true)
            })?,
        (None, None) => {
            return Err(BridgeError::new(BridgeErrorKind::EndpointNotFound)
                .with_hint("no inspector websocket url or debugger endpoint configured"))
        }
    };

    match url::Url::parse(&url) {
        Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => Ok(url),
        Ok(_) => Err(BridgeError::new(BridgeErrorKind::CdpIo)
            .with_hint(format!("inspector url must be ws:// or wss://, got {url}"))),
        Err(err) => Err(BridgeError::new(BridgeErrorKind::CdpIo)
            .with_hint(format!("invalid inspector url {url}: {err}"))),
    }
}

/// Discovery and the websocket handshake are retried together: the app may
/// still be booting when the test runner first reaches for the inspector.
async fn connect_with_retry(
    cfg: &BridgeConfig,
    endpoint: Option<&DebuggerEndpoint>,
) -> Result<(String, Connection<CdpEventMessage>), BridgeError> {
    let attempts = cfg.connection_retry_count.max(1);
    let mut attempt = 1;
    loop {
        let outcome = async {
            let url = websocket_url(cfg, endpoint).await?;
            let conn = Connection::<CdpEventMessage>::connect(&url)
                .await
                .map_err(map_cdp_error)?;
            Ok::<_, BridgeError>((url, conn))
        }
        .await;

        match outcome {
            Ok(opened) => return Ok(opened),
            Err(err) if err.retriable && attempt < attempts => {
                warn!(target: "cdp-transport", attempt, attempts, %err, "inspector not ready");
                sleep(cfg.retry_interval()).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn spawn_heartbeat(
    requests: mpsc::Sender<Request>,
    period: Duration,
    deadline: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let probe = json!({ "expression": "1" });
            if let Err(err) = request(&requests, "Runtime.evaluate", probe, deadline).await {
                warn!(target: "cdp-transport", %err, "heartbeat failed, stopping");
                break;
            }
        }
    })
}

/// Owns the websocket: submits requests, matches replies by call id and
/// forwards events.
struct Pump {
    conn: Connection<CdpEventMessage>,
    inflight: HashMap<CallId, Reply>,
    events: mpsc::Sender<TransportEvent>,
}

impl Pump {
    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        let outcome = loop {
            tokio::select! {
                Some(request) = requests.recv() => self.submit(request),
                message = self.conn.next() => match message {
                    Some(Ok(Message::Response(response))) => self.resolve(response),
                    Some(Ok(Message::Event(event))) => self.forward(event).await,
                    Some(Err(err)) => break Err(map_cdp_error(err)),
                    None => break Ok(()),
                },
            }
        };

        let err = match outcome {
            Ok(()) => {
                debug!(target: "cdp-transport", "inspector closed the connection");
                connection_closed()
            }
            Err(err) => {
                error!(target: "cdp-transport", %err, "inspector connection failed");
                err
            }
        };
        for (_, reply) in self.inflight.drain() {
            let _ = reply.send(Err(err.clone()));
        }
    }

    fn submit(&mut self, request: Request) {
        let method: MethodId = request.method.into();
        match self.conn.submit_command(method, None, request.params) {
            Ok(call_id) => {
                self.inflight.insert(call_id, request.reply);
            }
            Err(err) => {
                let _ = request.reply.send(Err(BridgeError::new(BridgeErrorKind::CdpIo)
                    .with_hint(format!("failed to submit command: {err}"))));
            }
        }
    }

    fn resolve(&mut self, response: Response) {
        match self.inflight.remove(&response.id) {
            Some(reply) => {
                let _ = reply.send(reply_payload(response));
            }
            None => debug!(target: "cdp-transport", id = ?response.id, "reply for an unknown call"),
        }
    }

    async fn forward(&mut self, event: CdpEventMessage) {
        let raw: CdpJsonEventMessage = match event.try_into() {
            Ok(raw) => raw,
            Err(err) => {
                warn!(target: "cdp-transport", ?err, "undecodable cdp event");
                return;
            }
        };
        let event = TransportEvent::new(raw.method.into_owned(), raw.params);
        if self.events.send(event).await.is_err() {
            debug!(target: "cdp-transport", "event receiver dropped");
        }
    }
}

fn reply_payload(response: Response) -> Result<Value, BridgeError> {
    match (response.result, response.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(BridgeError::new(BridgeErrorKind::Protocol)
            .with_hint(format!("{} ({})", error.message, error.code))),
        (None, None) => Err(BridgeError::new(BridgeErrorKind::Internal).with_hint("empty cdp reply")),
    }
}

fn map_cdp_error(err: CdpError) -> BridgeError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => BridgeError::new(BridgeErrorKind::CommandTimeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::Serde(_) | CdpError::JavascriptException(_) => {
            BridgeError::new(BridgeErrorKind::Internal).with_hint(hint)
        }
        _ => BridgeError::new(BridgeErrorKind::CdpIo)
            .with_hint(hint)
            .retriable(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_url(url: &str) -> BridgeConfig {
        BridgeConfig {
            websocket_url: Some(url.to_string()),
            ..BridgeConfig::default()
        }
    }

    #[tokio::test]
    async fn websocket_url_needs_an_endpoint() {
        let err = websocket_url(&BridgeConfig::default(), None)
            .await
            .unwrap_err();
        assert!(err.is(BridgeErrorKind::EndpointNotFound));
        assert!(!err.retriable);
    }

    #[tokio::test]
    async fn websocket_url_must_be_a_websocket() {
        let err = websocket_url(&with_url("http://127.0.0.1:9229/abc"), None)
            .await
            .unwrap_err();
        assert!(err.is(BridgeErrorKind::CdpIo));

        let url = websocket_url(&with_url("ws://127.0.0.1:9229/abc"), None)
            .await
            .unwrap();
        assert_eq!(url, "ws://127.0.0.1:9229/abc");
    }

    #[tokio::test]
    async fn commands_before_start_are_refused() {
        let transport = ChromiumTransport::new(BridgeConfig::default(), None);
        let err = transport
            .send_command("Runtime.enable", Value::Null)
            .await
            .unwrap_err();
        assert!(err.is(BridgeErrorKind::NotConnected));
        assert!(transport.next_event().await.is_none());
    }

    #[tokio::test]
    async fn start_gives_up_after_the_configured_attempts() {
        let cfg = BridgeConfig {
            connection_retry_count: 2,
            connection_retry_interval_ms: 1,
            ..with_url("ws://127.0.0.1:1/inspector")
        };
        let transport = ChromiumTransport::new(cfg, None);
        let err = transport.start().await.unwrap_err();
        assert!(err.is(BridgeErrorKind::CdpIo));
        // a failed start leaves the transport unopened
        assert!(transport.link().is_err());
    }
}
