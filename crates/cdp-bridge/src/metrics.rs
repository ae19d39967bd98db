//! Bridge traffic metrics.
//!
//! Every sample lands twice: in Prometheus collectors that an embedding process
//! can expose through [`register_metrics`], and in plain atomics read back by
//! [`snapshot`] without a registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounterVec, Registry};
use serde::Serialize;
use tracing::warn;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BridgeMetricsSnapshot {
    pub commands: u64,
    pub command_success: u64,
    pub command_failures: u64,
    pub command_latency_total_us: u64,
    pub events: u64,
    pub mock_notifications: u64,
}

struct Tally {
    commands: AtomicU64,
    command_success: AtomicU64,
    command_failures: AtomicU64,
    command_latency_total_us: AtomicU64,
    events: AtomicU64,
    mock_notifications: AtomicU64,
}

static TALLY: Tally = Tally {
    commands: AtomicU64::new(0),
    command_success: AtomicU64::new(0),
    command_failures: AtomicU64::new(0),
    command_latency_total_us: AtomicU64::new(0),
    events: AtomicU64::new(0),
    mock_notifications: AtomicU64::new(0),
};

struct Collectors {
    commands: IntCounterVec,
    failures: IntCounterVec,
    latency: HistogramVec,
    events: IntCounterVec,
    notifications: IntCounterVec,
}

impl Collectors {
    fn build() -> prometheus::Result<Self> {
        Ok(Self {
            commands: IntCounterVec::new(
                opts!("electron_mock_cdp_commands_total", "CDP commands sent to the main process"),
                &["method"],
            )?,
            failures: IntCounterVec::new(
                opts!("electron_mock_cdp_command_failures_total", "CDP commands that failed"),
                &["method"],
            )?,
            latency: HistogramVec::new(
                histogram_opts!(
                    "electron_mock_cdp_command_duration_seconds",
                    "Round trip of successful CDP commands",
                    vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
                ),
                &["method"],
            )?,
            events: IntCounterVec::new(
                opts!("electron_mock_cdp_events_total", "CDP events dispatched to handlers"),
                &["method"],
            )?,
            notifications: IntCounterVec::new(
                opts!("electron_mock_notifications_total", "Mock call notifications by API object"),
                &["api"],
            )?,
        })
    }
}

lazy_static! {
    static ref COLLECTORS: Collectors =
        Collectors::build().expect("metric definitions are static and valid");
}

/// Add the bridge collectors to `registry`. Registering twice is harmless.
pub fn register_metrics(registry: &Registry) {
    let collectors: [Box<dyn prometheus::core::Collector>; 5] = [
        Box::new(COLLECTORS.commands.clone()),
        Box::new(COLLECTORS.failures.clone()),
        Box::new(COLLECTORS.latency.clone()),
        Box::new(COLLECTORS.events.clone()),
        Box::new(COLLECTORS.notifications.clone()),
    ];
    for collector in collectors {
        match registry.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(err) => warn!(target: "cdp-bridge", %err, "failed to register bridge metric"),
        }
    }
}

pub fn record_command(method: &str) {
    TALLY.commands.fetch_add(1, Ordering::Relaxed);
    COLLECTORS.commands.with_label_values(&[method]).inc();
}

pub fn record_command_success(method: &str, elapsed: Duration) {
    TALLY.command_success.fetch_add(1, Ordering::Relaxed);
    let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
    TALLY
        .command_latency_total_us
        .fetch_add(micros, Ordering::Relaxed);
    COLLECTORS
        .latency
        .with_label_values(&[method])
        .observe(elapsed.as_secs_f64());
}

pub fn record_command_failure(method: &str) {
    TALLY.command_failures.fetch_add(1, Ordering::Relaxed);
    COLLECTORS.failures.with_label_values(&[method]).inc();
}

pub fn record_event(method: &str) {
    TALLY.events.fetch_add(1, Ordering::Relaxed);
    COLLECTORS.events.with_label_values(&[method]).inc();
}

/// `mock_name` is `<api>.<method>`; only the API object is used as a label.
pub fn record_mock_notification(mock_name: &str) {
    TALLY.mock_notifications.fetch_add(1, Ordering::Relaxed);
    let api = mock_name.split_once('.').map_or(mock_name, |(api, _)| api);
    COLLECTORS.notifications.with_label_values(&[api]).inc();
}

pub fn snapshot() -> BridgeMetricsSnapshot {
    BridgeMetricsSnapshot {
        commands: TALLY.commands.load(Ordering::Relaxed),
        command_success: TALLY.command_success.load(Ordering::Relaxed),
        command_failures: TALLY.command_failures.load(Ordering::Relaxed),
        command_latency_total_us: TALLY.command_latency_total_us.load(Ordering::Relaxed),
        events: TALLY.events.load(Ordering::Relaxed),
        mock_notifications: TALLY.mock_notifications.load(Ordering::Relaxed),
    }
}
