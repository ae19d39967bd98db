//! Tracks in-flight resyncs so callers can wait for quiescence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::MockError;
use crate::mock::MockHandle;

struct SchedulerState {
    pending: Mutex<HashMap<u64, String>>,
    next_id: AtomicU64,
    count: watch::Sender<usize>,
    closed: AtomicBool,
}

impl SchedulerState {
    fn remove(&self, id: u64) {
        let remaining = {
            let mut pending = self.pending.lock();
            if pending.remove(&id).is_none() {
                return;
            }
            pending.len()
        };
        self.count.send_replace(remaining);
    }
}

/// Registration of one in-flight resync. Dropping it clears the entry.
pub struct PendingUpdate {
    id: u64,
    name: String,
    state: Arc<SchedulerState>,
}

impl PendingUpdate {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Clear the entry now instead of at drop.
    pub fn clear(self) {}
}

impl Drop for PendingUpdate {
    fn drop(&mut self) {
        self.state.remove(self.id);
    }
}

/// Per-session set of pending resyncs.
#[derive(Clone)]
pub struct UpdateScheduler {
    state: Arc<SchedulerState>,
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateScheduler {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            state: Arc::new(SchedulerState {
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                count,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn register_pending_update(&self, name: impl Into<String>) -> PendingUpdate {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let name = name.into();
        let count = {
            let mut pending = self.state.pending.lock();
            pending.insert(id, name.clone());
            pending.len()
        };
        self.state.count.send_replace(count);
        PendingUpdate {
            id,
            name,
            state: Arc::clone(&self.state),
        }
    }

    pub fn clear_pending_update(&self, update: PendingUpdate) {
        update.clear();
    }

    pub fn pending(&self) -> usize {
        self.state.pending.lock().len()
    }

    pub fn pending_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.pending.lock().values().cloned().collect();
        names.sort();
        names
    }

    /// Wait until no resync is pending, including ones registered meanwhile.
    pub async fn drain(&self) {
        let mut rx = self.state.count.subscribe();
        // the sender lives in `state`, so the channel cannot close while we wait
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Resync `handle` in the background, tracked until it settles.
    pub fn spawn_update(&self, handle: Arc<MockHandle>) -> Option<JoinHandle<Result<(), MockError>>> {
        if self.is_closed() {
            warn!(target: "remote-mock", mock = %handle.id(), "scheduler closed, dropping resync");
            return None;
        }
        let pending = self.register_pending_update(handle.id().to_string());
        Some(tokio::spawn(async move {
            let _pending = pending;
            match handle.update().await {
                Ok(_) => Ok(()),
                Err(err) => {
                    warn!(target: "remote-mock", mock = %handle.id(), error = %err, "resync failed");
                    Err(err)
                }
            }
        }))
    }

    /// Refuse new resyncs. Pending ones still settle and can be drained.
    pub fn close(&self) {
        if !self.state.closed.swap(true, Ordering::SeqCst) {
            debug!(target: "remote-mock", pending = self.pending(), "update scheduler closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::instrument;
    use crate::mock::fake::FakeRemote;
    use crate::mock::DEFAULT_IMPLEMENTATION;
    use crate::remote::RemoteMockApi;
    use crate::MockId;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    #[tokio::test]
    async fn pending_updates_clear_exactly_once() {
        let scheduler = UpdateScheduler::new();
        let first = scheduler.register_pending_update("app.getName");
        let second = scheduler.register_pending_update("app.getName");
        assert_eq!(scheduler.pending(), 2);
        assert_eq!(first.name(), "app.getName");

        scheduler.clear_pending_update(first);
        assert_eq!(scheduler.pending(), 1);
        drop(second);
        assert_eq!(scheduler.pending(), 0);
        timeout(Duration::from_millis(100), scheduler.drain())
            .await
            .expect("drain with nothing pending");
    }

    #[tokio::test]
    async fn drain_waits_for_every_pending_update() {
        let scheduler = UpdateScheduler::new();
        let first = scheduler.register_pending_update("a.b");
        let waiter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.drain().await })
        };
        let second = scheduler.register_pending_update("c.d");
        drop(first);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert_eq!(scheduler.pending_names(), vec!["c.d".to_string()]);
        drop(second);
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn spawned_updates_settle_on_both_paths() {
        let remote = Arc::new(FakeRemote::with_api("app", &["getName"]));
        let id = MockId::new("app", "getName").unwrap();
        remote
            .install(&id, &instrument(DEFAULT_IMPLEMENTATION, &id).unwrap())
            .await
            .unwrap();
        let handle = Arc::new(MockHandle::new(id.clone(), remote.clone()));
        let scheduler = UpdateScheduler::new();

        let gate = Arc::new(Notify::new());
        *remote.snapshot_gate.lock() = Some(gate.clone());
        remote.invoke(&id, vec![json!(1)]);
        let task = scheduler.spawn_update(handle.clone()).unwrap();
        assert_eq!(scheduler.pending(), 1);
        *remote.snapshot_gate.lock() = None;
        gate.notify_one();
        scheduler.drain().await;
        task.await.unwrap().unwrap();
        assert_eq!(handle.call_count(), 1);

        remote.fail_next("Error: gone");
        let task = scheduler.spawn_update(handle.clone()).unwrap();
        scheduler.drain().await;
        assert!(task.await.unwrap().is_err());
        assert_eq!(scheduler.pending(), 0);
        assert!(!handle.is_updating());
    }

    #[tokio::test]
    async fn closed_scheduler_refuses_new_work() {
        let remote = Arc::new(FakeRemote::default());
        let handle = Arc::new(MockHandle::new(MockId::new("app", "quit").unwrap(), remote));
        let scheduler = UpdateScheduler::new();
        scheduler.close();
        assert!(scheduler.is_closed());
        assert!(scheduler.spawn_update(handle).is_none());
        assert_eq!(scheduler.pending(), 0);
    }
}
