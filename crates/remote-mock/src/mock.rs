//! Local mirror of a remote spy.
//!
//! Every configuration call is forwarded to the main process first and only
//! recorded locally once the remote side accepted it. Call history flows the
//! other way: [`MockHandle::update`] pulls the remote history and appends the
//! entries the local spy has not seen yet.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace};

use crate::error::MockError;
use crate::execute::ScriptFn;
use crate::instrument::{instrument, InstrumentedSource};
use crate::remote::{CallSnapshot, MockResult, RemoteBehavior, RemoteMockApi};
use crate::MockId;

/// Body of a freshly installed or reset mock.
pub const DEFAULT_IMPLEMENTATION: &str = "() => undefined";

/// What the local handle believes the remote spy does.
#[derive(Clone, Debug, PartialEq)]
pub enum LocalBehavior {
    Implementation(ScriptFn),
    ReturnValue(Value),
    ResolvedValue(Value),
    RejectedValue(Value),
    ReturnThis,
}

impl LocalBehavior {
    /// Function source realising this behavior remotely.
    pub fn source(&self) -> ScriptFn {
        match self {
            LocalBehavior::Implementation(script) => script.clone(),
            LocalBehavior::ReturnValue(value) => ScriptFn::new(format!("() => ({value})")),
            LocalBehavior::ResolvedValue(value) => {
                ScriptFn::new(format!("() => Promise.resolve({value})"))
            }
            LocalBehavior::RejectedValue(value) => {
                ScriptFn::new(format!("() => Promise.reject({value})"))
            }
            LocalBehavior::ReturnThis => ScriptFn::new("function () { return this; }"),
        }
    }
}

/// A queued once behavior and the first remote call index it can serve.
#[derive(Debug)]
struct QueuedOnce {
    behavior: LocalBehavior,
    from: usize,
}

#[derive(Debug, Default)]
struct LocalSpy {
    name: String,
    calls: Vec<Vec<Value>>,
    results: Vec<MockResult>,
    behavior: Option<LocalBehavior>,
    once: VecDeque<QueuedOnce>,
}

impl LocalSpy {
    /// Append remote entries past the local length. Returns how many were added.
    fn replay(&mut self, snapshot: CallSnapshot) -> usize {
        let seen = self.calls.len();
        if snapshot.calls.len() <= seen {
            return 0;
        }
        let CallSnapshot { calls, mut results } = snapshot;
        results.resize(calls.len(), MockResult::Incomplete);
        let mut added = 0;
        for (args, result) in calls.into_iter().zip(results).skip(seen) {
            let index = self.calls.len();
            if self.once.front().map_or(false, |queued| queued.from <= index) {
                self.once.pop_front();
            }
            self.calls.push(args);
            self.results.push(result);
            added += 1;
        }
        added
    }

    /// The remote history is cleared alongside, so pending once behaviors
    /// serve the next call from index zero.
    fn clear_history(&mut self) {
        self.calls.clear();
        self.results.clear();
        for queued in &mut self.once {
            queued.from = 0;
        }
    }

    fn reset(&mut self) {
        self.clear_history();
        self.behavior = None;
        self.once.clear();
    }
}

/// Clears the `updating` flag when dropped.
struct UpdatingGuard<'a>(&'a AtomicBool);

impl<'a> UpdatingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for UpdatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct MockHandle {
    id: MockId,
    remote: Arc<dyn RemoteMockApi>,
    spy: Mutex<LocalSpy>,
    updating: AtomicBool,
    // Serialises resyncs with configuration calls; waiters queue in FIFO order.
    gate: AsyncMutex<()>,
}

impl std::fmt::Debug for MockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHandle")
            .field("id", &self.id)
            .field("calls", &self.call_count())
            .field("updating", &self.is_updating())
            .finish()
    }
}

impl MockHandle {
    pub fn new(id: MockId, remote: Arc<dyn RemoteMockApi>) -> Self {
        let spy = LocalSpy {
            name: id.default_mock_name(),
            ..LocalSpy::default()
        };
        Self {
            id,
            remote,
            spy: Mutex::new(spy),
            updating: AtomicBool::new(false),
            gate: AsyncMutex::new(()),
        }
    }

    pub fn id(&self) -> &MockId {
        &self.id
    }

    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Vec<Value>> {
        self.spy.lock().calls.clone()
    }

    pub fn results(&self) -> Vec<MockResult> {
        self.spy.lock().results.clone()
    }

    pub fn last_call(&self) -> Option<Vec<Value>> {
        self.spy.lock().calls.last().cloned()
    }

    pub fn call_count(&self) -> usize {
        self.spy.lock().calls.len()
    }

    pub fn behavior(&self) -> Option<LocalBehavior> {
        self.spy.lock().behavior.clone()
    }

    pub fn pending_once(&self) -> usize {
        self.spy.lock().once.len()
    }

    /// Once behaviors the remote spy has not used yet, oldest first.
    pub fn queued_once(&self) -> Vec<LocalBehavior> {
        self.spy
            .lock()
            .once
            .iter()
            .map(|queued| queued.behavior.clone())
            .collect()
    }

    pub fn mock_name(&self, name: impl Into<String>) -> &Self {
        self.spy.lock().name = name.into();
        self
    }

    pub fn get_mock_name(&self) -> String {
        self.spy.lock().name.clone()
    }

    fn instrument(&self, script: &ScriptFn) -> Result<InstrumentedSource, MockError> {
        Ok(instrument(script.as_str(), &self.id)?)
    }

    async fn apply(&self, behavior: LocalBehavior, once: bool) -> Result<&Self, MockError> {
        let source = self.instrument(&behavior.source())?;
        let _gate = self.gate.lock().await;
        let remote = if once {
            RemoteBehavior::Once(source)
        } else {
            RemoteBehavior::Persistent(source)
        };
        let from = self.remote.set_behavior(&self.id, remote).await?;

        let mut spy = self.spy.lock();
        if once {
            spy.once.push_back(QueuedOnce { behavior, from });
        } else {
            spy.behavior = Some(behavior);
        }
        Ok(self)
    }

    pub async fn mock_implementation(&self, implementation: impl Into<ScriptFn>) -> Result<&Self, MockError> {
        self.apply(LocalBehavior::Implementation(implementation.into()), false)
            .await
    }

    /// The first remote call after this restores the original method and then
    /// delegates to `implementation`.
    pub async fn mock_implementation_once(
        &self,
        implementation: impl Into<ScriptFn>,
    ) -> Result<&Self, MockError> {
        self.apply(LocalBehavior::Implementation(implementation.into()), true)
            .await
    }

    pub async fn mock_return_value(&self, value: Value) -> Result<&Self, MockError> {
        self.apply(LocalBehavior::ReturnValue(value), false).await
    }

    pub async fn mock_return_value_once(&self, value: Value) -> Result<&Self, MockError> {
        self.apply(LocalBehavior::ReturnValue(value), true).await
    }

    pub async fn mock_resolved_value(&self, value: Value) -> Result<&Self, MockError> {
        self.apply(LocalBehavior::ResolvedValue(value), false).await
    }

    pub async fn mock_resolved_value_once(&self, value: Value) -> Result<&Self, MockError> {
        self.apply(LocalBehavior::ResolvedValue(value), true).await
    }

    pub async fn mock_rejected_value(&self, value: Value) -> Result<&Self, MockError> {
        self.apply(LocalBehavior::RejectedValue(value), false).await
    }

    pub async fn mock_rejected_value_once(&self, value: Value) -> Result<&Self, MockError> {
        self.apply(LocalBehavior::RejectedValue(value), true).await
    }

    pub async fn mock_return_this(&self) -> Result<&Self, MockError> {
        self.apply(LocalBehavior::ReturnThis, false).await
    }

    /// Clear remote and local history; the configured behavior stays.
    pub async fn mock_clear(&self) -> Result<&Self, MockError> {
        let _gate = self.gate.lock().await;
        self.remote.clear(&self.id).await?;
        self.spy.lock().clear_history();
        Ok(self)
    }

    /// Clear history and go back to the default no-op implementation.
    pub async fn mock_reset(&self) -> Result<&Self, MockError> {
        let source = self.instrument(&ScriptFn::new(DEFAULT_IMPLEMENTATION))?;
        let _gate = self.gate.lock().await;
        self.remote.reset(&self.id, &source).await?;
        self.spy.lock().reset();
        Ok(self)
    }

    /// Reinstate the captured original remotely and clear both histories.
    pub async fn mock_restore(&self) -> Result<&Self, MockError> {
        let _gate = self.gate.lock().await;
        self.remote.restore(&self.id).await?;
        self.spy.lock().reset();
        debug!(target: "remote-mock", mock = %self.id, "restored original");
        Ok(self)
    }

    /// Run `callback(electron)` remotely while `implementation` backs the spy.
    pub async fn with_implementation(
        &self,
        implementation: impl Into<ScriptFn>,
        callback: impl Into<ScriptFn>,
    ) -> Result<Value, MockError> {
        let source = self.instrument(&implementation.into())?;
        let callback = callback.into();
        let _gate = self.gate.lock().await;
        self.remote
            .with_implementation(&self.id, &source, &callback)
            .await
    }

    /// Pull the remote history and replay calls the local spy has not seen.
    ///
    /// Calls already present locally are never replayed and a shorter remote
    /// history never truncates the local one.
    pub async fn update(&self) -> Result<&Self, MockError> {
        let _gate = self.gate.lock().await;
        let _updating = UpdatingGuard::enter(&self.updating);

        let snapshot = self.remote.snapshot(&self.id).await?;
        let remote_len = snapshot.len();
        let added = self.spy.lock().replay(snapshot);
        if added > 0 {
            debug!(target: "remote-mock", mock = %self.id, added, remote_len, "replayed remote calls");
        } else {
            trace!(target: "remote-mock", mock = %self.id, remote_len, "local history up to date");
        }
        Ok(self)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory stand-in for the main process used across unit tests.

    use std::collections::HashMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tokio::sync::Notify;

    use crate::error::{ExecuteError, MockError};
    use crate::execute::ScriptFn;
    use crate::instrument::InstrumentedSource;
    use crate::remote::{CallSnapshot, MockResult, RemoteBehavior, RemoteMockApi};
    use crate::MockId;

    #[derive(Debug, Default)]
    pub struct FakeSpy {
        pub installed: bool,
        pub live: bool,
        pub source: Option<String>,
        pub once: Vec<String>,
        pub history: CallSnapshot,
    }

    #[derive(Default)]
    pub struct FakeRemote {
        pub apis: Mutex<HashMap<String, Vec<String>>>,
        pub spies: Mutex<HashMap<MockId, FakeSpy>>,
        pub fail_next: Mutex<Option<String>>,
        pub snapshot_gate: Mutex<Option<std::sync::Arc<Notify>>>,
        pub snapshots: Mutex<usize>,
    }

    impl FakeRemote {
        pub fn with_api(api: &str, methods: &[&str]) -> Self {
            let remote = Self::default();
            remote.add_api(api, methods);
            remote
        }

        pub fn add_api(&self, api: &str, methods: &[&str]) {
            self.apis
                .lock()
                .insert(api.to_string(), methods.iter().map(|m| m.to_string()).collect());
        }

        /// Simulate the app calling the live method. Returns whether a spy saw it.
        pub fn invoke(&self, id: &MockId, args: Vec<Value>) -> bool {
            let mut spies = self.spies.lock();
            let Some(spy) = spies.get_mut(id) else {
                return false;
            };
            if !spy.live {
                return false;
            }
            if !spy.once.is_empty() {
                spy.once.remove(0);
                if spy.once.is_empty() {
                    spy.live = false;
                }
            }
            spy.history.calls.push(args);
            spy.history.results.push(MockResult::Return(json!(null)));
            true
        }

        pub fn history_len(&self, id: &MockId) -> usize {
            self.spies.lock().get(id).map_or(0, |spy| spy.history.len())
        }

        pub fn is_live(&self, id: &MockId) -> bool {
            self.spies.lock().get(id).map_or(false, |spy| spy.live)
        }

        pub fn pending_once(&self, id: &MockId) -> usize {
            self.spies.lock().get(id).map_or(0, |spy| spy.once.len())
        }

        pub fn current_source(&self, id: &MockId) -> Option<String> {
            self.spies.lock().get(id).and_then(|spy| spy.source.clone())
        }

        pub fn fail_next(&self, message: &str) {
            *self.fail_next.lock() = Some(message.to_string());
        }

        fn check_failure(&self) -> Result<(), MockError> {
            match self.fail_next.lock().take() {
                Some(text) => Err(MockError::Remote(ExecuteError::Exception { text, details: None })),
                None => Ok(()),
            }
        }

        fn with_spy<T>(&self, id: &MockId, f: impl FnOnce(&mut FakeSpy) -> T) -> Result<T, MockError> {
            self.check_failure()?;
            let mut spies = self.spies.lock();
            let spy = spies.get_mut(id).ok_or_else(|| {
                MockError::Remote(ExecuteError::Exception {
                    text: format!("{id} is not mocked"),
                    details: None,
                })
            })?;
            Ok(f(spy))
        }
    }

    #[async_trait]
    impl RemoteMockApi for FakeRemote {
        async fn resolve(&self, id: &MockId) -> Result<(), MockError> {
            self.check_failure()?;
            let apis = self.apis.lock();
            match apis.get(id.api()) {
                Some(methods) if methods.iter().any(|m| m == id.method()) => Ok(()),
                _ => Err(MockError::not_found(id.api(), id.method())),
            }
        }

        async fn list_methods(&self, api: &str) -> Result<Vec<String>, MockError> {
            self.check_failure()?;
            Ok(self.apis.lock().get(api).cloned().unwrap_or_default())
        }

        async fn install(&self, id: &MockId, source: &InstrumentedSource) -> Result<(), MockError> {
            self.check_failure()?;
            let mut spies = self.spies.lock();
            let spy = spies.entry(id.clone()).or_default();
            spy.installed = true;
            spy.live = true;
            spy.source = Some(source.source.clone());
            spy.once.clear();
            spy.history = CallSnapshot::default();
            Ok(())
        }

        async fn set_behavior(&self, id: &MockId, behavior: RemoteBehavior) -> Result<usize, MockError> {
            self.with_spy(id, |spy| {
                match behavior {
                    RemoteBehavior::Persistent(source) => spy.source = Some(source.source),
                    RemoteBehavior::Once(source) => spy.once.push(source.source),
                }
                spy.live = true;
                spy.history.len()
            })
        }

        async fn snapshot(&self, id: &MockId) -> Result<CallSnapshot, MockError> {
            let gate = self.snapshot_gate.lock().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.check_failure()?;
            *self.snapshots.lock() += 1;
            Ok(self
                .spies
                .lock()
                .get(id)
                .map(|spy| spy.history.clone())
                .unwrap_or_default())
        }

        async fn clear(&self, id: &MockId) -> Result<(), MockError> {
            self.with_spy(id, |spy| spy.history = CallSnapshot::default())
        }

        async fn reset(&self, id: &MockId, source: &InstrumentedSource) -> Result<(), MockError> {
            self.with_spy(id, |spy| {
                spy.history = CallSnapshot::default();
                spy.source = Some(source.source.clone());
                spy.once.clear();
                spy.live = true;
            })
        }

        async fn restore(&self, id: &MockId) -> Result<(), MockError> {
            self.with_spy(id, |spy| {
                spy.history = CallSnapshot::default();
                spy.live = false;
                spy.source = None;
                spy.once.clear();
            })
        }

        async fn with_implementation(
            &self,
            id: &MockId,
            implementation: &InstrumentedSource,
            callback: &ScriptFn,
        ) -> Result<Value, MockError> {
            self.with_spy(id, |_| {
                json!({ "implementation": implementation.source, "callback": callback.as_str() })
            })
        }
    }
}
