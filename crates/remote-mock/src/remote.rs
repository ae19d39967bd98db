//! Typed access to the spies living in the main process.
//!
//! Every capability the mock engine needs (resolve, install, configure, read
//! history, clear, reset, restore) is one method on [`RemoteMockApi`], keyed by
//! [`MockId`]. [`ScriptedRemote`] realises them as small functions run through a
//! [`RemoteExecutor`] against a spy runtime injected once per session.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::MockError;
use crate::execute::{execute_typed, RemoteExecutor, ScriptFn};
use crate::instrument::InstrumentedSource;
use crate::MockId;

/// Outcome of one remote call, aligned by index with the call list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum MockResult {
    Return(Value),
    Throw(Value),
    Incomplete,
}

/// Plain copy of a remote spy's history.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CallSnapshot {
    #[serde(default)]
    pub calls: Vec<Vec<Value>>,
    #[serde(default)]
    pub results: Vec<MockResult>,
}

impl CallSnapshot {
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Implementation handed to a remote spy.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteBehavior {
    /// Used for every call until replaced.
    Persistent(InstrumentedSource),
    /// Used for one call; consuming the last queued one restores the original
    /// method before delegating.
    Once(InstrumentedSource),
}

#[async_trait]
pub trait RemoteMockApi: Send + Sync {
    /// Check that `api` exists and exposes a callable `method`.
    async fn resolve(&self, id: &MockId) -> Result<(), MockError>;
    /// Names of the callable members of `api`.
    async fn list_methods(&self, api: &str) -> Result<Vec<String>, MockError>;
    /// Replace the live method with a spy running `source`. The original is
    /// captured the first time only.
    async fn install(&self, id: &MockId, source: &InstrumentedSource) -> Result<(), MockError>;
    /// Returns the length of the remote call history at the moment the
    /// behavior took effect.
    async fn set_behavior(&self, id: &MockId, behavior: RemoteBehavior) -> Result<usize, MockError>;
    async fn snapshot(&self, id: &MockId) -> Result<CallSnapshot, MockError>;
    async fn clear(&self, id: &MockId) -> Result<(), MockError>;
    /// Clear history and fall back to `source` as the implementation. The spy
    /// becomes the live member again even if a once behavior had put the
    /// original back.
    async fn reset(&self, id: &MockId, source: &InstrumentedSource) -> Result<(), MockError>;
    /// Put the captured original back and clear history.
    async fn restore(&self, id: &MockId) -> Result<(), MockError>;
    /// Run `callback(electron)` while `implementation` temporarily backs the spy.
    async fn with_implementation(
        &self,
        id: &MockId,
        implementation: &InstrumentedSource,
        callback: &ScriptFn,
    ) -> Result<Value, MockError>;
}

/// Spy runtime installed as `globalThis.__electronMock`.
const SPY_RUNTIME: &str = r#"(electron) => {
  globalThis.__electronMock ??= (() => {
    const entries = new Map();
    const key = (api, method) => `${api}.${method}`;
    const materialize = (source) => new Function(`return ${source}`)();
    const plain = (value) => {
      if (value === undefined) return null;
      if (value instanceof Error) return { name: value.name, message: value.message };
      try {
        return JSON.parse(JSON.stringify(value));
      } catch {
        return String(value);
      }
    };
    const createSpy = (entry) => {
      const spy = function (...args) {
        const index = spy.mock.calls.length;
        spy.mock.calls.push(args);
        spy.mock.results.push({ type: 'incomplete' });
        let next = entry.impl;
        if (entry.once.length > 0) {
          next = entry.once.shift();
          if (entry.once.length === 0) entry.owner[entry.method] = entry.original;
        }
        try {
          const value = next ? next.apply(this, args) : undefined;
          spy.mock.results[index] = { type: 'return', value };
          return value;
        } catch (error) {
          spy.mock.results[index] = { type: 'throw', value: error };
          throw error;
        }
      };
      spy.mock = { calls: [], results: [] };
      spy.__isElectronMock = true;
      return spy;
    };
    const entry = (api, method) => {
      const found = entries.get(key(api, method));
      if (!found) throw new Error(`${key(api, method)} is not mocked`);
      return found;
    };
    const clear = (found) => {
      found.spy.mock.calls = [];
      found.spy.mock.results = [];
    };
    return {
      resolve(electron, api, method) {
        const owner = electron[api];
        if (owner === undefined || owner === null) return 'missing-api';
        return typeof owner[method] === 'function' ? 'ok' : 'missing-method';
      },
      methods(electron, api) {
        const owner = electron[api];
        if (owner === undefined || owner === null) return [];
        const names = new Set();
        for (let proto = owner; proto && proto !== Object.prototype; proto = Object.getPrototypeOf(proto)) {
          for (const name of Object.getOwnPropertyNames(proto)) {
            if (name !== 'constructor' && typeof owner[name] === 'function') names.add(name);
          }
        }
        return [...names].sort();
      },
      install(electron, api, method, source) {
        const owner = electron[api];
        let found = entries.get(key(api, method));
        if (!found) {
          found = { owner, method, original: owner[method], impl: undefined, once: [] };
          found.spy = createSpy(found);
          entries.set(key(api, method), found);
        }
        found.impl = materialize(source);
        found.once = [];
        clear(found);
        owner[method] = found.spy;
      },
      behave(api, method, source, once) {
        const found = entry(api, method);
        const impl = materialize(source);
        if (once) found.once.push(impl);
        else found.impl = impl;
        found.owner[method] = found.spy;
        return found.spy.mock.calls.length;
      },
      snapshot(api, method) {
        const found = entries.get(key(api, method));
        if (!found) return { calls: [], results: [] };
        return {
          calls: found.spy.mock.calls.map((args) => args.map(plain)),
          results: found.spy.mock.results.map((result) =>
            result.type === 'incomplete' ? { type: 'incomplete' } : { type: result.type, value: plain(result.value) },
          ),
        };
      },
      clear(api, method) {
        clear(entry(api, method));
      },
      reset(api, method, source) {
        const found = entry(api, method);
        found.impl = materialize(source);
        found.once = [];
        clear(found);
        found.owner[method] = found.spy;
      },
      restore(api, method) {
        const found = entry(api, method);
        found.owner[method] = found.original;
        found.impl = undefined;
        found.once = [];
        clear(found);
      },
      async withImplementation(electron, api, method, source, callbackSource) {
        const found = entry(api, method);
        const previous = found.impl;
        found.impl = materialize(source);
        try {
          return plain(await materialize(callbackSource)(electron));
        } finally {
          found.impl = previous;
        }
      },
    };
  })();
  return true;
}"#;

const RESOLVE_SCRIPT: &str =
    "(electron, api, method) => globalThis.__electronMock.resolve(electron, api, method)";
const METHODS_SCRIPT: &str = "(electron, api) => globalThis.__electronMock.methods(electron, api)";
const INSTALL_SCRIPT: &str =
    "(electron, api, method, source) => globalThis.__electronMock.install(electron, api, method, source)";
const BEHAVE_SCRIPT: &str =
    "(electron, api, method, source, once) => globalThis.__electronMock.behave(api, method, source, once)";
const SNAPSHOT_SCRIPT: &str =
    "(electron, api, method) => globalThis.__electronMock.snapshot(api, method)";
const CLEAR_SCRIPT: &str = "(electron, api, method) => globalThis.__electronMock.clear(api, method)";
const RESET_SCRIPT: &str =
    "(electron, api, method, source) => globalThis.__electronMock.reset(api, method, source)";
const RESTORE_SCRIPT: &str =
    "(electron, api, method) => globalThis.__electronMock.restore(api, method)";
const WITH_IMPLEMENTATION_SCRIPT: &str = "(electron, api, method, source, callback) => globalThis.__electronMock.withImplementation(electron, api, method, source, callback)";

/// [`RemoteMockApi`] over any [`RemoteExecutor`].
pub struct ScriptedRemote<E: RemoteExecutor> {
    executor: Arc<E>,
    runtime: OnceCell<()>,
}

impl<E: RemoteExecutor> ScriptedRemote<E> {
    pub fn new(executor: Arc<E>) -> Self {
        Self {
            executor,
            runtime: OnceCell::new(),
        }
    }

    pub fn executor(&self) -> &Arc<E> {
        &self.executor
    }

    async fn ensure_runtime(&self) -> Result<(), MockError> {
        self.runtime
            .get_or_try_init(|| async {
                self.executor
                    .execute(&ScriptFn::new(SPY_RUNTIME), Vec::new())
                    .await?;
                debug!(target: "remote-mock", "spy runtime injected");
                Ok::<(), MockError>(())
            })
            .await?;
        Ok(())
    }

    async fn run(&self, script: &str, args: Vec<Value>) -> Result<Value, MockError> {
        self.ensure_runtime().await?;
        Ok(self.executor.execute(&ScriptFn::new(script), args).await?)
    }

    fn target(id: &MockId) -> Vec<Value> {
        vec![json!(id.api()), json!(id.method())]
    }
}

#[async_trait]
impl<E: RemoteExecutor> RemoteMockApi for ScriptedRemote<E> {
    async fn resolve(&self, id: &MockId) -> Result<(), MockError> {
        let status = self.run(RESOLVE_SCRIPT, Self::target(id)).await?;
        match status.as_str() {
            Some("ok") => Ok(()),
            _ => Err(MockError::not_found(id.api(), id.method())),
        }
    }

    async fn list_methods(&self, api: &str) -> Result<Vec<String>, MockError> {
        self.ensure_runtime().await?;
        Ok(execute_typed(
            self.executor.as_ref(),
            &ScriptFn::new(METHODS_SCRIPT),
            vec![json!(api)],
        )
        .await?)
    }

    async fn install(&self, id: &MockId, source: &InstrumentedSource) -> Result<(), MockError> {
        let mut args = Self::target(id);
        args.push(json!(source.as_str()));
        self.run(INSTALL_SCRIPT, args).await?;
        Ok(())
    }

    async fn set_behavior(&self, id: &MockId, behavior: RemoteBehavior) -> Result<usize, MockError> {
        let (source, once) = match behavior {
            RemoteBehavior::Persistent(source) => (source, false),
            RemoteBehavior::Once(source) => (source, true),
        };
        let mut args = Self::target(id);
        args.push(json!(source.as_str()));
        args.push(json!(once));
        self.ensure_runtime().await?;
        Ok(execute_typed(self.executor.as_ref(), &ScriptFn::new(BEHAVE_SCRIPT), args).await?)
    }

    async fn snapshot(&self, id: &MockId) -> Result<CallSnapshot, MockError> {
        self.ensure_runtime().await?;
        Ok(execute_typed(
            self.executor.as_ref(),
            &ScriptFn::new(SNAPSHOT_SCRIPT),
            Self::target(id),
        )
        .await?)
    }

    async fn clear(&self, id: &MockId) -> Result<(), MockError> {
        self.run(CLEAR_SCRIPT, Self::target(id)).await?;
        Ok(())
    }

    async fn reset(&self, id: &MockId, source: &InstrumentedSource) -> Result<(), MockError> {
        let mut args = Self::target(id);
        args.push(json!(source.as_str()));
        self.run(RESET_SCRIPT, args).await?;
        Ok(())
    }

    async fn restore(&self, id: &MockId) -> Result<(), MockError> {
        self.run(RESTORE_SCRIPT, Self::target(id)).await?;
        Ok(())
    }

    async fn with_implementation(
        &self,
        id: &MockId,
        implementation: &InstrumentedSource,
        callback: &ScriptFn,
    ) -> Result<Value, MockError> {
        let mut args = Self::target(id);
        args.push(json!(implementation.as_str()));
        args.push(json!(callback.as_str()));
        self.run(WITH_IMPLEMENTATION_SCRIPT, args).await
    }
}
