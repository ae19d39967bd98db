use std::sync::Arc;

use tracing::info;

use crate::error::MockError;
use crate::instrument::instrument;
use crate::mock::{MockHandle, DEFAULT_IMPLEMENTATION};
use crate::registry::MockRegistry;
use crate::remote::RemoteMockApi;
use crate::MockId;

/// Replaces remote methods with instrumented spies and hands out handles.
pub struct MockInstaller {
    remote: Arc<dyn RemoteMockApi>,
    registry: Arc<MockRegistry>,
}

impl MockInstaller {
    pub fn new(remote: Arc<dyn RemoteMockApi>, registry: Arc<MockRegistry>) -> Self {
        Self { remote, registry }
    }

    /// Install a no-op spy over `api.method` and register a fresh handle for it.
    ///
    /// Installing an already mocked method keeps the original captured the
    /// first time, clears the remote history and replaces the registered handle.
    pub async fn install(&self, api: &str, method: &str) -> Result<Arc<MockHandle>, MockError> {
        let id = MockId::new(api, method)?;
        self.remote.resolve(&id).await?;

        let source = instrument(DEFAULT_IMPLEMENTATION, &id)?;
        self.remote.install(&id, &source).await?;

        let handle = Arc::new(MockHandle::new(id.clone(), Arc::clone(&self.remote)));
        self.registry.insert(Arc::clone(&handle));
        info!(target: "remote-mock", mock = %id, "installed remote mock");
        Ok(handle)
    }

    /// Mock every callable member of `api`.
    pub async fn install_all(&self, api: &str) -> Result<Vec<Arc<MockHandle>>, MockError> {
        let methods = self.remote.list_methods(api).await?;
        let mut handles = Vec::with_capacity(methods.len());
        for method in methods {
            handles.push(self.install(api, &method).await?);
        }
        Ok(handles)
    }
}
