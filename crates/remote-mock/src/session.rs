//! One mocking session against one Electron main process.

use std::sync::Arc;

use cdp_bridge::{ElectronCdpBridge, MockCallListener};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::MockError;
use crate::execute::CdpExecutor;
use crate::installer::MockInstaller;
use crate::mock::MockHandle;
use crate::registry::MockRegistry;
use crate::remote::{RemoteMockApi, ScriptedRemote};
use crate::scheduler::UpdateScheduler;

pub struct MockSession {
    registry: Arc<MockRegistry>,
    scheduler: UpdateScheduler,
    installer: MockInstaller,
}

impl MockSession {
    pub fn new(remote: Arc<dyn RemoteMockApi>) -> Arc<Self> {
        let registry = Arc::new(MockRegistry::new());
        Arc::new(Self {
            installer: MockInstaller::new(remote, Arc::clone(&registry)),
            registry,
            scheduler: UpdateScheduler::new(),
        })
    }

    /// Session driving spies through `bridge`, registered as its notification listener.
    pub fn attach(bridge: Arc<ElectronCdpBridge>) -> Arc<Self> {
        let remote = ScriptedRemote::new(Arc::new(CdpExecutor::new(Arc::clone(&bridge))));
        let session = Self::new(Arc::new(remote));
        let listener: Arc<dyn MockCallListener> = session.clone();
        bridge.set_mock_listener(&listener);
        session
    }

    pub fn registry(&self) -> &Arc<MockRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }

    pub async fn mock(&self, api: &str, method: &str) -> Result<Arc<MockHandle>, MockError> {
        self.installer.install(api, method).await
    }

    pub async fn mock_all(&self, api: &str) -> Result<Vec<Arc<MockHandle>>, MockError> {
        self.installer.install_all(api).await
    }

    pub fn get(&self, name: &str) -> Option<Arc<MockHandle>> {
        self.registry.get(name)
    }

    pub fn is_mock_function(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub async fn clear_all_mocks(&self, api: Option<&str>) -> Result<(), MockError> {
        let handles = self.registry.all(api);
        for result in join_all(handles.iter().map(|handle| handle.mock_clear())).await {
            result?;
        }
        Ok(())
    }

    pub async fn reset_all_mocks(&self, api: Option<&str>) -> Result<(), MockError> {
        let handles = self.registry.all(api);
        for result in join_all(handles.iter().map(|handle| handle.mock_reset())).await {
            result?;
        }
        Ok(())
    }

    /// Restore every matching mock and drop it from the registry.
    pub async fn restore_all_mocks(&self, api: Option<&str>) -> Result<(), MockError> {
        let handles = self.registry.all(api);
        for result in join_all(handles.iter().map(|handle| handle.mock_restore())).await {
            result?;
        }
        for handle in &handles {
            self.registry.remove(handle.id());
        }
        Ok(())
    }

    /// Wait for every notification-driven resync in flight.
    pub async fn settle(&self) {
        self.scheduler.drain().await;
    }

    /// Drain pending resyncs and stop accepting new ones.
    pub async fn close(&self) {
        self.scheduler.drain().await;
        self.scheduler.close();
    }
}

impl MockCallListener for MockSession {
    fn on_mock_call(&self, mock_name: &str) {
        match self.registry.get(mock_name) {
            Some(handle) => {
                debug!(target: "remote-mock", mock = mock_name, "scheduling resync");
                self.scheduler.spawn_update(handle);
            }
            None => warn!(target: "remote-mock", mock = mock_name, "notification for unknown mock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::fake::FakeRemote;
    use serde_json::json;

    fn session() -> (Arc<MockSession>, Arc<FakeRemote>) {
        let remote = Arc::new(FakeRemote::with_api("app", &["getName", "quit"]));
        remote.add_api("dialog", &["showOpenDialog"]);
        (MockSession::new(remote.clone()), remote)
    }

    #[tokio::test]
    async fn notifications_resync_the_matching_handle() {
        let (session, remote) = session();
        let handle = session.mock("app", "getName").await.unwrap();
        remote.invoke(handle.id(), vec![json!("a")]);
        remote.invoke(handle.id(), vec![json!("b")]);

        session.on_mock_call("app.getName");
        session.on_mock_call("app.getName");
        session.settle().await;

        assert_eq!(handle.calls(), vec![vec![json!("a")], vec![json!("b")]]);
        assert_eq!(session.scheduler().pending(), 0);
    }

    #[tokio::test]
    async fn unknown_and_failing_notifications_do_not_stop_the_listener() {
        let (session, remote) = session();
        let handle = session.mock("app", "quit").await.unwrap();

        session.on_mock_call("app.neverMocked");
        session.on_mock_call("not-a-name");
        remote.fail_next("Error: context destroyed");
        session.on_mock_call("app.quit");
        session.settle().await;
        assert_eq!(handle.call_count(), 0);

        remote.invoke(handle.id(), vec![]);
        session.on_mock_call("app.quit");
        session.settle().await;
        assert_eq!(handle.call_count(), 1);
    }

    #[tokio::test]
    async fn bulk_operations_respect_the_api_filter() {
        let (session, remote) = session();
        let get_name = session.mock("app", "getName").await.unwrap();
        let dialog = session.mock("dialog", "showOpenDialog").await.unwrap();
        remote.invoke(get_name.id(), vec![]);
        remote.invoke(dialog.id(), vec![]);
        get_name.update().await.unwrap();
        dialog.update().await.unwrap();

        session.clear_all_mocks(Some("app")).await.unwrap();
        assert_eq!(get_name.call_count(), 0);
        assert_eq!(dialog.call_count(), 1);

        dialog.mock_return_value(json!({ "canceled": true })).await.unwrap();
        session.reset_all_mocks(None).await.unwrap();
        assert_eq!(dialog.behavior(), None);
        assert_eq!(dialog.call_count(), 0);

        session.restore_all_mocks(Some("dialog")).await.unwrap();
        assert!(!session.is_mock_function("dialog.showOpenDialog"));
        assert!(session.is_mock_function("app.getName"));
        assert!(!remote.is_live(dialog.id()));
    }

    #[tokio::test]
    async fn mock_all_registers_every_method() {
        let (session, _remote) = session();
        let handles = session.mock_all("app").await.unwrap();
        assert_eq!(handles.len(), 2);
        assert!(session.is_mock_function("app.getName"));
        assert!(session.is_mock_function("app.quit"));
        assert!(session.get("app.quit").is_some());
    }

    #[tokio::test]
    async fn closed_sessions_ignore_late_notifications() {
        let (session, remote) = session();
        let handle = session.mock("app", "getName").await.unwrap();
        session.close().await;
        remote.invoke(handle.id(), vec![]);
        session.on_mock_call("app.getName");
        assert_eq!(session.scheduler().pending(), 0);
        assert_eq!(handle.call_count(), 0);
    }
}
