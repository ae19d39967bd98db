use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::MockError;
use crate::mock::MockHandle;
use crate::MockId;

/// Live mock handles keyed by `<api>.<method>`.
#[derive(Default)]
pub struct MockRegistry {
    mocks: DashMap<MockId, Arc<MockHandle>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a handle by the name carried in a notification.
    pub fn get(&self, name: &str) -> Option<Arc<MockHandle>> {
        let id = MockId::parse(name).ok()?;
        self.get_by_id(&id)
    }

    pub fn get_by_id(&self, id: &MockId) -> Option<Arc<MockHandle>> {
        self.mocks.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn require(&self, name: &str) -> Result<Arc<MockHandle>, MockError> {
        self.get(name)
            .ok_or_else(|| MockError::UnknownMock(name.to_string()))
    }

    /// Register `handle`, returning the handle it replaced.
    pub fn insert(&self, handle: Arc<MockHandle>) -> Option<Arc<MockHandle>> {
        let previous = self.mocks.insert(handle.id().clone(), handle);
        if let Some(previous) = &previous {
            debug!(target: "remote-mock", mock = %previous.id(), "replaced registered mock");
        }
        previous
    }

    pub fn remove(&self, id: &MockId) -> Option<Arc<MockHandle>> {
        self.mocks.remove(id).map(|(_, handle)| handle)
    }

    pub fn contains(&self, name: &str) -> bool {
        MockId::parse(name)
            .map(|id| self.mocks.contains_key(&id))
            .unwrap_or(false)
    }

    /// Every handle, optionally limited to one API, in name order.
    pub fn all(&self, api: Option<&str>) -> Vec<Arc<MockHandle>> {
        let mut handles: Vec<Arc<MockHandle>> = self
            .mocks
            .iter()
            .filter(|entry| api.map_or(true, |api| entry.key().api() == api))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        handles.sort_by_key(|handle| handle.id().to_string());
        handles
    }

    pub fn len(&self) -> usize {
        self.mocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::fake::FakeRemote;

    fn handle(remote: &Arc<FakeRemote>, name: &str) -> Arc<MockHandle> {
        Arc::new(MockHandle::new(MockId::parse(name).unwrap(), remote.clone()))
    }

    #[test]
    fn lookups_by_notification_name() {
        let remote = Arc::new(FakeRemote::default());
        let registry = MockRegistry::new();
        registry.insert(handle(&remote, "app.getName"));
        registry.insert(handle(&remote, "dialog.showOpenDialog"));

        assert!(registry.get("app.getName").is_some());
        assert!(registry.contains("dialog.showOpenDialog"));
        assert!(registry.get("app.quit").is_none());
        assert!(registry.get("garbage").is_none());
        assert!(matches!(
            registry.require("app.quit"),
            Err(MockError::UnknownMock(name)) if name == "app.quit"
        ));
    }

    #[test]
    fn reinsert_replaces_previous_handle() {
        let remote = Arc::new(FakeRemote::default());
        let registry = MockRegistry::new();
        let first = handle(&remote, "app.getName");
        let second = handle(&remote, "app.getName");
        assert!(registry.insert(first.clone()).is_none());
        let replaced = registry.insert(second.clone()).unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));
        assert!(Arc::ptr_eq(&registry.get("app.getName").unwrap(), &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn all_filters_by_api() {
        let remote = Arc::new(FakeRemote::default());
        let registry = MockRegistry::new();
        for name in ["app.quit", "app.getName", "dialog.showOpenDialog"] {
            registry.insert(handle(&remote, name));
        }
        let names: Vec<String> = registry
            .all(Some("app"))
            .iter()
            .map(|h| h.id().to_string())
            .collect();
        assert_eq!(names, vec!["app.getName", "app.quit"]);
        assert_eq!(registry.all(None).len(), 3);

        registry.remove(&MockId::parse("app.quit").unwrap());
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
    }
}
