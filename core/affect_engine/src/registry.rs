use async_trait::async_trait;
use dashmap::DashMap;
use shared_types::BackendId;
use std::sync::Arc;
use tracing::info;

use crate::errors::BackendError;

/// A reasoning backend that turns an utterance into a response.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn invoke(&self, text: &str) -> Result<String, BackendError>;
}

/// Backends available for routing, keyed by id. Membership may change while
/// requests are in flight; a lookup sees either the old or the new entry.
#[derive(Default)]
pub struct BackendRegistry {
    backends: DashMap<BackendId, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a backend, returning the one it replaced.
    pub fn register(&self, id: impl Into<BackendId>, backend: Arc<dyn Backend>) -> Option<Arc<dyn Backend>> {
        let id = id.into();
        info!(backend = %id, "backend registered");
        self.backends.insert(id, backend)
    }

    pub fn deregister(&self, id: &str) -> Option<Arc<dyn Backend>> {
        let removed = self.backends.remove(id).map(|(_, b)| b);
        if removed.is_some() {
            info!(backend = %id, "backend deregistered");
        }
        removed
    }

    /// Registered ids in ascending order.
    pub fn list_backends(&self) -> Vec<BackendId> {
        let mut ids: Vec<BackendId> = self.backends.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn has_backend(&self, id: &str) -> bool {
        self.backends.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Backend>> {
        self.backends.get(id).map(|b| b.value().clone())
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Backend for Echo {
        async fn invoke(&self, text: &str) -> Result<String, BackendError> {
            Ok(text.to_string())
        }
    }

    #[tokio::test]
    async fn register_list_and_invoke() {
        let registry = BackendRegistry::new();
        registry.register("mistral", Arc::new(Echo));
        registry.register("glm", Arc::new(Echo));
        assert_eq!(registry.list_backends(), vec!["glm", "mistral"]);
        assert!(registry.has_backend("glm"));

        let backend = registry.get("glm").unwrap();
        assert_eq!(backend.invoke("hi").await.unwrap(), "hi");

        assert!(registry.deregister("glm").is_some());
        assert!(registry.deregister("glm").is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.get("glm").is_none());
    }
}
