use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Item id to externally assigned persistent id.
///
/// Append-only for the lifetime of the orchestrator. Shared between the
/// processor and the repair path; clones see the same map.
#[derive(Clone, Debug, Default)]
pub struct IdentifierMap {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a persistent id. A later id for the same item replaces the earlier one.
    pub async fn record(&self, item_id: &str, persistent_id: &str) {
        self.inner
            .write()
            .await
            .insert(item_id.to_string(), persistent_id.to_string());
    }

    pub async fn get(&self, item_id: &str) -> Option<String> {
        self.inner.read().await.get(item_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Copy of every recorded entry.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.inner.read().await.clone()
    }
}
