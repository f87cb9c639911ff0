//! Table of live connection handles, one per in-flight item.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Entry {
    handle_id: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct RegistryInner {
    entries: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A poisoned table is still structurally valid.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Authoritative record of which items currently have a run in flight.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone, Debug, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the connection slot for an item.
    ///
    /// Returns `None` when the item already has a live handle. The handle's
    /// token is a child of `parent`, so cancelling the parent closes it.
    pub fn register(&self, item_id: &str, parent: &CancellationToken) -> Option<ConnectionHandle> {
        let mut entries = self.inner.entries();
        if entries.contains_key(item_id) {
            return None;
        }

        let handle_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = parent.child_token();
        entries.insert(
            item_id.to_string(),
            Entry {
                handle_id,
                token: token.clone(),
            },
        );

        Some(ConnectionHandle {
            registry: self.clone(),
            item_id: item_id.to_string(),
            handle_id,
            token,
        })
    }

    /// Whether the item has a live handle.
    pub fn contains(&self, item_id: &str) -> bool {
        self.inner.entries().contains_key(item_id)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every live handle and empty the table. Returns the closed ids, sorted.
    pub fn close_all(&self) -> Vec<String> {
        let drained: Vec<(String, Entry)> = self.inner.entries().drain().collect();
        let mut closed = Vec::with_capacity(drained.len());
        for (item_id, entry) in drained {
            entry.token.cancel();
            closed.push(item_id);
        }
        closed.sort();
        closed
    }

    fn release(&self, item_id: &str, handle_id: u64) {
        let mut entries = self.inner.entries();
        // After close_all a newer run may own the slot; leave it alone.
        if entries.get(item_id).map(|e| e.handle_id) == Some(handle_id) {
            entries.remove(item_id);
        }
    }
}

/// A live run's claim on its item. Dropping it frees the slot.
#[derive(Debug)]
pub struct ConnectionHandle {
    registry: ConnectionRegistry,
    item_id: String,
    handle_id: u64,
    token: CancellationToken,
}

impl ConnectionHandle {
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// Token cancelled when this connection must close.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.registry.release(&self.item_id, self.handle_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_exclusive_per_item() {
        let registry = ConnectionRegistry::new();
        let root = CancellationToken::new();

        let first = registry.register("doc-1", &root).expect("first claim");
        assert_eq!(first.item_id(), "doc-1");
        assert!(registry.register("doc-1", &root).is_none());
        assert!(registry.register("doc-2", &root).is_some());
        assert!(registry.contains("doc-1"));

        drop(first);
        assert!(!registry.contains("doc-1"));
        assert!(registry.register("doc-1", &root).is_some());
    }

    #[test]
    fn test_parent_cancellation_closes_handle() {
        let registry = ConnectionRegistry::new();
        let root = CancellationToken::new();
        let handle = registry.register("doc-1", &root).unwrap();

        root.cancel();
        assert!(handle.is_closed());
    }

    #[test]
    fn test_close_all_cancels_and_clears() {
        let registry = ConnectionRegistry::new();
        let root = CancellationToken::new();
        let b = registry.register("doc-2", &root).unwrap();
        let a = registry.register("doc-1", &root).unwrap();

        assert_eq!(registry.close_all(), vec!["doc-1", "doc-2"]);
        assert!(registry.close_all().is_empty());
        assert!(registry.is_empty());
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(!root.is_cancelled());
    }

    #[test]
    fn test_stale_handle_does_not_release_newer_claim() {
        let registry = ConnectionRegistry::new();
        let root = CancellationToken::new();
        let stale = registry.register("doc-1", &root).unwrap();
        registry.close_all();

        let fresh = registry.register("doc-1", &root).unwrap();
        drop(stale);
        assert!(registry.contains("doc-1"));
        drop(fresh);
        assert!(!registry.contains("doc-1"));
    }
}
