//! Event recorder standing in for a host UI.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::events::{EventHandle, OrchestratorEvent};
use crate::item::WorkItem;

/// Subscribes to an [`EventHandle`] and folds every event into host-side
/// copies of the affected items.
///
/// # Example
///
/// ```rust,ignore
/// let recorder = EventRecorder::attach(&events);
/// processor.process(&item).await?;
///
/// let item = recorder.item("doc-1").await.unwrap();
/// assert_eq!(item.status, ItemStatus::Ready);
/// ```
pub struct EventRecorder {
    events: Arc<RwLock<Vec<OrchestratorEvent>>>,
    items: Arc<RwLock<HashMap<String, WorkItem>>>,
    task: JoinHandle<()>,
}

impl EventRecorder {
    /// Start recording events published after this call.
    pub fn attach(handle: &EventHandle) -> Self {
        Self::with_items(handle, Vec::new())
    }

    /// Start recording, seeding the host-side copies with known items.
    pub fn with_items(handle: &EventHandle, items: Vec<WorkItem>) -> Self {
        let events = Arc::new(RwLock::new(Vec::new()));
        let items = Arc::new(RwLock::new(
            items
                .into_iter()
                .map(|item| (item.id.clone(), item))
                .collect::<HashMap<_, _>>(),
        ));

        let mut rx = handle.subscribe();
        let task = tokio::spawn({
            let events = Arc::clone(&events);
            let items = Arc::clone(&items);
            async move {
                loop {
                    match rx.recv().await {
                        Ok(envelope) => {
                            if let Some(id) = envelope.event.item_id() {
                                items
                                    .write()
                                    .await
                                    .entry(id.to_string())
                                    .or_insert_with(|| WorkItem::new(id))
                                    .apply(&envelope.event);
                            }
                            events.write().await.push(envelope.event);
                        }
                        Err(RecvError::Lagged(n)) => {
                            tracing::warn!("Event recorder lagged, {} events lost", n);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        });

        Self {
            events,
            items,
            task,
        }
    }

    /// Every recorded event, oldest first.
    pub async fn events(&self) -> Vec<OrchestratorEvent> {
        self.events.read().await.clone()
    }

    /// Recorded events concerning one item.
    pub async fn events_for(&self, item_id: &str) -> Vec<OrchestratorEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.item_id() == Some(item_id))
            .cloned()
            .collect()
    }

    /// Number of recorded events with the given name (see [`OrchestratorEvent::name`]).
    pub async fn count(&self, name: &str) -> usize {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }

    /// Host-side copy of an item.
    pub async fn item(&self, item_id: &str) -> Option<WorkItem> {
        self.items.read().await.get(item_id).cloned()
    }

    /// Poll until the predicate holds over the recorded events or the timeout passes.
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&[OrchestratorEvent]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(&self.events.read().await) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        self.task.abort();
    }
}
