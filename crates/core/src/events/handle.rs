use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::OrchestratorEvent;

/// Envelope wrapping an orchestrator event with metadata
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: OrchestratorEvent,
}

/// Handle for publishing orchestrator events
///
/// This is cheaply cloneable and can be shared across tasks.
/// Events fan out to every subscriber; publishing never blocks and never
/// fails, even when nobody is listening.
#[derive(Clone, Debug)]
pub struct EventHandle {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventHandle {
    /// Create a new handle with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event
    ///
    /// Slow subscribers lose the oldest events rather than blocking the
    /// orchestrator.
    pub fn emit(&self, event: OrchestratorEvent) {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        if self.tx.send(envelope).is_err() {
            tracing::trace!("No subscribers for orchestrator event");
        }
    }

    /// Subscribe to all events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHandle {
    fn default() -> Self {
        Self::new(1024)
    }
}
