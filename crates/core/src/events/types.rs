use serde::{Deserialize, Serialize};

use crate::item::{ItemKind, ProcessingUpdate, Stage};
use crate::processor::CompletionSource;

/// Aggregate counters reported alongside scheduler progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounters {
    /// Candidates queued across all discovery rounds.
    pub discovered: u64,
    /// Runs that finished successfully (including already-complete items).
    pub completed: u64,
    /// Items found complete during discovery or at probe time.
    pub skipped: u64,
    pub failed: u64,
    /// Runs that hit the fallback timeout without a terminal signal.
    pub unresolved: u64,
    pub cancelled: u64,
    pub repaired: u64,
    pub repair_failed: u64,
    /// Runs in flight when the counters were taken.
    pub active: u64,
}

impl ProgressCounters {
    /// Runs that reached any terminal state.
    pub fn finished(&self) -> u64 {
        self.completed
            + self.failed
            + self.unresolved
            + self.cancelled
            + self.repaired
            + self.repair_failed
    }
}

/// State changes published by the orchestrator.
///
/// Hosts subscribe to these instead of handing the orchestrator setter
/// callbacks; [`crate::item::WorkItem::apply`] folds them into an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    ItemStarted {
        item_id: String,
        kind: ItemKind,
    },
    ItemProgress {
        item_id: String,
        update: ProcessingUpdate,
    },
    ItemCompleted {
        item_id: String,
        stages: Vec<Stage>,
        analysis_complete: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        persistent_id: Option<String>,
        source: CompletionSource,
    },
    ItemFailed {
        item_id: String,
        reason: String,
        /// Whether the failure came from the repair path.
        repair: bool,
    },
    /// The fallback timeout fired before any terminal signal.
    ItemUnresolved {
        item_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_update: Option<ProcessingUpdate>,
    },
    ItemCancelled {
        item_id: String,
    },
    IdentifierAssigned {
        item_id: String,
        persistent_id: String,
    },
    RepairCompleted {
        item_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        persistent_id: Option<String>,
    },
    SchedulerProgress {
        /// Which pool reported ("processing" or "repair").
        pool: String,
        text: String,
        counters: ProgressCounters,
    },
}

impl OrchestratorEvent {
    /// The item this event concerns, if any.
    pub fn item_id(&self) -> Option<&str> {
        match self {
            OrchestratorEvent::ItemStarted { item_id, .. }
            | OrchestratorEvent::ItemProgress { item_id, .. }
            | OrchestratorEvent::ItemCompleted { item_id, .. }
            | OrchestratorEvent::ItemFailed { item_id, .. }
            | OrchestratorEvent::ItemUnresolved { item_id, .. }
            | OrchestratorEvent::ItemCancelled { item_id }
            | OrchestratorEvent::IdentifierAssigned { item_id, .. }
            | OrchestratorEvent::RepairCompleted { item_id, .. } => Some(item_id),
            OrchestratorEvent::SchedulerProgress { .. } => None,
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorEvent::ItemStarted { .. } => "item_started",
            OrchestratorEvent::ItemProgress { .. } => "item_progress",
            OrchestratorEvent::ItemCompleted { .. } => "item_completed",
            OrchestratorEvent::ItemFailed { .. } => "item_failed",
            OrchestratorEvent::ItemUnresolved { .. } => "item_unresolved",
            OrchestratorEvent::ItemCancelled { .. } => "item_cancelled",
            OrchestratorEvent::IdentifierAssigned { .. } => "identifier_assigned",
            OrchestratorEvent::RepairCompleted { .. } => "repair_completed",
            OrchestratorEvent::SchedulerProgress { .. } => "scheduler_progress",
        }
    }
}
