//! Types for the concurrent scheduler.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::ProgressCounters;
use crate::item::WorkItem;

/// Errors that can occur when starting the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A run is already in progress on this scheduler.
    #[error("scheduler is already running")]
    AlreadyRunning,
}

/// Work found during discovery.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    /// At least one stage is outstanding.
    Process(WorkItem),
    /// Marked complete but the backend judges its output broken.
    Repair(WorkItem),
}

impl Candidate {
    pub fn item(&self) -> &WorkItem {
        match self {
            Candidate::Process(item) | Candidate::Repair(item) => item,
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item().id
    }

    pub fn is_repair(&self) -> bool {
        matches!(self, Candidate::Repair(_))
    }
}

/// Result of a full scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique id of this run, as logged.
    pub run_id: String,
    /// Discovery rounds performed, including the final empty one.
    pub rounds: u32,
    pub counters: ProgressCounters,
    /// Whether the run ended because of a stop.
    pub cancelled: bool,
}

/// Snapshot of the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    /// Current (or last) discovery round, 1-based.
    pub round: u32,
    /// Runs in flight.
    pub active: usize,
    /// Most runs ever in flight at once.
    pub peak_active: usize,
    /// Candidates waiting for a slot.
    pub queued: usize,
    /// Items handled during this scheduler's lifetime.
    pub handled: usize,
    pub counters: ProgressCounters,
}

impl SchedulerStatus {
    /// Human-readable one-line progress.
    pub fn text(&self) -> String {
        format!(
            "Round {}: {} completed, {} skipped, {} failed, {} unresolved, {} repaired, {} active, {} queued",
            self.round,
            self.counters.completed,
            self.counters.skipped,
            self.counters.failed + self.counters.repair_failed,
            self.counters.unresolved,
            self.counters.repaired,
            self.active,
            self.queued,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_accessors() {
        let candidate = Candidate::Repair(WorkItem::new("doc-4"));
        assert_eq!(candidate.item_id(), "doc-4");
        assert!(candidate.is_repair());
        assert!(!Candidate::Process(WorkItem::new("doc-5")).is_repair());
    }

    #[test]
    fn test_status_text() {
        let status = SchedulerStatus {
            round: 2,
            active: 1,
            queued: 3,
            counters: ProgressCounters {
                completed: 4,
                failed: 1,
                repair_failed: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            status.text(),
            "Round 2: 4 completed, 0 skipped, 2 failed, 0 unresolved, 0 repaired, 1 active, 3 queued"
        );
    }
}
