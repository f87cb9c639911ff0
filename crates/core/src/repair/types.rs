//! Types for the repair path.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendError;

/// Errors from a single repair.
#[derive(Debug, Error)]
pub enum RepairError {
    /// The repair call itself failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The backend answered but did not report success.
    #[error("repair rejected: {0}")]
    Rejected(String),

    /// Another run for the same item holds its connection slot.
    #[error("item {0} already has a run in flight")]
    AlreadyRunning(String),

    #[error("repair cancelled")]
    Cancelled,
}

/// A successful repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub persistent_id: Option<String>,
    pub message: String,
}

/// Counts from one repair pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairSummary {
    /// Distinct ids handed to the pool.
    pub requested: usize,
    pub repaired: usize,
    pub failed: usize,
    /// Skipped because another run for the item was live.
    pub skipped: usize,
    pub cancelled: usize,
    /// Never launched because the pool was stopped first.
    pub not_started: usize,
}

impl RepairSummary {
    pub fn finished(&self) -> usize {
        self.repaired + self.failed + self.skipped + self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RepairError::Rejected("payload still empty".to_string());
        assert_eq!(err.to_string(), "repair rejected: payload still empty");

        let err = RepairError::AlreadyRunning("doc-3".to_string());
        assert_eq!(err.to_string(), "item doc-3 already has a run in flight");
    }

    #[test]
    fn test_summary_finished() {
        let summary = RepairSummary {
            requested: 6,
            repaired: 3,
            failed: 1,
            cancelled: 1,
            not_started: 1,
            ..Default::default()
        };
        assert_eq!(summary.finished(), 5);
    }
}
