//! Stage status probing with degrade-on-failure semantics.
//!
//! Both calls swallow backend failures: a failed status check reads as
//! "nothing done yet" and a failed breakage check as "not broken". Callers
//! must tolerate those false negatives.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::PipelineBackend;
use crate::item::{ItemKind, StageStatus};

/// Read-only view of an item's remote completion state.
#[derive(Clone)]
pub struct StatusProbe {
    backend: Arc<dyn PipelineBackend>,
}

impl StatusProbe {
    pub fn new(backend: Arc<dyn PipelineBackend>) -> Self {
        Self { backend }
    }

    /// Current completion state across all stages.
    pub async fn probe(&self, item_id: &str, kind: ItemKind) -> StageStatus {
        match self.backend.status_check(item_id, kind).await {
            Ok(status) => {
                debug!(item_id = item_id, ?status, "Probed stage status");
                status
            }
            Err(e) => {
                warn!(
                    item_id = item_id,
                    "Status check failed, assuming nothing is done: {}", e
                );
                StageStatus::default()
            }
        }
    }

    /// Whether the backend judges a completed item's output as broken.
    pub async fn is_broken(&self, item_id: &str) -> bool {
        match self.backend.is_broken(item_id).await {
            Ok(broken) => broken,
            Err(e) => {
                warn!(
                    item_id = item_id,
                    "Breakage check failed, assuming not broken: {}", e
                );
                false
            }
        }
    }
}
