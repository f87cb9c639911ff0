//! Repair path and the staggered repair pool.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, PipelineBackend};
use crate::cancel::{ActiveCounter, CancellationController};
use crate::events::{EventHandle, OrchestratorEvent, ProgressCounters};
use crate::item::IdentifierMap;
use crate::metrics::REPAIRS;

use super::config::RepairConfig;
use super::types::{RepairError, RepairOutcome, RepairSummary};

/// Pool name used for metrics and progress events.
pub const REPAIR_POOL: &str = "repair";

/// One-shot repair of a single item.
///
/// Shared by the repair pool and by the processing scheduler for items that
/// discovery flags as broken.
#[derive(Clone)]
pub struct Repairer {
    backend: Arc<dyn PipelineBackend>,
    events: EventHandle,
    controller: CancellationController,
    identifiers: IdentifierMap,
    force_update: bool,
}

impl Repairer {
    pub fn new(
        backend: Arc<dyn PipelineBackend>,
        events: EventHandle,
        controller: CancellationController,
        identifiers: IdentifierMap,
        force_update: bool,
    ) -> Self {
        Self {
            backend,
            events,
            controller,
            identifiers,
            force_update,
        }
    }

    pub fn backend(&self) -> &Arc<dyn PipelineBackend> {
        &self.backend
    }

    /// Ask the backend to rebuild an item's output.
    pub async fn repair(&self, item_id: &str, scope: &CancellationToken) -> Result<RepairOutcome, RepairError> {
        if scope.is_cancelled() {
            return Err(RepairError::Cancelled);
        }
        let Some(handle) = self.controller.registry().register(item_id, scope) else {
            debug!(item_id = item_id, "Run already in flight, skipping repair");
            return Err(RepairError::AlreadyRunning(item_id.to_string()));
        };

        info!(item_id = item_id, force_update = self.force_update, "Repairing item");

        let result = tokio::select! {
            biased;
            _ = handle.token().cancelled() => Err(RepairError::Cancelled),
            result = self.backend.repair(item_id, self.force_update) => match result {
                Ok(response) if response.is_success() => Ok(RepairOutcome {
                    persistent_id: response.persistent_id,
                    message: response.message,
                }),
                Ok(response) => Err(RepairError::Rejected(if response.message.is_empty() {
                    format!("status {}", response.status)
                } else {
                    response.message
                })),
                Err(e) => Err(RepairError::Backend(e)),
            },
        };
        drop(handle);

        match &result {
            Ok(outcome) => {
                REPAIRS.with_label_values(&["success"]).inc();
                if let Some(pid) = &outcome.persistent_id {
                    self.identifiers.record(item_id, pid).await;
                }
                self.events.emit(OrchestratorEvent::RepairCompleted {
                    item_id: item_id.to_string(),
                    persistent_id: outcome.persistent_id.clone(),
                });
                if let Some(pid) = &outcome.persistent_id {
                    self.events.emit(OrchestratorEvent::IdentifierAssigned {
                        item_id: item_id.to_string(),
                        persistent_id: pid.clone(),
                    });
                }
                info!(item_id = item_id, "Repair succeeded");
            }
            Err(RepairError::Cancelled) => {
                self.events.emit(OrchestratorEvent::ItemCancelled {
                    item_id: item_id.to_string(),
                });
                debug!(item_id = item_id, "Repair cancelled");
            }
            Err(e) => {
                REPAIRS.with_label_values(&["failed"]).inc();
                self.events.emit(OrchestratorEvent::ItemFailed {
                    item_id: item_id.to_string(),
                    reason: e.to_string(),
                    repair: true,
                });
                error!(item_id = item_id, "Repair failed: {}", e);
            }
        }

        result
    }
}

/// Bounded, staggered pool of repairs, independent of the processing pool.
pub struct RepairScheduler {
    repairer: Repairer,
    config: RepairConfig,
    controller: CancellationController,
    events: EventHandle,
    active: ActiveCounter,
}

impl RepairScheduler {
    /// Create a new repair scheduler.
    pub fn new(repairer: Repairer, config: RepairConfig, events: EventHandle, controller: CancellationController) -> Self {
        let active = ActiveCounter::new(REPAIR_POOL);
        controller.register_counter(active.clone());

        Self {
            repairer,
            config,
            controller,
            events,
            active,
        }
    }

    /// Repairs currently in flight.
    pub fn active(&self) -> usize {
        self.active.get()
    }

    /// Most repairs ever in flight at once.
    pub fn peak_active(&self) -> usize {
        self.active.peak()
    }

    /// Query the backend for broken items and repair them all.
    pub async fn sweep(&self) -> Result<RepairSummary, BackendError> {
        let ids = self.repairer.backend().find_broken().await?;
        info!("Found {} broken items", ids.len());
        Ok(self.run(ids).await)
    }

    /// Repair the given items.
    ///
    /// Keeps at most `max_concurrent` repairs in flight, waits `stagger`
    /// between consecutive launches, and stops launching once the
    /// controller is stopped. Repairs already in flight are left to settle.
    pub async fn run(&self, ids: Vec<String>) -> RepairSummary {
        let scope = self.controller.token();

        let mut seen = HashSet::new();
        let mut remaining: VecDeque<String> = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
        let mut summary = RepairSummary {
            requested: remaining.len(),
            ..Default::default()
        };

        if remaining.is_empty() {
            return summary;
        }
        info!(
            "Starting repair pool: {} items, limit {}, stagger {:?}",
            remaining.len(),
            self.config.max_concurrent,
            self.config.stagger()
        );

        let mut tasks: JoinSet<(String, Result<RepairOutcome, RepairError>)> = JoinSet::new();
        let mut last_launch: Option<Instant> = None;

        'pool: loop {
            while !remaining.is_empty() && self.active.get() < self.config.max_concurrent {
                if let Some(last) = last_launch {
                    let next = last + self.config.stagger();
                    if Instant::now() < next {
                        tokio::select! {
                            biased;
                            _ = scope.cancelled() => break 'pool,
                            _ = tokio::time::sleep_until(next) => {}
                        }
                    }
                }
                if scope.is_cancelled() {
                    break 'pool;
                }
                let Some(guard) = self.active.try_acquire(self.config.max_concurrent) else {
                    break;
                };
                let Some(item_id) = remaining.pop_front() else {
                    break;
                };

                last_launch = Some(Instant::now());
                let repairer = self.repairer.clone();
                let scope = scope.clone();
                tasks.spawn(async move {
                    let _guard = guard;
                    let result = repairer.repair(&item_id, &scope).await;
                    (item_id, result)
                });
            }

            if remaining.is_empty() && tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = scope.cancelled() => break,
                Some(joined) = tasks.join_next() => {
                    self.record(&mut summary, joined);
                }
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        summary.not_started = remaining.len();
        if scope.is_cancelled() {
            warn!("Repair pool stopped with {} items not started", summary.not_started);
        }

        // In-flight repairs observe the cancelled scope on their own.
        while let Some(joined) = tasks.join_next().await {
            self.record(&mut summary, joined);
        }

        info!(
            "Repair pool finished: {} repaired, {} failed, {} cancelled, {} not started",
            summary.repaired, summary.failed, summary.cancelled, summary.not_started
        );
        summary
    }

    fn record(
        &self,
        summary: &mut RepairSummary,
        joined: Result<(String, Result<RepairOutcome, RepairError>), tokio::task::JoinError>,
    ) {
        match joined {
            Ok((_, Ok(_))) => summary.repaired += 1,
            Ok((_, Err(RepairError::Cancelled))) => summary.cancelled += 1,
            Ok((_, Err(RepairError::AlreadyRunning(_)))) => summary.skipped += 1,
            Ok((_, Err(_))) => summary.failed += 1,
            Err(e) => {
                error!("Repair task panicked: {}", e);
                summary.failed += 1;
            }
        }

        let counters = ProgressCounters {
            discovered: summary.requested as u64,
            repaired: summary.repaired as u64,
            repair_failed: summary.failed as u64,
            cancelled: summary.cancelled as u64,
            skipped: summary.skipped as u64,
            active: self.active.get() as u64,
            ..Default::default()
        };
        self.events.emit(OrchestratorEvent::SchedulerProgress {
            pool: REPAIR_POOL.to_string(),
            text: format!(
                "Repaired {}/{} ({} failed)",
                summary.repaired, summary.requested, summary.failed
            ),
            counters,
        });
    }
}
