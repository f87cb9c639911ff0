//! Concurrent scheduler implementation.
//!
//! Runs in rounds:
//! - Discovery: page through the catalog and queue actionable items
//! - Execution: keep up to `max_concurrent` runs in flight until the queue drains
//! - Repeat until a discovery round finds nothing or the controller is stopped

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::WorkCatalog;
use crate::cancel::{ActiveCounter, CancellationController};
use crate::events::{EventHandle, OrchestratorEvent, ProgressCounters};
use crate::metrics::DISCOVERY_ROUNDS;
use crate::processor::{CompletionSource, ItemProcessor, ProcessError, RunOutcome};
use crate::repair::{RepairError, RepairOutcome, Repairer};

use super::config::SchedulerConfig;
use super::discovery::Discovery;
use super::types::{Candidate, RunSummary, SchedulerError, SchedulerStatus};

/// Pool name used for metrics and progress events.
pub const PROCESSING_POOL: &str = "processing";

/// Result of one launched task.
enum Finished {
    Process(Result<RunOutcome, ProcessError>),
    Repair(Result<RepairOutcome, RepairError>),
}

#[derive(Debug, Default)]
struct SchedulerState {
    round: u32,
    queued: usize,
    handled: HashSet<String>,
    counters: ProgressCounters,
}

/// Discovers pending and broken items and processes them in a bounded pool.
pub struct ConcurrentScheduler {
    config: SchedulerConfig,
    discovery: Discovery,
    processor: Arc<ItemProcessor>,
    repairer: Repairer,
    events: EventHandle,
    controller: CancellationController,
    active: ActiveCounter,

    // Runtime state
    running: AtomicBool,
    state: RwLock<SchedulerState>,
}

impl ConcurrentScheduler {
    /// Create a new scheduler.
    pub fn new(
        config: SchedulerConfig,
        catalog: Arc<dyn WorkCatalog>,
        processor: Arc<ItemProcessor>,
        repairer: Repairer,
        events: EventHandle,
        controller: CancellationController,
    ) -> Self {
        let active = ActiveCounter::new(PROCESSING_POOL);
        controller.register_counter(active.clone());

        let discovery = Discovery {
            catalog,
            probe: processor.probe().clone(),
            registry: controller.registry().clone(),
            config: config.clone(),
            limit_to_core_analysis: processor.config().limit_to_core_analysis,
        };

        Self {
            config,
            discovery,
            processor,
            repairer,
            events,
            controller,
            active,
            running: AtomicBool::new(false),
            state: RwLock::new(SchedulerState::default()),
        }
    }

    /// Get current scheduler status.
    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.read().await;
        let active = self.active.get();
        let mut counters = state.counters;
        counters.active = active as u64;

        SchedulerStatus {
            running: self.running.load(Ordering::Relaxed),
            round: state.round,
            active,
            peak_active: self.active.peak(),
            queued: state.queued,
            handled: state.handled.len(),
            counters,
        }
    }

    /// Forget which items were handled, so the next run reconsiders them all.
    pub async fn reset_handled(&self) {
        let mut state = self.state.write().await;
        let forgotten = state.handled.len();
        state.handled.clear();
        debug!("Forgot {} handled items", forgotten);
    }

    /// Run discovery and execution rounds until there is nothing left to do
    /// or the controller is stopped.
    ///
    /// Per-item failures are counted, never returned.
    pub async fn run(&self) -> Result<RunSummary, SchedulerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return Err(SchedulerError::AlreadyRunning);
        }

        let scope = self.controller.token();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(
            run_id = %run_id,
            "Starting scheduler: limit {}, batch {}, page size {}",
            self.config.max_concurrent, self.config.batch_size, self.config.page_size
        );

        let mut summary = self.run_rounds(&scope).await;
        summary.run_id = run_id;
        self.running.store(false, Ordering::SeqCst);

        info!(
            run_id = %summary.run_id,
            "Scheduler finished after {} rounds: {} completed, {} skipped, {} failed, {} unresolved{}",
            summary.rounds,
            summary.counters.completed,
            summary.counters.skipped,
            summary.counters.failed,
            summary.counters.unresolved,
            if summary.cancelled { " (stopped)" } else { "" }
        );
        Ok(summary)
    }

    async fn run_rounds(&self, scope: &CancellationToken) -> RunSummary {
        let mut rounds = 0;

        while !scope.is_cancelled() {
            rounds += 1;
            DISCOVERY_ROUNDS.inc();

            let report = {
                let mut state = self.state.write().await;
                state.round = rounds;
                // The handled set is only touched by this task while running.
                let mut handled = std::mem::take(&mut state.handled);
                drop(state);

                let report = self.discovery.collect(&mut handled, scope).await;

                let mut state = self.state.write().await;
                state.handled.extend(handled);
                state.counters.discovered += report.candidates.len() as u64;
                state.counters.skipped += report.skipped;
                report
            };

            if report.candidates.is_empty() {
                info!("Round {} found nothing to do, halting", rounds);
                break;
            }
            info!("Round {}: {} candidates", rounds, report.candidates.len());
            self.publish_progress().await;

            self.execute(report.candidates, scope).await;
            self.publish_progress().await;
        }

        let state = self.state.read().await;
        RunSummary {
            run_id: String::new(),
            rounds,
            counters: state.counters,
            cancelled: scope.is_cancelled(),
        }
    }

    /// Drain the candidate queue through the bounded pool.
    async fn execute(&self, candidates: Vec<Candidate>, scope: &CancellationToken) {
        let mut queue: VecDeque<Candidate> = candidates.into();
        let mut tasks: JoinSet<(String, Finished)> = JoinSet::new();

        loop {
            while !queue.is_empty() {
                if scope.is_cancelled() {
                    break;
                }
                let Some(guard) = self.active.try_acquire(self.config.max_concurrent) else {
                    break;
                };
                let Some(candidate) = queue.pop_front() else {
                    break;
                };

                debug!(
                    item_id = candidate.item_id(),
                    repair = candidate.is_repair(),
                    "Launching run"
                );
                let processor = Arc::clone(&self.processor);
                let repairer = self.repairer.clone();
                let scope = scope.clone();
                tasks.spawn(async move {
                    let _guard = guard;
                    match candidate {
                        Candidate::Process(item) => {
                            let result = processor.process_with(&item, &scope).await;
                            (item.id, Finished::Process(result))
                        }
                        Candidate::Repair(item) => {
                            let result = repairer.repair(&item.id, &scope).await;
                            (item.id, Finished::Repair(result))
                        }
                    }
                });
            }
            self.state.write().await.queued = queue.len();

            if scope.is_cancelled() || (queue.is_empty() && tasks.is_empty()) {
                break;
            }

            tokio::select! {
                biased;
                _ = scope.cancelled() => break,
                Some(joined) = tasks.join_next() => self.record(joined).await,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        if !queue.is_empty() {
            warn!("Stopped with {} candidates not launched", queue.len());
        }
        self.state.write().await.queued = 0;

        // Running items settle on their own once the scope is cancelled.
        while let Some(joined) = tasks.join_next().await {
            self.record(joined).await;
        }
    }

    async fn record(&self, joined: Result<(String, Finished), JoinError>) {
        {
            let mut state = self.state.write().await;
            let counters = &mut state.counters;

            match joined {
                Ok((_, Finished::Process(Ok(outcome)))) => match outcome {
                    RunOutcome::Completed {
                        source: CompletionSource::AlreadyComplete,
                        ..
                    }
                    | RunOutcome::AlreadyRunning => counters.skipped += 1,
                    RunOutcome::Completed { .. } => counters.completed += 1,
                    RunOutcome::Unresolved { .. } => counters.unresolved += 1,
                },
                Ok((_, Finished::Process(Err(ProcessError::Cancelled)))) => counters.cancelled += 1,
                Ok((_, Finished::Process(Err(_)))) => counters.failed += 1,
                Ok((_, Finished::Repair(Ok(_)))) => counters.repaired += 1,
                Ok((_, Finished::Repair(Err(RepairError::Cancelled)))) => counters.cancelled += 1,
                Ok((_, Finished::Repair(Err(RepairError::AlreadyRunning(_))))) => counters.skipped += 1,
                Ok((_, Finished::Repair(Err(_)))) => counters.repair_failed += 1,
                Err(e) => {
                    error!("Scheduler task panicked: {}", e);
                    counters.failed += 1;
                }
            }
        }

        self.publish_progress().await;
    }

    async fn publish_progress(&self) {
        let status = self.status().await;
        self.events.emit(OrchestratorEvent::SchedulerProgress {
            pool: PROCESSING_POOL.to_string(),
            text: status.text(),
            counters: status.counters,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CancellationConfig;
    use crate::item::{IdentifierMap, StageStatus};
    use crate::processor::ProcessorConfig;
    use crate::testing::{fixtures, MockBackend, MockCatalog};

    struct Harness {
        backend: Arc<MockBackend>,
        catalog: Arc<MockCatalog>,
        scheduler: ConcurrentScheduler,
    }

    fn harness(items: Vec<crate::item::WorkItem>, config: SchedulerConfig) -> Harness {
        let backend = Arc::new(MockBackend::new());
        let catalog = Arc::new(MockCatalog::with_items(items));
        let events = EventHandle::default();
        let controller = CancellationController::from_config(&CancellationConfig::default());
        let identifiers = IdentifierMap::new();

        let processor = Arc::new(
            ItemProcessor::new(
                backend.clone(),
                ProcessorConfig::default(),
                events.clone(),
                controller.clone(),
            )
            .with_identifiers(identifiers.clone()),
        );
        let repairer = Repairer::new(backend.clone(), events.clone(), controller.clone(), identifiers, true);
        let scheduler = ConcurrentScheduler::new(config, catalog.clone(), processor, repairer, events, controller);

        Harness {
            backend,
            catalog,
            scheduler,
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval_ms: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_catalog_halts_after_one_round() {
        let h = harness(vec![], fast_config());
        let summary = h.scheduler.run().await.unwrap();

        assert_eq!(summary.rounds, 1);
        assert_eq!(summary.counters.discovered, 0);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn test_complete_items_are_skipped_without_initiate() {
        let h = harness(fixtures::pending_items(3), fast_config());
        for i in 1..=3 {
            h.backend
                .set_status(&format!("doc-{}", i), StageStatus::all_done())
                .await;
        }

        let summary = h.scheduler.run().await.unwrap();
        assert_eq!(summary.counters.skipped, 3);
        assert_eq!(summary.counters.discovered, 0);
        assert_eq!(h.backend.call_count("initiate").await, 0);
    }

    #[tokio::test]
    async fn test_processing_items_are_not_picked_up() {
        let mut busy = fixtures::pending_item("doc-1");
        busy.transient_status = Some(crate::item::TransientStatus::Processing);
        let h = harness(vec![busy, fixtures::pending_item("doc-2")], fast_config());

        let summary = h.scheduler.run().await.unwrap();
        assert_eq!(summary.counters.completed, 1);
        assert_eq!(h.backend.call_count("initiate").await, 1);
    }

    #[tokio::test]
    async fn test_broken_items_are_repaired() {
        let h = harness(
            vec![
                fixtures::hollow_ready_item("doc-1"),
                fixtures::hollow_ready_item("doc-2"),
            ],
            fast_config(),
        );
        h.backend.set_broken("doc-1", true).await;

        let summary = h.scheduler.run().await.unwrap();
        assert_eq!(summary.counters.repaired, 1);
        assert_eq!(summary.counters.skipped, 1);
        assert_eq!(h.backend.call_count("repair").await, 1);
        assert_eq!(h.backend.call_count("stream_processing").await, 0);
    }

    #[tokio::test]
    async fn test_batches_span_multiple_rounds() {
        let config = SchedulerConfig {
            batch_size: 2,
            page_size: 2,
            poll_interval_ms: 5,
            ..Default::default()
        };
        let h = harness(fixtures::pending_items(5), config);

        let summary = h.scheduler.run().await.unwrap();
        assert_eq!(summary.counters.completed, 5);
        // Three rounds with work plus the final empty one.
        assert_eq!(summary.rounds, 4);
        assert!(h.catalog.requested_pages().await.len() >= 4);
    }

    #[tokio::test]
    async fn test_catalog_error_ends_discovery() {
        let h = harness(fixtures::pending_items(2), fast_config());
        h.catalog
            .fail_next(crate::backend::BackendError::Timeout)
            .await;

        let summary = h.scheduler.run().await.unwrap();
        assert_eq!(summary.rounds, 1);
        assert_eq!(summary.counters.completed, 0);

        // The next run sees the catalog again.
        let summary = h.scheduler.run().await.unwrap();
        assert_eq!(summary.counters.completed, 2);
    }

    #[tokio::test]
    async fn test_reset_handled_allows_reprocessing() {
        let h = harness(fixtures::pending_items(1), fast_config());
        h.scheduler.run().await.unwrap();
        assert_eq!(h.scheduler.status().await.handled, 1);

        h.scheduler.reset_handled().await;
        assert_eq!(h.scheduler.status().await.handled, 0);
        h.scheduler.run().await.unwrap();
        assert_eq!(h.backend.call_count("initiate").await, 2);
    }
}
