//! Single-item processor implementation.
//!
//! Drives one item's remote pipeline run:
//! - Probe which stages are already done
//! - Initiate the outstanding stages
//! - Consume the push-stream until a terminal signal, a timer or cancellation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::backend::{EventStream, InitiateRequest, PipelineBackend};
use crate::cancel::{CancellationController, ConnectionHandle};
use crate::events::{EventHandle, OrchestratorEvent};
use crate::item::{IdentifierMap, ProcessingUpdate, Stage, WorkItem};
use crate::metrics::{COMPLETIONS_BY_SOURCE, RUNS_FINISHED, RUNS_STARTED, RUN_DURATION, STREAM_EVENTS};
use crate::probe::StatusProbe;

use super::classify::{classify, ProgressUpdate, Signal};
use super::config::{FallbackPolicy, ProcessorConfig};
use super::types::{CompletionSource, ProcessError, ProcessorState, RunOutcome};

/// How a run ended before bookkeeping.
enum Terminal {
    Completed {
        persistent_id: Option<String>,
        source: CompletionSource,
        stages: Vec<Stage>,
    },
    Unresolved,
}

/// Runs the remote pipeline for one item at a time per id.
///
/// Cheap to share behind an `Arc`; all per-run state lives in the
/// connection registry and the update map.
pub struct ItemProcessor {
    backend: Arc<dyn PipelineBackend>,
    probe: StatusProbe,
    config: ProcessorConfig,
    events: EventHandle,
    controller: CancellationController,
    identifiers: IdentifierMap,
    updates: RwLock<HashMap<String, ProcessingUpdate>>,
}

impl ItemProcessor {
    /// Create a new processor.
    pub fn new(
        backend: Arc<dyn PipelineBackend>,
        config: ProcessorConfig,
        events: EventHandle,
        controller: CancellationController,
    ) -> Self {
        Self {
            probe: StatusProbe::new(Arc::clone(&backend)),
            backend,
            config,
            events,
            controller,
            identifiers: IdentifierMap::new(),
            updates: RwLock::new(HashMap::new()),
        }
    }

    /// Share an existing identifier map (e.g. with the repair path).
    pub fn with_identifiers(mut self, identifiers: IdentifierMap) -> Self {
        self.identifiers = identifiers;
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn probe(&self) -> &StatusProbe {
        &self.probe
    }

    pub fn identifier_map(&self) -> &IdentifierMap {
        &self.identifiers
    }

    /// Snapshot of every persistent id recorded so far.
    pub async fn identifiers(&self) -> HashMap<String, String> {
        self.identifiers.snapshot().await
    }

    /// The in-flight progress record for an item, if a run is live.
    pub async fn update(&self, item_id: &str) -> Option<ProcessingUpdate> {
        self.updates.read().await.get(item_id).cloned()
    }

    /// Whether a run for the item currently holds a connection.
    pub fn is_running(&self, item_id: &str) -> bool {
        self.controller.registry().contains(item_id)
    }

    /// Run the pipeline for an item in the controller's current scope.
    pub async fn process(&self, item: &WorkItem) -> Result<RunOutcome, ProcessError> {
        let scope = self.controller.token();
        self.process_with(item, &scope).await
    }

    /// Run the pipeline for an item within the given cancellation scope.
    ///
    /// A duplicate call while the item already has a live run resolves
    /// immediately with [`RunOutcome::AlreadyRunning`].
    pub async fn process_with(
        &self,
        item: &WorkItem,
        scope: &CancellationToken,
    ) -> Result<RunOutcome, ProcessError> {
        if scope.is_cancelled() {
            debug!(item_id = %item.id, "Scope already cancelled, not starting run");
            return Err(ProcessError::Cancelled);
        }

        let Some(handle) = self.controller.registry().register(&item.id, scope) else {
            debug!(item_id = %item.id, "Run already in flight, ignoring duplicate");
            return Ok(RunOutcome::AlreadyRunning);
        };

        RUNS_STARTED.inc();
        let started = Instant::now();
        info!(item_id = %item.id, kind = item.kind.as_str(), "Starting pipeline run");

        self.events.emit(OrchestratorEvent::ItemStarted {
            item_id: item.id.clone(),
            kind: item.kind,
        });
        self.set_update(
            &item.id,
            ProcessingUpdate::processing("checking", "Checking stage status"),
        )
        .await;

        let result = self.drive(item, &handle).await;
        // Release the connection slot before publishing the outcome.
        drop(handle);

        self.finish(item, result, started).await
    }

    /// Run the stages under the hard timeout and the connection's token.
    async fn drive(&self, item: &WorkItem, handle: &ConnectionHandle) -> Result<Terminal, ProcessError> {
        let token = handle.token().clone();
        let hard_timeout = self.config.hard_timeout();

        tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!(item_id = %handle.item_id(), "Connection closed, abandoning run");
                Err(ProcessError::Cancelled)
            }

            result = tokio::time::timeout(hard_timeout, self.run_stages(item, &token)) => {
                match result {
                    Ok(result) => result,
                    Err(_) => Err(ProcessError::Timeout(hard_timeout)),
                }
            }
        }
    }

    async fn run_stages(&self, item: &WorkItem, token: &CancellationToken) -> Result<Terminal, ProcessError> {
        self.transition(&item.id, ProcessorState::CheckingStatus);
        let status = self.probe.probe(&item.id, item.kind).await;

        let needed = status.needed_stages(self.config.limit_to_core_analysis);
        let mut stages = status.done_stages(false);
        stages.extend(needed.iter().copied());
        stages.sort();
        stages.dedup();

        self.transition(&item.id, ProcessorState::StepsComputed);
        debug!(item_id = %item.id, ?needed, "Computed needed stages");

        if needed.is_empty() {
            self.transition(&item.id, ProcessorState::AlreadyComplete);
            return Ok(Terminal::Completed {
                persistent_id: status.persistent_id,
                source: CompletionSource::AlreadyComplete,
                stages,
            });
        }

        self.transition(&item.id, ProcessorState::Initiating);
        self.modify_update(&item.id, |u| {
            u.status = "initiating".to_string();
            u.message = format!("Starting {} stage(s)", needed.len());
            u.stages = needed.clone();
        })
        .await;

        let request = InitiateRequest {
            item_id: item.id.clone(),
            url: item
                .source_url
                .clone()
                .unwrap_or_else(|| self.config.source_url_for(&item.id)),
            steps: needed,
            kind: item.kind,
        };
        let response = self.backend.initiate(&request).await?;

        if response.is_terminal() {
            self.transition(&item.id, ProcessorState::ImmediateComplete);
            return Ok(Terminal::Completed {
                persistent_id: response.persistent_id,
                source: CompletionSource::Immediate,
                stages,
            });
        }

        if token.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        self.transition(&item.id, ProcessorState::StreamingProgress);
        let stream = self
            .backend
            .stream_processing(&item.id, item.kind)
            .await
            .map_err(|e| ProcessError::Stream(e.to_string()))?;

        self.consume(item, stream, token, stages).await
    }

    /// Read the push-stream until a terminal signal or timer.
    async fn consume(
        &self,
        item: &WorkItem,
        mut stream: EventStream,
        token: &CancellationToken,
        stages: Vec<Stage>,
    ) -> Result<Terminal, ProcessError> {
        let fallback = tokio::time::sleep(self.config.fallback_timeout());
        tokio::pin!(fallback);

        // Armed once, on the first publish-pending update.
        let recheck = tokio::time::sleep(self.config.hard_timeout());
        tokio::pin!(recheck);
        let mut recheck_armed = false;
        let mut recheck_used = false;

        let mut publish_pending = false;

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => return Err(ProcessError::Cancelled),

                _ = &mut fallback => return self.on_fallback(item, stages).await,

                _ = &mut recheck, if recheck_armed => {
                    recheck_armed = false;
                    if let Some(terminal) = self.recheck_published(item, &stages).await {
                        return Ok(terminal);
                    }
                }

                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        let signal = classify(&event, &self.config.success_phrases);
                        STREAM_EVENTS.with_label_values(&[signal.label()]).inc();

                        match signal {
                            Signal::Completed(completion) => {
                                debug!(item_id = %item.id, event = %event.event_type, "Terminal event on stream");
                                return Ok(Terminal::Completed {
                                    persistent_id: completion.persistent_id,
                                    source: CompletionSource::Stream,
                                    stages,
                                });
                            }
                            Signal::Failed(reason) => return Err(ProcessError::Pipeline(reason)),
                            Signal::Progress(progress) => {
                                // Only events that carry a status move the publish state.
                                if progress.status.is_some() {
                                    publish_pending = progress.is_publish_pending();
                                }
                                if publish_pending && !recheck_used {
                                    recheck_used = true;
                                    recheck_armed = true;
                                    recheck
                                        .as_mut()
                                        .reset(tokio::time::Instant::now() + self.config.publish_recheck());
                                    debug!(item_id = %item.id, "Publishing from local copy, recheck armed");
                                }
                                self.apply_progress(&item.id, progress).await;
                            }
                            Signal::Ignored => {
                                trace!(item_id = %item.id, event = %event.event_type, "Ignoring stream event");
                            }
                        }
                    }
                    Some(Err(e)) if e.is_malformed_event() => {
                        STREAM_EVENTS.with_label_values(&["malformed"]).inc();
                        warn!(item_id = %item.id, "Ignoring malformed stream event: {}", e);
                    }
                    Some(Err(e)) => return self.on_stream_drop(item, publish_pending, e.to_string(), stages),
                    None => {
                        return self.on_stream_drop(
                            item,
                            publish_pending,
                            "stream ended without a terminal event".to_string(),
                            stages,
                        )
                    }
                },
            }
        }
    }

    /// Re-probe after sitting in the publish-pending state.
    async fn recheck_published(&self, item: &WorkItem, stages: &[Stage]) -> Option<Terminal> {
        let status = self.probe.probe(&item.id, item.kind).await;
        if status.has_published_copy {
            info!(item_id = %item.id, "Publish recheck found a persisted copy");
            Some(Terminal::Completed {
                persistent_id: status.persistent_id,
                source: CompletionSource::PublishRecheck,
                stages: stages.to_vec(),
            })
        } else {
            debug!(item_id = %item.id, "Publish recheck found nothing yet, still waiting");
            None
        }
    }

    async fn on_fallback(&self, item: &WorkItem, stages: Vec<Stage>) -> Result<Terminal, ProcessError> {
        match self.config.fallback_policy {
            FallbackPolicy::Unresolved => {
                warn!(
                    item_id = %item.id,
                    "No terminal event after {:?}, leaving run unresolved",
                    self.config.fallback_timeout()
                );
                Ok(Terminal::Unresolved)
            }
            FallbackPolicy::AssumeSuccess => {
                let last = self.update(&item.id).await;
                warn!(
                    item_id = %item.id,
                    last_status = last.as_ref().map(|u| u.status.as_str()).unwrap_or("none"),
                    "No terminal event after {:?}, assuming success",
                    self.config.fallback_timeout()
                );
                // Any payload carrying an id is already terminal, so an
                // assumed success never has one.
                Ok(Terminal::Completed {
                    persistent_id: None,
                    source: CompletionSource::Fallback,
                    stages,
                })
            }
        }
    }

    fn on_stream_drop(
        &self,
        item: &WorkItem,
        publish_pending: bool,
        reason: String,
        stages: Vec<Stage>,
    ) -> Result<Terminal, ProcessError> {
        if publish_pending {
            warn!(
                item_id = %item.id,
                "Stream dropped while publishing from local copy, assuming success: {}", reason
            );
            Ok(Terminal::Completed {
                persistent_id: None,
                source: CompletionSource::StreamDropAssumed,
                stages,
            })
        } else {
            Err(ProcessError::Stream(reason))
        }
    }

    async fn apply_progress(&self, item_id: &str, progress: ProgressUpdate) {
        let update = self
            .modify_update(item_id, |u| {
                if let Some(status) = progress.status {
                    u.status = status;
                }
                if let Some(message) = progress.message {
                    u.message = message;
                }
                if progress.stage.is_some() {
                    u.stage = progress.stage;
                }
                if progress.percent.is_some() {
                    u.percent = progress.percent;
                }
            })
            .await;

        if let Some(update) = update {
            self.events.emit(OrchestratorEvent::ItemProgress {
                item_id: item_id.to_string(),
                update,
            });
        }
    }

    /// Publish the outcome and evict the run's progress record.
    async fn finish(
        &self,
        item: &WorkItem,
        result: Result<Terminal, ProcessError>,
        started: Instant,
    ) -> Result<RunOutcome, ProcessError> {
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(Terminal::Completed {
                persistent_id,
                source,
                stages,
            }) => {
                self.transition(&item.id, ProcessorState::Completed);
                let analysis_complete = stages.contains(&Stage::Analysis);

                let mut update = ProcessingUpdate::complete("Processing complete", stages.clone());
                update.transaction_id = persistent_id.clone();
                self.events.emit(OrchestratorEvent::ItemProgress {
                    item_id: item.id.clone(),
                    update,
                });
                self.events.emit(OrchestratorEvent::ItemCompleted {
                    item_id: item.id.clone(),
                    stages,
                    analysis_complete,
                    persistent_id: persistent_id.clone(),
                    source,
                });

                if let Some(pid) = &persistent_id {
                    self.identifiers.record(&item.id, pid).await;
                    self.events.emit(OrchestratorEvent::IdentifierAssigned {
                        item_id: item.id.clone(),
                        persistent_id: pid.clone(),
                    });
                }

                self.evict_update(&item.id).await;

                let outcome = if source == CompletionSource::AlreadyComplete {
                    "already_complete"
                } else {
                    "completed"
                };
                RUNS_FINISHED.with_label_values(&[outcome]).inc();
                RUN_DURATION.with_label_values(&[outcome]).observe(elapsed);
                COMPLETIONS_BY_SOURCE
                    .with_label_values(&[source.as_str()])
                    .inc();

                info!(
                    item_id = %item.id,
                    source = source.as_str(),
                    persistent_id = persistent_id.as_deref().unwrap_or("-"),
                    "Pipeline run completed"
                );

                Ok(RunOutcome::Completed {
                    persistent_id,
                    source,
                })
            }
            Ok(Terminal::Unresolved) => {
                self.transition(&item.id, ProcessorState::Unresolved);
                let last_update = self.evict_update(&item.id).await;
                self.events.emit(OrchestratorEvent::ItemUnresolved {
                    item_id: item.id.clone(),
                    last_update: last_update.clone(),
                });

                RUNS_FINISHED.with_label_values(&["unresolved"]).inc();
                RUN_DURATION.with_label_values(&["unresolved"]).observe(elapsed);

                Ok(RunOutcome::Unresolved { last_update })
            }
            Err(ProcessError::Cancelled) => {
                self.transition(&item.id, ProcessorState::Cancelled);
                self.evict_update(&item.id).await;
                self.events.emit(OrchestratorEvent::ItemCancelled {
                    item_id: item.id.clone(),
                });

                RUNS_FINISHED.with_label_values(&["cancelled"]).inc();
                info!(item_id = %item.id, "Pipeline run cancelled");

                Err(ProcessError::Cancelled)
            }
            Err(e) => {
                self.transition(&item.id, ProcessorState::Failed);
                self.evict_update(&item.id).await;
                self.events.emit(OrchestratorEvent::ItemProgress {
                    item_id: item.id.clone(),
                    update: ProcessingUpdate::error(e.to_string()),
                });
                self.events.emit(OrchestratorEvent::ItemFailed {
                    item_id: item.id.clone(),
                    reason: e.to_string(),
                    repair: false,
                });

                RUNS_FINISHED.with_label_values(&[e.outcome()]).inc();
                RUN_DURATION.with_label_values(&[e.outcome()]).observe(elapsed);
                error!(item_id = %item.id, "Pipeline run failed: {}", e);

                Err(e)
            }
        }
    }

    fn transition(&self, item_id: &str, state: ProcessorState) {
        debug!(item_id = item_id, state = %state, "Processor state transition");
    }

    async fn set_update(&self, item_id: &str, update: ProcessingUpdate) {
        self.updates
            .write()
            .await
            .insert(item_id.to_string(), update.clone());
        self.events.emit(OrchestratorEvent::ItemProgress {
            item_id: item_id.to_string(),
            update,
        });
    }

    /// Mutate the live update, returning the new value.
    async fn modify_update<F>(&self, item_id: &str, f: F) -> Option<ProcessingUpdate>
    where
        F: FnOnce(&mut ProcessingUpdate),
    {
        let mut updates = self.updates.write().await;
        let update = updates.get_mut(item_id)?;
        f(update);
        update.updated_at = chrono::Utc::now();
        Some(update.clone())
    }

    async fn evict_update(&self, item_id: &str) -> Option<ProcessingUpdate> {
        self.updates.write().await.remove(item_id)
    }
}
