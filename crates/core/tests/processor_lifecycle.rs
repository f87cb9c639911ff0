//! Single-item processor lifecycle tests.
//!
//! These drive one item at a time against the mock backend and check the
//! outcome together with what a host would see through the event stream:
//! probe -> initiate -> stream -> completed / unresolved / failed / cancelled

use std::sync::Arc;
use std::time::Duration;

use docflow_core::{
    testing::{fixtures, EventRecorder, MockBackend, StreamStep},
    BackendError, CancellationController, CompletionSource, EventHandle, FallbackPolicy,
    ItemProcessor, ItemStatus, OrchestratorEvent, ProcessError, ProcessorConfig, RawEvent,
    RunOutcome, StageStatus, TransientStatus, UpdateType,
};
use serde_json::json;

/// Test helper wiring a processor to the mock backend.
struct TestHarness {
    backend: Arc<MockBackend>,
    events: EventHandle,
    controller: CancellationController,
}

impl TestHarness {
    fn new() -> Self {
        Self {
            backend: Arc::new(MockBackend::new()),
            events: EventHandle::new(256),
            controller: CancellationController::new(Duration::from_millis(50)),
        }
    }

    fn processor(&self, config: ProcessorConfig) -> Arc<ItemProcessor> {
        Arc::new(ItemProcessor::new(
            self.backend.clone(),
            config,
            self.events.clone(),
            self.controller.clone(),
        ))
    }

    /// Processor with generous timers, so only the stream decides.
    fn default_processor(&self) -> Arc<ItemProcessor> {
        self.processor(fixtures::processor_config(5_000, 2_000, 1_000))
    }

    fn recorder(&self, ids: &[&str]) -> EventRecorder {
        EventRecorder::with_items(
            &self.events,
            ids.iter().map(|id| fixtures::pending_item(id)).collect(),
        )
    }
}

fn has_event(events: &[OrchestratorEvent], name: &str, item_id: &str) -> bool {
    events
        .iter()
        .any(|e| e.name() == name && e.item_id() == Some(item_id))
}

#[tokio::test]
async fn test_streamed_run_completes_item() {
    let harness = TestHarness::new();
    let recorder = harness.recorder(&["doc-1"]);
    harness
        .backend
        .set_stream(
            "doc-1",
            vec![
                fixtures::progress_step(50),
                StreamStep::delay_ms(10),
                fixtures::complete_step(Some("X")),
            ],
        )
        .await;

    let processor = harness.default_processor();
    let outcome = processor
        .process(&fixtures::pending_item("doc-1"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Completed {
            persistent_id: Some("X".to_string()),
            source: CompletionSource::Stream,
        }
    );

    assert!(
        recorder
            .wait_for(Duration::from_secs(1), |events| has_event(
                events,
                "identifier_assigned",
                "doc-1"
            ))
            .await
    );

    let item = recorder.item("doc-1").await.unwrap();
    assert_eq!(item.status, ItemStatus::Ready);
    assert!(item.analysis_complete);
    assert_eq!(item.persistent_id.as_deref(), Some("X"));
    assert_eq!(item.transient_status, None);

    // The 50% update reached the host before the completion
    let progress: Vec<_> = recorder
        .events_for("doc-1")
        .await
        .into_iter()
        .filter_map(|e| match e {
            OrchestratorEvent::ItemProgress { update, .. } => Some(update),
            _ => None,
        })
        .collect();
    assert!(progress.iter().any(|u| u.percent == Some(50)));
    assert_eq!(
        progress.last().map(|u| u.update_type),
        Some(UpdateType::Complete)
    );

    // Progress records are evicted once the run is over
    assert!(processor.update("doc-1").await.is_none());
    assert_eq!(
        processor.identifier_map().get("doc-1").await.as_deref(),
        Some("X")
    );
}

#[tokio::test]
async fn test_already_complete_item_skips_backend_work() {
    let harness = TestHarness::new();
    let recorder = harness.recorder(&["doc-2"]);
    harness
        .backend
        .set_status("doc-2", StageStatus::all_done())
        .await;

    let outcome = harness
        .default_processor()
        .process(&fixtures::pending_item("doc-2"))
        .await
        .unwrap();

    assert_eq!(outcome.source(), Some(CompletionSource::AlreadyComplete));
    assert_eq!(harness.backend.call_count("initiate").await, 0);
    assert_eq!(harness.backend.call_count("stream_processing").await, 0);

    assert!(
        recorder
            .wait_for(Duration::from_secs(1), |events| has_event(
                events,
                "item_completed",
                "doc-2"
            ))
            .await
    );
    let completed_update = recorder
        .events_for("doc-2")
        .await
        .into_iter()
        .find_map(|e| match e {
            OrchestratorEvent::ItemProgress { update, .. }
                if update.update_type == UpdateType::Complete =>
            {
                Some(update)
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(completed_update.status, "completed");
    assert_eq!(
        recorder.item("doc-2").await.unwrap().status,
        ItemStatus::Ready
    );
}

#[tokio::test]
async fn test_duplicate_process_call_is_a_noop() {
    let harness = TestHarness::new();
    harness
        .backend
        .set_stream(
            "doc-1",
            vec![StreamStep::delay_ms(100), fixtures::complete_step(None)],
        )
        .await;

    let processor = harness.default_processor();
    let item = fixtures::pending_item("doc-1");

    let first = tokio::spawn({
        let processor = Arc::clone(&processor);
        let item = item.clone();
        async move { processor.process(&item).await }
    });

    // Let the first run claim the connection
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(processor.is_running("doc-1"));

    let second = processor.process(&item).await.unwrap();
    assert_eq!(second, RunOutcome::AlreadyRunning);

    let first = first.await.unwrap().unwrap();
    assert!(first.is_completed());
    assert_eq!(harness.backend.call_count("stream_processing").await, 1);
    assert_eq!(harness.backend.call_count("initiate").await, 1);
    assert!(!processor.is_running("doc-1"));
}

#[tokio::test]
async fn test_publish_pending_recheck_completes_from_probe() {
    let harness = TestHarness::new();
    harness
        .backend
        .set_statuses(
            "doc-3",
            vec![
                StageStatus::default(),
                StageStatus {
                    has_published_copy: true,
                    persistent_id: Some("pub-9".to_string()),
                    ..StageStatus::all_done()
                },
            ],
        )
        .await;
    harness
        .backend
        .set_stream(
            "doc-3",
            vec![
                StreamStep::event(fixtures::publish_pending_event()),
                StreamStep::Hang,
            ],
        )
        .await;

    let processor = harness.processor(fixtures::processor_config(5_000, 2_000, 50));
    let outcome = processor
        .process(&fixtures::pending_item("doc-3"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Completed {
            persistent_id: Some("pub-9".to_string()),
            source: CompletionSource::PublishRecheck,
        }
    );
    // One probe up front, exactly one recheck
    assert_eq!(harness.backend.call_count("status_check").await, 2);
}

#[tokio::test]
async fn test_publish_recheck_fires_only_once() {
    let harness = TestHarness::new();
    harness
        .backend
        .set_stream(
            "doc-3",
            vec![
                StreamStep::event(fixtures::publish_pending_event()),
                StreamStep::delay_ms(120),
                StreamStep::event(fixtures::publish_pending_event()),
                StreamStep::Hang,
            ],
        )
        .await;

    let processor = harness.processor(fixtures::processor_config(5_000, 300, 30));
    let outcome = processor
        .process(&fixtures::pending_item("doc-3"))
        .await
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Unresolved { .. }));
    assert_eq!(harness.backend.call_count("status_check").await, 2);
}

#[tokio::test]
async fn test_fallback_leaves_run_unresolved_by_default() {
    let harness = TestHarness::new();
    let recorder = harness.recorder(&["doc-4"]);
    harness
        .backend
        .set_stream("doc-4", vec![fixtures::progress_step(40), StreamStep::Hang])
        .await;

    let processor = harness.processor(fixtures::processor_config(5_000, 60, 1_000));
    let outcome = processor
        .process(&fixtures::pending_item("doc-4"))
        .await
        .unwrap();

    match outcome {
        RunOutcome::Unresolved { last_update } => {
            assert_eq!(last_update.unwrap().percent, Some(40));
        }
        other => panic!("expected unresolved run, got {:?}", other),
    }

    assert!(
        recorder
            .wait_for(Duration::from_secs(1), |events| has_event(
                events,
                "item_unresolved",
                "doc-4"
            ))
            .await
    );
    let item = recorder.item("doc-4").await.unwrap();
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.transient_status, None);
    assert!(!has_event(&recorder.events().await, "item_completed", "doc-4"));
}

#[tokio::test]
async fn test_fallback_can_assume_success() {
    let harness = TestHarness::new();
    harness
        .backend
        .set_stream("doc-4", vec![fixtures::progress_step(40), StreamStep::Hang])
        .await;

    let config = ProcessorConfig {
        fallback_policy: FallbackPolicy::AssumeSuccess,
        ..fixtures::processor_config(5_000, 60, 1_000)
    };
    let outcome = harness
        .processor(config)
        .process(&fixtures::pending_item("doc-4"))
        .await
        .unwrap();

    assert_eq!(outcome.source(), Some(CompletionSource::Fallback));
    assert!(matches!(
        outcome,
        RunOutcome::Completed {
            persistent_id: None,
            ..
        }
    ));
}

#[tokio::test]
async fn test_stream_drop_while_publishing_is_assumed_success() {
    let harness = TestHarness::new();
    harness
        .backend
        .set_stream(
            "doc-5",
            vec![StreamStep::event(fixtures::publish_pending_event())],
        )
        .await;
    harness
        .backend
        .set_stream("doc-6", vec![fixtures::progress_step(30)])
        .await;

    let processor = harness.default_processor();

    let publishing = processor
        .process(&fixtures::pending_item("doc-5"))
        .await
        .unwrap();
    assert_eq!(
        publishing.source(),
        Some(CompletionSource::StreamDropAssumed)
    );

    let mid_analysis = processor.process(&fixtures::pending_item("doc-6")).await;
    assert!(matches!(mid_analysis, Err(ProcessError::Stream(_))));
}

#[tokio::test]
async fn test_percent_only_event_keeps_publish_pending() {
    let harness = TestHarness::new();
    harness
        .backend
        .set_stream(
            "doc-7",
            vec![
                StreamStep::event(fixtures::publish_pending_event()),
                StreamStep::event(RawEvent::new("processing", json!({"progress": 90}))),
                StreamStep::error(BackendError::Stream("connection reset".to_string())),
            ],
        )
        .await;

    let outcome = harness
        .default_processor()
        .process(&fixtures::pending_item("doc-7"))
        .await
        .unwrap();

    assert_eq!(outcome.source(), Some(CompletionSource::StreamDropAssumed));
}

#[tokio::test]
async fn test_failed_run_leaves_no_stages_behind() {
    let harness = TestHarness::new();
    let recorder = harness.recorder(&["doc-8"]);
    harness
        .backend
        .set_stream(
            "doc-8",
            vec![
                fixtures::progress_step(10),
                StreamStep::event(RawEvent::new("error", json!({"error": "download failed"}))),
            ],
        )
        .await;

    let result = harness
        .default_processor()
        .process(&fixtures::pending_item("doc-8"))
        .await;
    assert!(matches!(result, Err(ProcessError::Pipeline(ref r)) if r == "download failed"));

    assert!(
        recorder
            .wait_for(Duration::from_secs(1), |events| {
                has_event(events, "item_failed", "doc-8")
            })
            .await
    );
    let item = recorder.item("doc-8").await.unwrap();
    assert!(item.stages.is_empty());
    assert!(!item.analysis_complete);
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.transient_status, Some(TransientStatus::Failed));

    // The host sees an error-typed update right before the failure
    let events = recorder.events().await;
    let failed_at = events
        .iter()
        .position(|e| e.name() == "item_failed")
        .unwrap();
    match &events[failed_at - 1] {
        OrchestratorEvent::ItemProgress { update, .. } => {
            assert_eq!(update.update_type, UpdateType::Error);
        }
        other => panic!("expected an error update, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hard_timeout_fails_run() {
    let harness = TestHarness::new();
    let recorder = harness.recorder(&["doc-7"]);
    harness
        .backend
        .set_stream("doc-7", vec![StreamStep::Hang])
        .await;

    let processor = harness.processor(fixtures::processor_config(60, 2_000, 1_000));
    let result = processor.process(&fixtures::pending_item("doc-7")).await;

    assert!(matches!(result, Err(ProcessError::Timeout(_))));
    assert!(!processor.is_running("doc-7"));
    assert_eq!(harness.backend.open_streams(), 0);

    assert!(
        recorder
            .wait_for(Duration::from_secs(1), |events| has_event(
                events,
                "item_failed",
                "doc-7"
            ))
            .await
    );
    let item = recorder.item("doc-7").await.unwrap();
    assert_eq!(item.status, ItemStatus::Pending);
}

#[tokio::test]
async fn test_malformed_event_is_ignored() {
    let harness = TestHarness::new();
    harness
        .backend
        .set_stream(
            "doc-8",
            vec![
                StreamStep::error(BackendError::MalformedEvent("data: {oops".to_string())),
                fixtures::progress_step(80),
                fixtures::complete_step(Some("tx-8")),
            ],
        )
        .await;

    let outcome = harness
        .default_processor()
        .process(&fixtures::pending_item("doc-8"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Completed {
            persistent_id: Some("tx-8".to_string()),
            source: CompletionSource::Stream,
        }
    );
}

#[tokio::test]
async fn test_stop_cancels_run_mid_stream() {
    let harness = TestHarness::new();
    let recorder = harness.recorder(&["doc-9"]);
    harness
        .backend
        .set_stream("doc-9", vec![fixtures::progress_step(10), StreamStep::Hang])
        .await;

    let processor = harness.default_processor();
    let run = tokio::spawn({
        let processor = Arc::clone(&processor);
        async move { processor.process(&fixtures::pending_item("doc-9")).await }
    });

    assert!(
        recorder
            .wait_for(Duration::from_secs(1), |events| events.iter().any(|e| {
                matches!(e, OrchestratorEvent::ItemProgress { update, .. } if update.percent == Some(10))
            }))
            .await
    );
    assert_eq!(harness.backend.open_streams(), 1);

    harness.controller.stop();

    let result = run.await.unwrap();
    assert!(matches!(result, Err(ProcessError::Cancelled)));
    assert_eq!(harness.backend.open_streams(), 0);
    assert!(harness.controller.registry().is_empty());
    assert!(
        recorder
            .wait_for(Duration::from_secs(1), |events| has_event(
                events,
                "item_cancelled",
                "doc-9"
            ))
            .await
    );

    // Stopped controllers refuse work until the reset delay passes
    let refused = processor.process(&fixtures::pending_item("doc-10")).await;
    assert!(matches!(refused, Err(ProcessError::Cancelled)));

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!harness.controller.is_stopped());
    let resumed = processor
        .process(&fixtures::pending_item("doc-10"))
        .await
        .unwrap();
    assert!(resumed.is_completed());
}
