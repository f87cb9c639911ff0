//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the backend and catalog
//! traits plus an event recorder that plays the host, allowing full
//! lifecycle tests without a real pipeline backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use docflow_core::testing::{fixtures, EventRecorder, MockBackend, MockCatalog};
//!
//! let backend = Arc::new(MockBackend::new());
//! let catalog = Arc::new(MockCatalog::with_items(fixtures::pending_items(5)));
//! backend.set_default_stream(vec![StreamStep::delay_ms(20), fixtures::complete_step(None)]).await;
//!
//! let recorder = EventRecorder::attach(&events);
//! scheduler.run().await?;
//! ```

mod mock_backend;
mod mock_catalog;
mod recorder;

pub use mock_backend::{MockBackend, RecordedCall, StreamStep};
pub use mock_catalog::MockCatalog;
pub use recorder::EventRecorder;

/// Test fixtures and helper functions.
pub mod fixtures {
    use serde_json::json;

    use crate::backend::RawEvent;
    use crate::item::{ItemStatus, Stage, WorkItem};
    use crate::processor::{ProcessorConfig, PUBLISH_PENDING_STATUS};

    use super::StreamStep;

    /// A pending document with nothing done.
    pub fn pending_item(id: &str) -> WorkItem {
        WorkItem::new(id)
    }

    /// `count` pending documents named `doc-1..=doc-count`.
    pub fn pending_items(count: usize) -> Vec<WorkItem> {
        (1..=count)
            .map(|i| pending_item(&format!("doc-{}", i)))
            .collect()
    }

    /// A ready item with every base stage and a sane page count.
    pub fn ready_item(id: &str) -> WorkItem {
        let mut item = WorkItem::new(id).with_status(ItemStatus::Ready);
        for stage in Stage::BASE {
            item.add_stage(stage);
        }
        item.analysis_complete = true;
        item.page_count = Some(3);
        item
    }

    /// A ready item whose stored output looks empty.
    pub fn hollow_ready_item(id: &str) -> WorkItem {
        let mut item = WorkItem::new(id).with_status(ItemStatus::Ready);
        item.page_count = Some(0);
        item
    }

    /// A `processing` event at the given percent.
    pub fn progress_event(percent: u8) -> RawEvent {
        RawEvent::new(
            "processing",
            json!({"status": "processing", "progress": percent, "message": format!("{}% done", percent)}),
        )
    }

    /// A `complete` event, optionally carrying a persistent id.
    pub fn complete_event(persistent_id: Option<&str>) -> RawEvent {
        match persistent_id {
            Some(id) => RawEvent::new("complete", json!({"persistentId": id})),
            None => RawEvent::new("complete", json!({})),
        }
    }

    /// A `publishing` event in the publish-pending state.
    pub fn publish_pending_event() -> RawEvent {
        RawEvent::new(
            "publishing",
            json!({"status": PUBLISH_PENDING_STATUS, "message": "Publishing from local copy"}),
        )
    }

    pub fn progress_step(percent: u8) -> StreamStep {
        StreamStep::event(progress_event(percent))
    }

    pub fn complete_step(persistent_id: Option<&str>) -> StreamStep {
        StreamStep::event(complete_event(persistent_id))
    }

    /// Processor config with short timers, in milliseconds.
    pub fn processor_config(hard_ms: u64, fallback_ms: u64, recheck_ms: u64) -> ProcessorConfig {
        ProcessorConfig {
            hard_timeout_ms: hard_ms,
            fallback_timeout_ms: fallback_ms,
            publish_recheck_ms: recheck_ms,
            ..ProcessorConfig::default()
        }
    }
}
