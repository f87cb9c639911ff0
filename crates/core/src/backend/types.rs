//! Types for talking to the remote processing backend.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::item::{ItemKind, Stage, StageStatus, WorkItem};

/// Errors that can occur while talking to the backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A push-stream event whose payload could not be decoded.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The push-stream connection broke.
    #[error("Stream error: {0}")]
    Stream(String),
}

impl BackendError {
    /// Whether this error only affects a single stream event.
    pub fn is_malformed_event(&self) -> bool {
        matches!(self, BackendError::MalformedEvent(_))
    }
}

/// Type tag of a push-stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventType {
    Processing,
    Publishing,
    Complete,
    Error,
    Heartbeat,
    Connected,
    Other(String),
}

impl StreamEventType {
    /// Parse an SSE event name.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "processing" | "progress" => StreamEventType::Processing,
            "publishing" => StreamEventType::Publishing,
            "complete" | "completed" => StreamEventType::Complete,
            "error" => StreamEventType::Error,
            "heartbeat" | "ping" => StreamEventType::Heartbeat,
            "connected" | "open" => StreamEventType::Connected,
            other => StreamEventType::Other(other.to_string()),
        }
    }
}

/// One event received on a processing push-stream, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Declared event name (`message` when the server sent none).
    pub event_type: String,
    /// Decoded JSON payload.
    pub data: Value,
}

impl RawEvent {
    /// Create a raw event.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Parsed event type.
    pub fn kind(&self) -> StreamEventType {
        StreamEventType::parse(&self.event_type)
    }

    /// String field from the payload, if present and non-empty.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// A live push-stream of processing events for one item.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RawEvent, BackendError>> + Send>>;

/// Request to start (or resume) a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub item_id: String,
    /// Where the backend should fetch the source file.
    pub url: String,
    /// Stages the backend should run, in pipeline order.
    pub steps: Vec<Stage>,
    pub kind: ItemKind,
}

/// Synchronous answer to an [`InitiateRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitiateResponse {
    pub status: String,
    pub message: String,
    pub steps: Vec<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_id: Option<String>,
}

impl InitiateResponse {
    /// Whether the backend already finished the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "completed" | "ready"
        )
    }
}

/// Answer to a one-shot repair request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepairResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_id: Option<String>,
}

impl RepairResponse {
    /// Whether the backend reports the repair as done.
    pub fn is_success(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "success" | "completed" | "complete" | "ready" | "repaired" | "ok"
        )
    }
}

/// One page of the work-item catalog.
#[derive(Debug, Clone, Default)]
pub struct CatalogPage {
    pub items: Vec<WorkItem>,
    pub total_pages: u32,
}

/// Remote pipeline operations the orchestrator drives.
#[async_trait]
pub trait PipelineBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Current completion state of an item across all stages.
    async fn status_check(&self, item_id: &str, kind: ItemKind)
        -> Result<StageStatus, BackendError>;

    /// Ask the backend whether a supposedly complete item has broken output.
    async fn is_broken(&self, item_id: &str) -> Result<bool, BackendError>;

    /// Start a pipeline run for the given stages.
    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateResponse, BackendError>;

    /// Open the push-stream for an item's run.
    async fn stream_processing(
        &self,
        item_id: &str,
        kind: ItemKind,
    ) -> Result<EventStream, BackendError>;

    /// Re-run the pipeline for a broken item in one request.
    async fn repair(&self, item_id: &str, force_update: bool)
        -> Result<RepairResponse, BackendError>;

    /// Ids the backend currently considers broken.
    async fn find_broken(&self) -> Result<Vec<String>, BackendError>;
}

/// Paginated listing of work items used for discovery.
#[async_trait]
pub trait WorkCatalog: Send + Sync {
    /// Fetch one page (1-based).
    async fn page(&self, page: u32, page_size: u32) -> Result<CatalogPage, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_parse() {
        assert_eq!(StreamEventType::parse("processing"), StreamEventType::Processing);
        assert_eq!(StreamEventType::parse(" Complete "), StreamEventType::Complete);
        assert_eq!(StreamEventType::parse("heartbeat"), StreamEventType::Heartbeat);
        assert_eq!(
            StreamEventType::parse("message"),
            StreamEventType::Other("message".to_string())
        );
    }

    #[test]
    fn test_raw_event_str_field() {
        let event = RawEvent::new("processing", json!({"status": "", "message": "hi"}));
        assert_eq!(event.str_field("status"), None);
        assert_eq!(event.str_field("message"), Some("hi"));
        assert_eq!(event.str_field("missing"), None);
    }

    #[test]
    fn test_initiate_response_terminal() {
        let resp: InitiateResponse =
            serde_json::from_str(r#"{"status": "Ready", "message": "done"}"#).unwrap();
        assert!(resp.is_terminal());

        let resp: InitiateResponse = serde_json::from_str(r#"{"status": "processing"}"#).unwrap();
        assert!(!resp.is_terminal());
        assert!(resp.steps.is_empty());
    }

    #[test]
    fn test_repair_response_success() {
        let resp: RepairResponse =
            serde_json::from_str(r#"{"status": "success", "persistentId": "tx-1"}"#).unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.persistent_id.as_deref(), Some("tx-1"));

        let resp: RepairResponse = serde_json::from_str(r#"{"status": "error"}"#).unwrap();
        assert!(!resp.is_success());
    }

    #[test]
    fn test_initiate_request_body() {
        let request = InitiateRequest {
            item_id: "doc-1".to_string(),
            url: "https://example.test/doc-1.pdf".to_string(),
            steps: vec![Stage::Folder, Stage::RenderedPages],
            kind: ItemKind::Document,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["itemId"], "doc-1");
        assert_eq!(json["steps"], json!(["folder", "rendered_pages"]));
        assert_eq!(json["kind"], "document");
    }
}
