//! Normalization of raw push-stream events.
//!
//! The backend signals completion in several overlapping ways: an explicit
//! `complete` event, a success status on any event, a persisted transaction
//! id, or a message containing a known success phrase. [`classify`] folds
//! all of them into one [`Signal`] so the run loop only deals with a closed
//! set of cases.

use serde_json::Value;

use crate::backend::{RawEvent, StreamEventType};

/// Intermediate status meaning the backend is publishing from its local copy.
pub const PUBLISH_PENDING_STATUS: &str = "publishing_from_local";

const SUCCESS_STATUSES: &[&str] = &["complete", "completed", "success", "ready"];
const FAILURE_STATUSES: &[&str] = &["error", "failed"];
const PERSISTENT_ID_FIELDS: &[&str] = &[
    "transactionId",
    "transaction_id",
    "persistentId",
    "persistent_id",
];

/// Incremental progress carried by a non-terminal event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub status: Option<String>,
    pub message: Option<String>,
    pub stage: Option<String>,
    pub percent: Option<u8>,
}

impl ProgressUpdate {
    /// Whether the backend reported it is publishing from its local copy.
    pub fn is_publish_pending(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(PUBLISH_PENDING_STATUS))
    }
}

/// A terminal success observed on the stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub persistent_id: Option<String>,
    pub message: Option<String>,
}

/// Normalized meaning of one stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Progress(ProgressUpdate),
    Completed(Completion),
    Failed(String),
    Ignored,
}

impl Signal {
    /// Label used for the stream-event metric.
    pub fn label(&self) -> &'static str {
        match self {
            Signal::Progress(_) => "progress",
            Signal::Completed(_) => "completed",
            Signal::Failed(_) => "failed",
            Signal::Ignored => "ignored",
        }
    }
}

/// Classify a raw stream event.
///
/// Failure wins over completion: an `error` event or a failure status ends
/// the run even if the payload also looks successful. Completion is decided
/// from the payload regardless of the declared event type.
pub fn classify(event: &RawEvent, success_phrases: &[String]) -> Signal {
    let kind = event.kind();
    let status = event.str_field("status").map(str::to_ascii_lowercase);
    let message = event.str_field("message").map(str::to_string);

    let status_is = |set: &[&str]| status.as_deref().is_some_and(|s| set.contains(&s));

    if kind == StreamEventType::Error || status_is(FAILURE_STATUSES) {
        let reason = event
            .str_field("error")
            .map(str::to_string)
            .or_else(|| message.clone())
            .unwrap_or_else(|| "pipeline reported an error".to_string());
        return Signal::Failed(reason);
    }

    let persistent_id = PERSISTENT_ID_FIELDS
        .iter()
        .find_map(|field| event.str_field(field))
        .map(str::to_string);

    if kind == StreamEventType::Complete
        || status_is(SUCCESS_STATUSES)
        || persistent_id.is_some()
        || message
            .as_deref()
            .is_some_and(|m| contains_phrase(m, success_phrases))
    {
        return Signal::Completed(Completion {
            persistent_id,
            message,
        });
    }

    match kind {
        StreamEventType::Processing | StreamEventType::Publishing => {
            Signal::Progress(ProgressUpdate {
                status: event.str_field("status").map(str::to_string).or_else(|| {
                    (kind == StreamEventType::Publishing).then(|| "publishing".to_string())
                }),
                message,
                stage: event.str_field("stage").map(str::to_string),
                percent: percent(&event.data),
            })
        }
        _ => Signal::Ignored,
    }
}

fn contains_phrase(message: &str, phrases: &[String]) -> bool {
    let message = message.to_lowercase();
    phrases
        .iter()
        .any(|phrase| !phrase.is_empty() && message.contains(&phrase.to_lowercase()))
}

fn percent(data: &Value) -> Option<u8> {
    let value = data.get("progress").or_else(|| data.get("percent"))?;
    let pct = value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))?;
    Some(pct.min(100) as u8)
}
