//! Types for the single-item processor.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendError;
use crate::item::ProcessingUpdate;

/// Errors that end a run without a result.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// A one-shot backend call (initiate) failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The push-stream broke or ended without a terminal event.
    #[error("stream error: {0}")]
    Stream(String),

    /// The pipeline itself reported a failure.
    #[error("pipeline failure: {0}")]
    Pipeline(String),

    /// No terminal event before the hard timeout.
    #[error("run timed out after {0:?}")]
    Timeout(Duration),

    /// The run's cancellation scope was cancelled.
    #[error("run cancelled")]
    Cancelled,
}

impl ProcessError {
    /// Outcome label used for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            ProcessError::Timeout(_) => "timeout",
            ProcessError::Cancelled => "cancelled",
            _ => "failed",
        }
    }
}

/// How a successful run was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSource {
    /// A terminal event on the push-stream.
    Stream,
    /// The initiate call answered with a terminal status.
    Immediate,
    /// Every considered stage was already done; nothing was started.
    AlreadyComplete,
    /// The publish-pending re-probe found a persisted copy.
    PublishRecheck,
    /// The stream dropped while publishing from the local copy.
    StreamDropAssumed,
    /// The fallback timeout fired under the assume-success policy.
    Fallback,
}

impl CompletionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionSource::Stream => "stream",
            CompletionSource::Immediate => "immediate",
            CompletionSource::AlreadyComplete => "already_complete",
            CompletionSource::PublishRecheck => "publish_recheck",
            CompletionSource::StreamDropAssumed => "stream_drop_assumed",
            CompletionSource::Fallback => "fallback",
        }
    }

    /// Whether success was inferred rather than reported by the backend.
    pub fn is_heuristic(&self) -> bool {
        matches!(
            self,
            CompletionSource::StreamDropAssumed | CompletionSource::Fallback
        )
    }
}

/// Result of a run that did not error.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Another run for the same item was live; nothing was done.
    AlreadyRunning,
    Completed {
        persistent_id: Option<String>,
        source: CompletionSource,
    },
    /// The fallback timeout fired without a terminal signal.
    Unresolved {
        last_update: Option<ProcessingUpdate>,
    },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn source(&self) -> Option<CompletionSource> {
        match self {
            RunOutcome::Completed { source, .. } => Some(*source),
            _ => None,
        }
    }
}

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    CheckingStatus,
    StepsComputed,
    AlreadyComplete,
    Initiating,
    ImmediateComplete,
    StreamingProgress,
    Completed,
    Failed,
    Cancelled,
    Unresolved,
}

impl ProcessorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorState::Idle => "idle",
            ProcessorState::CheckingStatus => "checking_status",
            ProcessorState::StepsComputed => "steps_computed",
            ProcessorState::AlreadyComplete => "already_complete",
            ProcessorState::Initiating => "initiating",
            ProcessorState::ImmediateComplete => "immediate_complete",
            ProcessorState::StreamingProgress => "streaming_progress",
            ProcessorState::Completed => "completed",
            ProcessorState::Failed => "failed",
            ProcessorState::Cancelled => "cancelled",
            ProcessorState::Unresolved => "unresolved",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessorState::Completed
                | ProcessorState::Failed
                | ProcessorState::Cancelled
                | ProcessorState::Unresolved
        )
    }
}

impl std::fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
