//! Types describing work items and their pipeline stages.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::events::OrchestratorEvent;

/// Identifiers of uploaded items carry an `upload-`/`up_` style prefix.
static UPLOAD_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(upload|up)[-_]").expect("valid upload id pattern"));

/// The two kinds of work item the backend distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Item sourced from the document catalog.
    Document,
    /// Item uploaded directly by a user.
    Upload,
}

impl ItemKind {
    /// Infer the kind of an item.
    ///
    /// An explicit flag from the catalog wins; otherwise the identifier
    /// pattern decides.
    pub fn infer(id: &str, explicit_upload: Option<bool>) -> Self {
        match explicit_upload {
            Some(true) => ItemKind::Upload,
            Some(false) => ItemKind::Document,
            None if UPLOAD_ID_PATTERN.is_match(&id.to_ascii_lowercase()) => ItemKind::Upload,
            None => ItemKind::Document,
        }
    }

    /// Returns the string representation used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Document => "document",
            ItemKind::Upload => "upload",
        }
    }
}

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemStatus {
    #[default]
    Pending,
    Processing,
    Ready,
    WaitingForAnalysis,
    Error,
}

/// Short-lived status shown while the orchestrator is working on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransientStatus {
    Processing,
    Failed,
    RepairFailed,
}

/// One independently checkable unit of pipeline work.
///
/// Variants are declared in pipeline order; `Ord` follows that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Folder,
    SourceFile,
    RenderedPages,
    Analysis,
    Publish,
    SummaryUpdate,
    Indexing,
}

impl Stage {
    /// Stages that are always considered.
    pub const BASE: [Stage; 4] = [
        Stage::Folder,
        Stage::SourceFile,
        Stage::RenderedPages,
        Stage::Analysis,
    ];

    /// Stages that are only considered outside core-analysis mode.
    pub const DOWNSTREAM: [Stage; 3] = [Stage::Publish, Stage::SummaryUpdate, Stage::Indexing];

    /// Returns the stage tag used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Folder => "folder",
            Stage::SourceFile => "source_file",
            Stage::RenderedPages => "rendered_pages",
            Stage::Analysis => "analysis",
            Stage::Publish => "publish",
            Stage::SummaryUpdate => "summary_update",
            Stage::Indexing => "indexing",
        }
    }

    /// Parse a wire tag. Unknown tags yield `None`.
    pub fn from_tag(tag: &str) -> Option<Stage> {
        let stage = match tag.trim().to_ascii_lowercase().as_str() {
            "folder" => Stage::Folder,
            "source_file" | "file" | "download" => Stage::SourceFile,
            "rendered_pages" | "pages" => Stage::RenderedPages,
            "analysis" => Stage::Analysis,
            "publish" => Stage::Publish,
            "summary_update" | "summary" => Stage::SummaryUpdate,
            "indexing" | "index" => Stage::Indexing,
            _ => return None,
        };
        Some(stage)
    }

    /// Stages considered under the given mode, in pipeline order.
    pub fn considered(limit_to_core_analysis: bool) -> Vec<Stage> {
        let mut stages = Stage::BASE.to_vec();
        if !limit_to_core_analysis {
            stages.extend_from_slice(&Stage::DOWNSTREAM);
        }
        stages
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of input the remote pipeline processes end-to-end.
///
/// The host owns the authoritative copy. The orchestrator reads catalog
/// snapshots during discovery and publishes changes as events, which a host
/// folds back in with [`WorkItem::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub transient_status: Option<TransientStatus>,
    /// Completed stages, in pipeline order.
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub analysis_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Where the backend fetches the source file from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Rendered page count as last reported by the catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    /// Last human-readable status message stored with the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
}

impl WorkItem {
    /// Create a pending item, inferring its kind from the identifier.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let kind = ItemKind::infer(&id, None);
        Self {
            id,
            kind,
            status: ItemStatus::Pending,
            transient_status: None,
            stages: Vec::new(),
            analysis_complete: false,
            persistent_id: None,
            updated_at: Utc::now(),
            source_url: None,
            page_count: None,
            last_message: None,
        }
    }

    /// Set the item kind explicitly.
    pub fn with_kind(mut self, kind: ItemKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the lifecycle status.
    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the source URL.
    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// Record a stage as complete, keeping pipeline order and uniqueness.
    pub fn add_stage(&mut self, stage: Stage) {
        if let Err(pos) = self.stages.binary_search(&stage) {
            self.stages.insert(pos, stage);
        }
    }

    /// Fold an orchestrator event into this item.
    ///
    /// Events for other items are ignored. Returns whether anything changed.
    pub fn apply(&mut self, event: &OrchestratorEvent) -> bool {
        if event.item_id() != Some(self.id.as_str()) {
            return false;
        }

        match event {
            OrchestratorEvent::ItemStarted { .. } => {
                self.transient_status = Some(TransientStatus::Processing);
            }
            // Progress lists the stages being worked on, not finished ones.
            OrchestratorEvent::ItemProgress { update, .. } => {
                self.last_message = Some(update.message.clone());
            }
            OrchestratorEvent::ItemCompleted {
                stages,
                analysis_complete,
                persistent_id,
                ..
            } => {
                self.status = ItemStatus::Ready;
                self.transient_status = None;
                for stage in stages {
                    self.add_stage(*stage);
                }
                self.analysis_complete = *analysis_complete;
                if persistent_id.is_some() {
                    self.persistent_id = persistent_id.clone();
                }
            }
            OrchestratorEvent::ItemFailed { reason, repair, .. } => {
                self.transient_status = Some(if *repair {
                    TransientStatus::RepairFailed
                } else {
                    TransientStatus::Failed
                });
                self.last_message = Some(reason.clone());
            }
            OrchestratorEvent::ItemUnresolved { last_update, .. } => {
                self.transient_status = None;
                if let Some(update) = last_update {
                    self.last_message = Some(update.message.clone());
                }
            }
            OrchestratorEvent::ItemCancelled { .. } => {
                self.transient_status = None;
            }
            OrchestratorEvent::IdentifierAssigned { persistent_id, .. } => {
                self.persistent_id = Some(persistent_id.clone());
            }
            OrchestratorEvent::RepairCompleted { persistent_id, .. } => {
                self.status = ItemStatus::Ready;
                self.transient_status = None;
                if persistent_id.is_some() {
                    self.persistent_id = persistent_id.clone();
                }
            }
            OrchestratorEvent::SchedulerProgress { .. } => return false,
        }

        self.updated_at = Utc::now();
        true
    }
}

/// Per-item completion snapshot reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageStatus {
    pub has_folder: bool,
    pub has_source_file: bool,
    pub has_rendered_pages: bool,
    pub has_analysis: bool,
    pub has_published_copy: bool,
    pub has_latest_summary: bool,
    pub is_indexed: bool,
    /// Persisted id, reported once a published copy exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_id: Option<String>,
}

impl StageStatus {
    /// A status with every stage marked done.
    pub fn all_done() -> Self {
        Self {
            has_folder: true,
            has_source_file: true,
            has_rendered_pages: true,
            has_analysis: true,
            has_published_copy: true,
            has_latest_summary: true,
            is_indexed: true,
            persistent_id: None,
        }
    }

    /// Whether the given stage is reported as done.
    pub fn is_done(&self, stage: Stage) -> bool {
        match stage {
            Stage::Folder => self.has_folder,
            Stage::SourceFile => self.has_source_file,
            Stage::RenderedPages => self.has_rendered_pages,
            Stage::Analysis => self.has_analysis,
            Stage::Publish => self.has_published_copy,
            Stage::SummaryUpdate => self.has_latest_summary,
            Stage::Indexing => self.is_indexed,
        }
    }

    /// Stages still outstanding under the given mode, in pipeline order.
    pub fn needed_stages(&self, limit_to_core_analysis: bool) -> Vec<Stage> {
        Stage::considered(limit_to_core_analysis)
            .into_iter()
            .filter(|stage| !self.is_done(*stage))
            .collect()
    }

    /// Stages already done under the given mode, in pipeline order.
    pub fn done_stages(&self, limit_to_core_analysis: bool) -> Vec<Stage> {
        Stage::considered(limit_to_core_analysis)
            .into_iter()
            .filter(|stage| self.is_done(*stage))
            .collect()
    }
}

/// Classification of a [`ProcessingUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Processing,
    Complete,
    Error,
}

/// Transient progress record for one in-flight run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingUpdate {
    pub status: String,
    pub message: String,
    #[serde(rename = "type")]
    pub update_type: UpdateType,
    /// Stages this run is working through.
    pub stages: Vec<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingUpdate {
    /// A fresh in-progress update.
    pub fn processing(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: message.into(),
            update_type: UpdateType::Processing,
            stages: Vec::new(),
            stage: None,
            percent: None,
            transaction_id: None,
            updated_at: Utc::now(),
        }
    }

    /// A terminal success update.
    pub fn complete(message: impl Into<String>, stages: Vec<Stage>) -> Self {
        Self {
            status: "completed".to_string(),
            message: message.into(),
            update_type: UpdateType::Complete,
            stages,
            stage: None,
            percent: Some(100),
            transaction_id: None,
            updated_at: Utc::now(),
        }
    }

    /// A terminal failure update.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            update_type: UpdateType::Error,
            stages: Vec::new(),
            stage: None,
            percent: None,
            transaction_id: None,
            updated_at: Utc::now(),
        }
    }
}
