//! Single-item processor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do when the fallback timeout fires before any terminal event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// End the run as unresolved and let the host decide.
    #[default]
    Unresolved,
    /// Complete the run using the last known progress update.
    AssumeSuccess,
}

/// Configuration for the single-item processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Only consider the core stages (folder, source file, pages, analysis).
    /// When false, publish, summary update and indexing are also run.
    #[serde(default = "default_limit_to_core")]
    pub limit_to_core_analysis: bool,

    /// Hard per-run timeout (milliseconds). Expiry fails the run.
    #[serde(default = "default_hard_timeout")]
    pub hard_timeout_ms: u64,

    /// Fallback per-run timeout (milliseconds), handled per `fallback_policy`.
    #[serde(default = "default_fallback_timeout")]
    pub fallback_timeout_ms: u64,

    /// How long a run may sit in the publish-pending state before the
    /// backend is re-probed (milliseconds).
    #[serde(default = "default_publish_recheck")]
    pub publish_recheck_ms: u64,

    #[serde(default)]
    pub fallback_policy: FallbackPolicy,

    /// Message fragments that mark a run as finished (case-insensitive).
    #[serde(default = "default_success_phrases")]
    pub success_phrases: Vec<String>,

    /// Source URL used when an item has none; `{id}` is replaced.
    #[serde(default = "default_source_url_template")]
    pub source_url_template: String,
}

fn default_limit_to_core() -> bool {
    true
}

fn default_hard_timeout() -> u64 {
    15 * 60 * 1000 // 15 minutes
}

fn default_fallback_timeout() -> u64 {
    2 * 60 * 1000 // 2 minutes
}

fn default_publish_recheck() -> u64 {
    15_000 // 15 seconds
}

fn default_success_phrases() -> Vec<String> {
    [
        "processing complete",
        "all steps completed",
        "analysis complete",
        "successfully published",
        "already published",
        "saved to database",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_source_url_template() -> String {
    "/api/items/{id}/source".to_string()
}

impl ProcessorConfig {
    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(self.hard_timeout_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub fn publish_recheck(&self) -> Duration {
        Duration::from_millis(self.publish_recheck_ms)
    }

    /// Source URL for an item without one of its own.
    pub fn source_url_for(&self, item_id: &str) -> String {
        self.source_url_template
            .replace("{id}", &urlencoding::encode(item_id))
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            limit_to_core_analysis: default_limit_to_core(),
            hard_timeout_ms: default_hard_timeout(),
            fallback_timeout_ms: default_fallback_timeout(),
            publish_recheck_ms: default_publish_recheck(),
            fallback_policy: FallbackPolicy::default(),
            success_phrases: default_success_phrases(),
            source_url_template: default_source_url_template(),
        }
    }
}
