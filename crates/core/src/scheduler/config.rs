//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the concurrent scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum runs in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Discovery stops collecting once this many candidates are queued.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Catalog page size used during discovery.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// How often the execution loop tops up free slots (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Message fragments of stale completion markers. An item reported as
    /// ready whose last message contains one of these is checked for breakage.
    #[serde(default = "default_stale_phrases")]
    pub stale_completion_phrases: Vec<String>,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_batch_size() -> usize {
    50
}

fn default_page_size() -> u32 {
    25
}

fn default_poll_interval() -> u64 {
    500
}

fn default_stale_phrases() -> Vec<String> {
    vec![
        "completed (cached)".to_string(),
        "legacy import".to_string(),
    ]
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            batch_size: default_batch_size(),
            page_size: default_page_size(),
            poll_interval_ms: default_poll_interval(),
            stale_completion_phrases: default_stale_phrases(),
        }
    }
}
