//! Repair pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the repair scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Maximum repairs in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Delay between consecutive launches (milliseconds).
    #[serde(default = "default_stagger")]
    pub stagger_ms: u64,

    /// How often the pool checks for free slots (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Ask the backend to overwrite existing output.
    #[serde(default = "default_force_update")]
    pub force_update: bool,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_stagger() -> u64 {
    2000
}

fn default_poll_interval() -> u64 {
    500
}

fn default_force_update() -> bool {
    true
}

impl RepairConfig {
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            stagger_ms: default_stagger(),
            poll_interval_ms: default_poll_interval(),
            force_update: default_force_update(),
        }
    }
}
