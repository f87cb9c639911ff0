use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::processor::ProcessorConfig;
use crate::repair::RepairConfig;
use crate::scheduler::SchedulerConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub repair: RepairConfig,
    #[serde(default)]
    pub cancellation: CancellationConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

/// Remote processing backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Backend base URL (e.g., "http://localhost:3000")
    pub base_url: String,
    /// Timeout for one-shot requests in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
    /// Connect timeout in seconds, also applied to push-streams (default: 10)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u32,
}

fn default_timeout() -> u32 {
    30
}

fn default_connect_timeout() -> u32 {
    10
}

impl BackendConfig {
    /// Config pointing at the given base URL with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Stop/reset behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CancellationConfig {
    /// Delay before a stopped controller accepts new runs (milliseconds)
    #[serde(default = "default_reset_delay")]
    pub reset_delay_ms: u64,
}

impl CancellationConfig {
    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            reset_delay_ms: default_reset_delay(),
        }
    }
}

fn default_reset_delay() -> u64 {
    1000
}

/// Event stream configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    /// Events buffered per subscriber before the oldest are dropped
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_buffer_size() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::FallbackPolicy;

    #[test]
    fn test_deserialize_minimal_config() {
        let toml = r#"
[backend]
base_url = "http://localhost:3000"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.backend.base_url, "http://localhost:3000");
        assert_eq!(config.backend.timeout_secs, 30);
        assert_eq!(config.backend.connect_timeout_secs, 10);
        assert_eq!(config.scheduler.max_concurrent, 3);
        assert_eq!(config.repair.max_concurrent, 5);
        assert_eq!(config.cancellation.reset_delay(), Duration::from_secs(1));
        assert_eq!(config.events.buffer_size, 1024);
    }

    #[test]
    fn test_deserialize_missing_backend_fails() {
        let toml = r#"
[scheduler]
max_concurrent = 2
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_sections() {
        let toml = r#"
[backend]
base_url = "http://backend:8000"
timeout_secs = 5

[processor]
limit_to_core_analysis = false
fallback_policy = "assume_success"

[scheduler]
max_concurrent = 4

[repair]
stagger_ms = 250

[cancellation]
reset_delay_ms = 50
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.backend.timeout_secs, 5);
        assert!(!config.processor.limit_to_core_analysis);
        assert_eq!(config.processor.fallback_policy, FallbackPolicy::AssumeSuccess);
        assert_eq!(config.scheduler.max_concurrent, 4);
        assert_eq!(config.repair.stagger_ms, 250);
        assert_eq!(config.cancellation.reset_delay_ms, 50);
    }
}
