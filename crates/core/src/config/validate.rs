use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Backend base URL is set
/// - Pool limits, batch and page sizes are not 0
/// - Per-run timeouts are not 0 and the softer timers fire before the hard one
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.backend.base_url.trim().is_empty() {
        return Err(invalid("backend.base_url cannot be empty"));
    }

    if config.scheduler.max_concurrent == 0 {
        return Err(invalid("scheduler.max_concurrent cannot be 0"));
    }
    if config.scheduler.batch_size == 0 {
        return Err(invalid("scheduler.batch_size cannot be 0"));
    }
    if config.scheduler.page_size == 0 {
        return Err(invalid("scheduler.page_size cannot be 0"));
    }
    if config.repair.max_concurrent == 0 {
        return Err(invalid("repair.max_concurrent cannot be 0"));
    }

    let processor = &config.processor;
    if processor.hard_timeout_ms == 0
        || processor.fallback_timeout_ms == 0
        || processor.publish_recheck_ms == 0
    {
        return Err(invalid("processor timeouts cannot be 0"));
    }
    if processor.fallback_timeout_ms >= processor.hard_timeout_ms {
        return Err(invalid(
            "processor.fallback_timeout_ms must be below processor.hard_timeout_ms",
        ));
    }
    if processor.publish_recheck_ms >= processor.hard_timeout_ms {
        return Err(invalid(
            "processor.publish_recheck_ms must be below processor.hard_timeout_ms",
        ));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, CancellationConfig, EventsConfig};
    use crate::processor::ProcessorConfig;
    use crate::repair::RepairConfig;
    use crate::scheduler::SchedulerConfig;

    fn valid_config() -> Config {
        Config {
            backend: BackendConfig::new("http://localhost:3000"),
            processor: ProcessorConfig::default(),
            scheduler: SchedulerConfig::default(),
            repair: RepairConfig::default(),
            cancellation: CancellationConfig::default(),
            events: EventsConfig::default(),
        }
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_empty_base_url_fails() {
        let mut config = valid_config();
        config.backend.base_url = "  ".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_zero_concurrency_fails() {
        let mut config = valid_config();
        config.scheduler.max_concurrent = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.repair.max_concurrent = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_fallback_above_hard_timeout_fails() {
        let mut config = valid_config();
        config.processor.fallback_timeout_ms = config.processor.hard_timeout_ms;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("fallback_timeout_ms"));
    }
}
