//! Prometheus metrics for the runner.
//!
//! Registers the core metrics plus the host's own event-stream metrics in
//! one registry, encoded on exit when `--metrics-out` is given.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Orchestrator events seen by the host, by event name.
pub static EVENTS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("docflow_host_events_total", "Orchestrator events received"),
        &["event"],
    )
    .unwrap()
});

/// Events lost because the host fell behind.
pub static EVENTS_LAGGED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "docflow_host_events_lagged_total",
        "Orchestrator events dropped before the host read them",
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(EVENTS_RECEIVED.clone()))
        .unwrap();
    registry
        .register(Box::new(EVENTS_LAGGED.clone()))
        .unwrap();

    for metric in docflow_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_core_and_host_metrics() {
        EVENTS_RECEIVED.with_label_values(&["item_started"]).inc();
        docflow_core::metrics::RUNS_STARTED.inc();

        let text = encode_metrics();
        assert!(text.contains("docflow_host_events_total"));
        assert!(text.contains("docflow_runs_started_total"));
    }
}
