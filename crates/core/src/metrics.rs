//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Single-item runs (outcomes, durations, stream signals)
//! - Scheduler pools (active runs, discovery rounds)
//! - Repairs
//! - Backend requests

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts};

// =============================================================================
// Runs
// =============================================================================

/// Runs started total.
pub static RUNS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("docflow_runs_started_total", "Total pipeline runs started").unwrap()
});

/// Runs finished total by outcome.
pub static RUNS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("docflow_runs_finished_total", "Total pipeline runs finished"),
        // "completed", "already_complete", "unresolved", "failed", "timeout", "cancelled"
        &["outcome"],
    )
    .unwrap()
});

/// Run duration in seconds.
pub static RUN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("docflow_run_duration_seconds", "Duration of pipeline runs")
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0]),
        &["outcome"],
    )
    .unwrap()
});

/// Completions by how they were decided.
pub static COMPLETIONS_BY_SOURCE: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "docflow_completions_total",
            "Completed runs by completion source",
        ),
        &["source"],
    )
    .unwrap()
});

/// Stream events by classification.
pub static STREAM_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("docflow_stream_events_total", "Push-stream events received"),
        &["signal"], // "progress", "completed", "failed", "ignored", "malformed"
    )
    .unwrap()
});

// =============================================================================
// Pools
// =============================================================================

/// Runs in flight per pool.
pub static ACTIVE_RUNS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("docflow_active_runs", "Runs currently in flight"),
        &["pool"], // "processing", "repair"
    )
    .unwrap()
});

/// Discovery rounds total.
pub static DISCOVERY_ROUNDS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "docflow_discovery_rounds_total",
        "Total catalog discovery rounds",
    )
    .unwrap()
});

/// Repairs total by result.
pub static REPAIRS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("docflow_repairs_total", "Total repair attempts"),
        &["result"], // "success", "failed"
    )
    .unwrap()
});

// =============================================================================
// Backend
// =============================================================================

/// Backend requests total.
pub static BACKEND_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("docflow_backend_requests_total", "Total backend requests"),
        &["operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

/// Backend request duration in seconds.
pub static BACKEND_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "docflow_backend_duration_seconds",
            "Duration of backend requests",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["operation"],
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Record the result of a backend request.
pub fn record_backend_request(operation: &str, success: bool, elapsed_secs: f64) {
    let status = if success { "success" } else { "error" };
    BACKEND_REQUESTS
        .with_label_values(&[operation, status])
        .inc();
    BACKEND_DURATION
        .with_label_values(&[operation])
        .observe(elapsed_secs);
}

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Runs
        Box::new(RUNS_STARTED.clone()),
        Box::new(RUNS_FINISHED.clone()),
        Box::new(RUN_DURATION.clone()),
        Box::new(COMPLETIONS_BY_SOURCE.clone()),
        Box::new(STREAM_EVENTS.clone()),
        // Pools
        Box::new(ACTIVE_RUNS.clone()),
        Box::new(DISCOVERY_ROUNDS.clone()),
        Box::new(REPAIRS.clone()),
        // Backend
        Box::new(BACKEND_REQUESTS.clone()),
        Box::new(BACKEND_DURATION.clone()),
    ]
}
