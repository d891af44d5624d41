//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Process supervision (active streams, failures, restarts)
//! - Bulk operations (outcomes, admission rejections)
//! - Resource monitoring (sampled load, concurrency ceiling)

use once_cell::sync::Lazy;
use prometheus::{Gauge, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Supervisor
// =============================================================================

/// Transcoder processes currently supervised.
pub static ACTIVE_STREAMS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "streamvisor_active_streams",
        "Number of transcoder processes currently supervised",
    )
    .unwrap()
});

/// Stream failures by kind.
pub static STREAM_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("streamvisor_stream_failures_total", "Total stream failures"),
        &["kind"], // "exit", "heartbeat", "spawn", "push_critical", "recovery"
    )
    .unwrap()
});

/// Automatic and manual restarts performed.
pub static STREAM_RESTARTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("streamvisor_stream_restarts_total", "Total stream restarts").unwrap()
});

/// Restarts refused because the attempt ceiling was reached.
pub static MAX_RESTARTS_EXCEEDED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "streamvisor_max_restarts_exceeded_total",
        "Streams that reached the restart attempt ceiling",
    )
    .unwrap()
});

// =============================================================================
// Bulk operations
// =============================================================================

/// Finished bulk operations by operation and aggregate status.
pub static BULK_OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("streamvisor_bulk_operations_total", "Total bulk operations"),
        &["operation", "status"],
    )
    .unwrap()
});

/// Per-channel outcomes inside bulk operations.
pub static BULK_CHANNEL_RESULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "streamvisor_bulk_channel_results_total",
            "Per-channel results of bulk operations",
        ),
        &["operation", "result"], // result: "success", "failure"
    )
    .unwrap()
});

/// Admission rejections by reason.
pub static ADMISSION_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "streamvisor_admission_rejections_total",
            "Bulk operations held back by admission control",
        ),
        &["reason"], // "cpu", "memory", "global_limit", "client_limit", "process_limit"
    )
    .unwrap()
});

// =============================================================================
// Resources
// =============================================================================

/// Current adaptive concurrency ceiling.
pub static CONCURRENCY_CEILING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "streamvisor_concurrency_ceiling",
        "Adaptive ceiling on concurrent bulk operations",
    )
    .unwrap()
});

/// Last sampled 1-minute load average.
pub static CPU_LOAD: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new("streamvisor_cpu_load", "Sampled 1-minute load average").unwrap()
});

/// Last sampled memory utilization percentage.
pub static MEMORY_USED_PERCENT: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new(
        "streamvisor_memory_used_percent",
        "Sampled memory utilization in percent",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(ACTIVE_STREAMS.clone()),
        Box::new(STREAM_FAILURES.clone()),
        Box::new(STREAM_RESTARTS.clone()),
        Box::new(MAX_RESTARTS_EXCEEDED.clone()),
        Box::new(BULK_OPERATIONS.clone()),
        Box::new(BULK_CHANNEL_RESULTS.clone()),
        Box::new(ADMISSION_REJECTIONS.clone()),
        Box::new(CONCURRENCY_CEILING.clone()),
        Box::new(CPU_LOAD.clone()),
        Box::new(MEMORY_USED_PERCENT.clone()),
    ]
}
