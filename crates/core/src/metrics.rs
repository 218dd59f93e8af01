//! Prometheus metrics for the distribution engine.
//!
//! This module provides metrics for:
//! - Job lifecycle (created, finished, active)
//! - Tick execution and line delivery
//! - Best-effort persistence failures

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Job Lifecycle Metrics
// =============================================================================

/// Jobs accepted by the distributor.
pub static JOBS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("linecaster_jobs_created_total", "Total jobs created").unwrap()
});

/// Jobs that reached a terminal status.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("linecaster_jobs_finished_total", "Total jobs finished"),
        &["status"], // "completed", "cancelled"
    )
    .unwrap()
});

/// Jobs with a live timer.
pub static ACTIVE_JOBS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("linecaster_active_jobs", "Number of jobs with a running timer").unwrap()
});

// =============================================================================
// Delivery Metrics
// =============================================================================

/// Timer firings by outcome.
pub static TICKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("linecaster_ticks_total", "Total timer firings"),
        &["outcome"], // "delivered", "completed", "skipped_in_flight", "stopped"
    )
    .unwrap()
});

/// Lines appended to a recipient inbox.
pub static LINES_DELIVERED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("linecaster_lines_delivered_total", "Total lines delivered").unwrap()
});

/// Lines counted as sent although their recipient did not resolve.
pub static LINES_SKIPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "linecaster_lines_skipped_total",
        "Lines skipped because the recipient does not exist",
    )
    .unwrap()
});

/// Deliveries rejected by the recipient directory.
pub static DELIVERY_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "linecaster_delivery_failures_total",
        "Deliveries that failed after the recipient resolved",
    )
    .unwrap()
});

// =============================================================================
// Persistence Metrics
// =============================================================================

/// Swallowed persistence failures.
pub static PERSIST_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "linecaster_persist_failures_total",
            "Durable store writes that failed and were discarded",
        ),
        &["operation"], // "insert_job", "upsert_progress", "mark_sent"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all engine metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(JOBS_CREATED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(ACTIVE_JOBS.clone()),
        Box::new(TICKS_TOTAL.clone()),
        Box::new(LINES_DELIVERED.clone()),
        Box::new(LINES_SKIPPED.clone()),
        Box::new(DELIVERY_FAILURES.clone()),
        Box::new(PERSIST_FAILURES.clone()),
    ]
}

/// Register every engine metric in `registry`.
pub fn register_metrics(registry: &prometheus::Registry) -> prometheus::Result<()> {
    for metric in all_metrics() {
        registry.register(metric)?;
    }
    Ok(())
}
