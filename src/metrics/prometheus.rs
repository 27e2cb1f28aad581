//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by sqsd and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{Counter, CounterVec, Encoder, Gauge, Histogram, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all sqsd metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of finished jobs, labeled by outcome (success, failure, error).
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Time from dispatch to completion of a job, in seconds.
pub static JOB_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Number of jobs currently being dispatched.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Total messages returned by the queue backend.
pub static MESSAGES_RECEIVED: OnceLock<Counter> = OnceLock::new();

/// Total received messages the tracker refused to admit.
pub static ADMISSION_REJECTED: OnceLock<Counter> = OnceLock::new();

/// Total failed deletes of successfully handled messages.
pub static DELETE_FAILURES: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// This function should be called once at application startup. Later calls
/// succeed but leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Job metrics
    let jobs_total = CounterVec::new(
        Opts::new("sqsd_jobs_total", "Total number of finished jobs"),
        &["outcome"],
    )?;

    let job_duration = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "sqsd_job_duration_seconds",
            "Job dispatch duration in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
    )?;

    let jobs_in_progress = Gauge::new(
        "sqsd_jobs_in_progress",
        "Number of jobs currently being dispatched",
    )?;

    // Queue metrics
    let messages_received = Counter::new(
        "sqsd_messages_received_total",
        "Total messages received from the queue backend",
    )?;

    let admission_rejected = Counter::new(
        "sqsd_admission_rejected_total",
        "Total received messages rejected by the job tracker",
    )?;

    let delete_failures = Counter::new(
        "sqsd_delete_failures_total",
        "Total failed deletes of successfully handled messages",
    )?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(messages_received.clone()))?;
    registry.register(Box::new(admission_rejected.clone()))?;
    registry.register(Box::new(delete_failures.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = MESSAGES_RECEIVED.set(messages_received);
    let _ = ADMISSION_REJECTED.set(admission_rejected);
    let _ = DELETE_FAILURES.set(delete_failures);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
