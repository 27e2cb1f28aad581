//! Metrics module for Prometheus-based monitoring.
//!
//! Covers the job lifecycle (finished jobs by outcome, dispatch duration,
//! jobs in progress) and the receive path (messages received, admissions
//! rejected, failed deletes). The stat server exposes them at `/metrics`.
//!
//! # Example
//!
//! ```ignore
//! use sqsd::metrics::{init_metrics, export_metrics, JobMetrics};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let metrics = JobMetrics::new();
//! let consumer = consumer
//!     .on_handle_job_start(metrics.start_hook())
//!     .on_handle_job_end(metrics.end_hook());
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{outcome_label, JobMetrics, MetricsCollector};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ADMISSION_REJECTED, DELETE_FAILURES, JOBS_IN_PROGRESS, JOBS_TOTAL, JOB_DURATION,
    MESSAGES_RECEIVED, REGISTRY,
};
