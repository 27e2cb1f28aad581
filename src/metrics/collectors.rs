//! Metric recording for daemon operations.
//!
//! `MetricsCollector` wraps the raw Prometheus statics. `JobMetrics` turns
//! the consumer's start/end observation hooks into job counters, an
//! in-progress gauge and a duration histogram.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::prometheus::{
    ADMISSION_REJECTED, DELETE_FAILURES, JOBS_IN_PROGRESS, JOBS_TOTAL, JOB_DURATION,
    MESSAGES_RECEIVED,
};
use crate::error::DispatchError;
use crate::scheduler::{Job, JobEndHook, JobStartHook};

/// Metrics collector for recording sqsd operational metrics.
///
/// Recording before `init_metrics()` is a no-op.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a finished job.
    ///
    /// # Arguments
    ///
    /// * `outcome` - Outcome label ("success", "failure" or "error")
    /// * `duration_secs` - Dispatch-to-completion time in seconds
    pub fn record_job(&self, outcome: &str, duration_secs: f64) {
        if let Some(jobs_total) = JOBS_TOTAL.get() {
            jobs_total.with_label_values(&[outcome]).inc();
        }

        if let Some(job_duration) = JOB_DURATION.get() {
            job_duration.observe(duration_secs);
        }

        tracing::trace!(
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded job metric"
        );
    }

    /// Record a batch of messages returned by the backend.
    pub fn record_received(&self, count: usize) {
        if let Some(received) = MESSAGES_RECEIVED.get() {
            received.inc_by(count as f64);
        }
    }

    pub fn record_admission_rejected(&self) {
        if let Some(rejected) = ADMISSION_REJECTED.get() {
            rejected.inc();
        }
    }

    pub fn record_delete_failure(&self) {
        if let Some(delete_failures) = DELETE_FAILURES.get() {
            delete_failures.inc();
        }
    }

    pub fn inc_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.inc();
        }
    }

    pub fn dec_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.dec();
        }
    }
}

/// Outcome label for a finished job.
pub fn outcome_label(ok: bool, error: Option<&DispatchError>) -> &'static str {
    match (ok, error) {
        (_, Some(_)) => "error",
        (true, None) => "success",
        (false, None) => "failure",
    }
}

/// Job-level metrics fed by the consumer hooks.
#[derive(Debug, Default)]
pub struct JobMetrics {
    collector: MetricsCollector,
    started: Mutex<HashMap<String, Instant>>,
}

impl JobMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks a job as dispatched.
    pub fn job_started(&self, job: &Job) {
        self.started
            .lock()
            .expect("job metrics lock poisoned")
            .insert(job.id().to_string(), Instant::now());
        self.collector.inc_jobs_in_progress();
    }

    /// Records the outcome and duration of a dispatched job.
    pub fn job_ended(&self, id: &str, ok: bool, error: Option<&DispatchError>) {
        let started = self
            .started
            .lock()
            .expect("job metrics lock poisoned")
            .remove(id);
        let duration_secs = started.map_or(0.0, |at| at.elapsed().as_secs_f64());

        self.collector.dec_jobs_in_progress();
        self.collector
            .record_job(outcome_label(ok, error), duration_secs);
    }

    /// Number of jobs started but not yet ended.
    pub fn pending(&self) -> usize {
        self.started.lock().expect("job metrics lock poisoned").len()
    }

    /// Hook to install with `MessageConsumer::on_handle_job_start`.
    pub fn start_hook(self: &Arc<Self>) -> JobStartHook {
        let metrics = Arc::clone(self);
        Arc::new(move |job: &Job| metrics.job_started(job))
    }

    /// Hook to install with `MessageConsumer::on_handle_job_end`.
    pub fn end_hook(self: &Arc<Self>) -> JobEndHook {
        let metrics = Arc::clone(self);
        Arc::new(move |id: &str, ok: bool, error: Option<&DispatchError>| {
            metrics.job_ended(id, ok, error)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;

    #[test]
    fn test_outcome_label() {
        let err = DispatchError::Cancelled;

        assert_eq!(outcome_label(true, None), "success");
        assert_eq!(outcome_label(false, None), "failure");
        assert_eq!(outcome_label(false, Some(&err)), "error");
    }

    #[test]
    fn test_collector_records_without_panicking() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();

        collector.record_job("success", 0.25);
        collector.record_received(3);
        collector.record_admission_rejected();
        collector.record_delete_failure();
        collector.inc_jobs_in_progress();
        collector.dec_jobs_in_progress();
    }

    #[test]
    fn test_job_metrics_hooks_track_pending_jobs() {
        let _ = init_metrics();
        let metrics = JobMetrics::new();
        let start = metrics.start_hook();
        let end = metrics.end_hook();
        let job = Job::new("msg-1", "{}", "r");

        start(&job);
        assert_eq!(metrics.pending(), 1);

        end("msg-1", true, None);
        assert_eq!(metrics.pending(), 0);
    }

    #[test]
    fn test_job_ended_without_start_is_tolerated() {
        let metrics = JobMetrics::new();

        metrics.job_ended("never-started", false, None);

        assert_eq!(metrics.pending(), 0);
    }
}
