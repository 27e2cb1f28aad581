//! Dispatch loop: hands admitted jobs to the downstream worker over HTTP.
//!
//! Each job gets its own task. A job's message is deleted only when the
//! worker answers `200`; every other result leaves the message in the
//! backend, whose visibility timeout redelivers it. There is no local retry.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::{Job, JobOutcome};
use super::tracker::JobTracker;
use crate::error::DispatchError;
use crate::metrics::MetricsCollector;
use crate::resource::Resource;

/// `User-Agent` sent with every worker request.
pub const USER_AGENT: &str = concat!("sqsd-", env!("CARGO_PKG_VERSION"));

/// Header carrying the message ID.
pub const MSGID_HEADER: &str = "X-Sqsd-Msgid";

/// Header carrying the time the daemon first received the message.
pub const FIRST_RECEIVED_AT_HEADER: &str = "X-Sqsd-First-Received-At";

/// Called once per job, before the worker request.
pub type JobStartHook = Arc<dyn Fn(&Job) + Send + Sync>;

/// Called once per job after completion with `(id, ok, error)`.
pub type JobEndHook = Arc<dyn Fn(&str, bool, Option<&DispatchError>) + Send + Sync>;

/// Configuration for the message consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Worker endpoint every job is POSTed to.
    pub url: String,
    /// Per-request timeout. `None` waits as long as the worker takes.
    pub request_timeout: Option<Duration>,
}

impl ConsumerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: None,
        }
    }

    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Consumes admitted jobs from the tracker and calls the worker for each.
pub struct MessageConsumer {
    tracker: Arc<JobTracker>,
    resource: Arc<dyn Resource>,
    url: String,
    client: reqwest::Client,
    metrics: MetricsCollector,
    on_job_start: JobStartHook,
    on_job_end: JobEndHook,
}

impl MessageConsumer {
    /// Creates a consumer with no-op hooks.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Request` if the HTTP client cannot be built.
    pub fn new(
        config: ConsumerConfig,
        resource: Arc<dyn Resource>,
        tracker: Arc<JobTracker>,
    ) -> Result<Self, DispatchError> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            tracker,
            resource,
            url: config.url,
            client,
            metrics: MetricsCollector::new(),
            on_job_start: Arc::new(|_| {}),
            on_job_end: Arc::new(|_, _, _| {}),
        })
    }

    /// Installs the job-start observation hook.
    pub fn on_handle_job_start(mut self, hook: JobStartHook) -> Self {
        self.on_job_start = hook;
        self
    }

    /// Installs the job-end observation hook.
    pub fn on_handle_job_end(mut self, hook: JobEndHook) -> Self {
        self.on_job_end = hook;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Runs the dispatch loop until `cancel` fires.
    ///
    /// On cancellation the tracker is closed, admitted jobs that were never
    /// dispatched are released without being counted, and the loop waits for
    /// every dispatched job to reach `complete` before returning.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(url = %self.url, "Message consumer started");
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Message consumer received shutdown signal");
                    break;
                }

                job = self.tracker.next_job() => {
                    let Some(job) = job else {
                        break;
                    };
                    let consumer = Arc::clone(&self);
                    let cancel = cancel.clone();
                    handlers.spawn(async move {
                        consumer.handle_job(job, &cancel).await;
                    });
                }

                Some(result) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = result {
                        error!(error = %e, "Job handler task panicked");
                    }
                }
            }
        }

        self.tracker.close();
        while let Some(job) = self.tracker.try_next_job().await {
            debug!(job_id = %job.id(), "Releasing undispatched job");
            self.tracker.release(&job);
        }

        let in_flight = handlers.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight jobs to finish");
        }
        while let Some(result) = handlers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Job handler task panicked during shutdown");
            }
        }

        info!("Message consumer stopped");
    }

    /// Runs one job to completion.
    ///
    /// Steps, in order: start hook, worker call, delete on success,
    /// `complete` on the tracker, end hook.
    pub async fn handle_job(&self, job: Job, cancel: &CancellationToken) {
        let mut pending = PendingCompletion::new(&self.tracker, job);
        (self.on_job_start)(pending.job());
        debug!(job_id = %pending.job().id(), "Handling job");

        let (ok, error) = match self.call_worker(pending.job(), cancel).await {
            Ok(ok) => (ok, None),
            Err(e) => {
                error!(job_id = %pending.job().id(), error = %e, "Worker request failed");
                (false, Some(e))
            }
        };
        pending
            .job_mut()
            .record_outcome(JobOutcome::from_call(ok, error.as_ref()));

        if ok {
            // The outcome stays Success; the backend may redeliver.
            if let Err(e) = self.resource.delete_message(pending.job().receipt()).await {
                error!(
                    job_id = %pending.job().id(),
                    backend = self.resource.name(),
                    error = %e,
                    "Failed to delete handled message"
                );
                self.metrics.record_delete_failure();
            }
        }

        pending.complete();
        debug!(job_id = %pending.job().id(), ok, "Job finished");
        (self.on_job_end)(pending.job().id(), ok, error.as_ref());
    }

    /// POSTs the job payload to the worker.
    ///
    /// Returns `Ok(true)` for `200`, `Ok(false)` for any other status, and an
    /// error when no response was received, including when `cancel` fires
    /// first.
    pub async fn call_worker(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<bool, DispatchError> {
        let request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(MSGID_HEADER, job.id())
            .header(FIRST_RECEIVED_AT_HEADER, job.first_received_at())
            .body(job.payload().to_string());

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        if status != StatusCode::OK {
            warn!(job_id = %job.id(), status = %status, "Worker rejected job");
            return Ok(false);
        }
        Ok(true)
    }
}

impl std::fmt::Debug for MessageConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageConsumer")
            .field("url", &self.url)
            .field("backend", &self.resource.name())
            .field("tracker", &self.tracker)
            .finish()
    }
}

/// Owns a dispatched job until it is reported to the tracker.
///
/// If the handler unwinds or is dropped first, the job is completed as an
/// error so its slot is not leaked.
struct PendingCompletion<'a> {
    tracker: &'a JobTracker,
    job: Job,
    completed: bool,
}

impl<'a> PendingCompletion<'a> {
    fn new(tracker: &'a JobTracker, job: Job) -> Self {
        Self {
            tracker,
            job,
            completed: false,
        }
    }

    fn job(&self) -> &Job {
        &self.job
    }

    fn job_mut(&mut self) -> &mut Job {
        &mut self.job
    }

    /// Reports the job to the tracker.
    fn complete(&mut self) {
        self.completed = true;
        self.tracker.complete(&self.job);
    }
}

impl Drop for PendingCompletion<'_> {
    fn drop(&mut self) {
        if !self.completed {
            warn!(job_id = %self.job.id(), "Job handler ended early, completing job as failed");
            self.job
                .record_outcome(JobOutcome::Error("job handler aborted".to_string()));
            self.complete();
        }
    }
}
