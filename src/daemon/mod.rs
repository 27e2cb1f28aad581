//! Daemon wiring and lifecycle.
//!
//! `Daemon` owns one tracker and connects the receive loop, the dispatch
//! loop and the stat server to it. A single cancellation token stops all
//! three; the tracker is closed first so nothing is admitted once shutdown
//! starts.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{DaemonConfig, QueueBackend, QueueConfig};
use crate::error::{DaemonError, ResourceError, ServerError};
use crate::metrics::JobMetrics;
use crate::resource::{InMemoryResource, RedisResource, Resource, SqsResource};
use crate::scheduler::{
    ConsumerConfig, JobTracker, MessageConsumer, MessageReceiver, ReceiverConfig,
};
use crate::stat::{StatServer, StatState};

/// Builds the queue backend selected by `config`.
///
/// # Errors
///
/// Returns `ResourceError::ConnectionFailed` when the backend URL is missing
/// or the connection cannot be established.
pub async fn build_resource(config: &QueueConfig) -> Result<Arc<dyn Resource>, ResourceError> {
    let url = config.url.clone().unwrap_or_default();

    let resource: Arc<dyn Resource> = match config.backend {
        QueueBackend::Sqs => Arc::new(
            SqsResource::connect(url, config.region.clone(), config.endpoint_url.clone()).await?,
        ),
        QueueBackend::Redis => Arc::new(
            RedisResource::connect(&url, &config.queue_name, config.visibility_timeout()).await?,
        ),
        QueueBackend::Memory => Arc::new(InMemoryResource::new(config.visibility_timeout())),
    };

    info!(backend = resource.name(), "Queue backend ready");
    Ok(resource)
}

/// The assembled daemon.
pub struct Daemon {
    config: DaemonConfig,
    resource: Arc<dyn Resource>,
    tracker: Arc<JobTracker>,
    consumer: Arc<MessageConsumer>,
    job_metrics: Arc<JobMetrics>,
    stat: Option<StatServer>,
    cancel: CancellationToken,
}

impl Daemon {
    /// Validates `config` and wires every component around `resource`.
    ///
    /// Binds the stat server when it is enabled, so a busy port fails here
    /// rather than after the daemon starts receiving.
    pub async fn new(
        config: DaemonConfig,
        resource: Arc<dyn Resource>,
    ) -> Result<Self, DaemonError> {
        config.validate()?;

        let tracker = Arc::new(JobTracker::new(config.worker.max_workers));
        let job_metrics = JobMetrics::new();

        let mut consumer_config = ConsumerConfig::new(config.worker.url.clone());
        if let Some(timeout) = config.worker.request_timeout() {
            consumer_config = consumer_config.with_request_timeout(timeout);
        }
        let consumer =
            MessageConsumer::new(consumer_config, Arc::clone(&resource), Arc::clone(&tracker))?
                .on_handle_job_start(job_metrics.start_hook())
                .on_handle_job_end(job_metrics.end_hook());

        let stat = if config.stat.enabled {
            let state = StatState::new(Arc::clone(&tracker));
            Some(StatServer::bind(config.stat.bind, state).await?)
        } else {
            None
        };

        Ok(Self {
            config,
            resource,
            tracker,
            consumer: Arc::new(consumer),
            job_metrics,
            stat,
            cancel: CancellationToken::new(),
        })
    }

    /// Builds the configured backend, then the daemon.
    pub async fn from_config(config: DaemonConfig) -> Result<Self, DaemonError> {
        config.validate()?;
        let resource = build_resource(&config.queue).await?;
        Self::new(config, resource).await
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    pub fn job_metrics(&self) -> &Arc<JobMetrics> {
        &self.job_metrics
    }

    /// Address the stat server is bound to, if enabled.
    pub fn stat_addr(&self) -> Option<SocketAddr> {
        self.stat
            .as_ref()
            .and_then(|server| server.local_addr().ok())
    }

    /// Token that stops the daemon when cancelled, as an alternative to the
    /// shutdown future passed to `run`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs until `shutdown` resolves or the cancellation token fires, then
    /// drains in-flight jobs within `shutdown_timeout_secs`.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::ShutdownTimeout` if the drain does not finish in
    /// time, or the first error reported by a daemon task.
    pub async fn run<F>(self, shutdown: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()>,
    {
        let Daemon {
            config,
            resource,
            tracker,
            consumer,
            job_metrics: _,
            stat,
            cancel,
        } = self;

        let receiver = MessageReceiver::new(
            resource,
            Arc::clone(&tracker),
            ReceiverConfig {
                max_messages: config.queue.max_messages,
                wait_time_seconds: config.queue.wait_time_seconds,
                idle_interval: config.queue.idle_interval(),
            },
        );

        let receiver_task = tokio::spawn(receiver.run(cancel.clone()));
        let consumer_task = tokio::spawn(consumer.run(cancel.clone()));
        let stat_task = stat.map(|server| tokio::spawn(server.run(cancel.clone())));

        info!(
            worker_url = %config.worker.url,
            max_workers = config.worker.max_workers,
            backend = ?config.queue.backend,
            stat_enabled = stat_task.is_some(),
            "sqsd started"
        );

        tokio::select! {
            _ = shutdown => info!("Shutdown signal received"),
            _ = cancel.cancelled() => info!("Daemon cancelled"),
        }

        tracker.close();
        cancel.cancel();

        let shutdown_timeout = config.shutdown_timeout();
        let drain = Self::join_tasks(receiver_task, consumer_task, stat_task);
        match tokio::time::timeout(shutdown_timeout, drain).await {
            Ok(result) => {
                info!(
                    total_handled = tracker.score_board().total_handled(),
                    "sqsd stopped"
                );
                result
            }
            Err(_) => {
                warn!(
                    busy = tracker.busy(),
                    timeout = ?shutdown_timeout,
                    "Shutdown timed out with jobs still in flight"
                );
                Err(DaemonError::ShutdownTimeout(shutdown_timeout))
            }
        }
    }

    async fn join_tasks(
        receiver: JoinHandle<()>,
        consumer: JoinHandle<()>,
        stat: Option<JoinHandle<Result<(), ServerError>>>,
    ) -> Result<(), DaemonError> {
        let mut first_error = None;

        if let Err(e) = receiver.await {
            error!(error = %e, "Receiver task failed");
            first_error.get_or_insert(DaemonError::Task(e));
        }

        if let Err(e) = consumer.await {
            error!(error = %e, "Consumer task failed");
            first_error.get_or_insert(DaemonError::Task(e));
        }

        if let Some(stat) = stat {
            match stat.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "Stat server failed");
                    first_error.get_or_insert(DaemonError::Server(e));
                }
                Err(e) => {
                    error!(error = %e, "Stat server task failed");
                    first_error.get_or_insert(DaemonError::Task(e));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("worker_url", &self.config.worker.url)
            .field("backend", &self.resource.name())
            .field("tracker", &self.tracker)
            .field("stat_addr", &self.stat_addr())
            .finish()
    }
}
