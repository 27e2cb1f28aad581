//! Receive loop: pulls message batches from the backend into the tracker.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::job::Job;
use super::tracker::JobTracker;
use crate::metrics::MetricsCollector;
use crate::resource::{RawMessage, Resource};

/// Configuration for the receive loop.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Upper bound for one receive call.
    pub max_messages: usize,
    /// Long-poll wait passed to the backend.
    pub wait_time_seconds: u32,
    /// Back-off while paused, full, after a receive error, or after an
    /// empty short poll.
    pub idle_interval: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time_seconds: 20,
            idle_interval: Duration::from_secs(1),
        }
    }
}

/// Polls the backend and admits received messages as jobs.
///
/// Messages the tracker refuses are left unacknowledged; the backend makes
/// them visible again after their visibility timeout.
pub struct MessageReceiver {
    resource: Arc<dyn Resource>,
    tracker: Arc<JobTracker>,
    config: ReceiverConfig,
    metrics: MetricsCollector,
}

impl MessageReceiver {
    pub fn new(
        resource: Arc<dyn Resource>,
        tracker: Arc<JobTracker>,
        config: ReceiverConfig,
    ) -> Self {
        Self {
            resource,
            tracker,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// Runs until `cancel` fires. Receive errors are logged and retried
    /// after the idle interval; they never end the loop.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            backend = self.resource.name(),
            max_messages = self.config.max_messages,
            wait_time_seconds = self.config.wait_time_seconds,
            "Message receiver started"
        );

        while !cancel.is_cancelled() {
            let free = self.tracker.idle_slots();
            if !self.tracker.is_working() || free == 0 {
                self.idle(&cancel).await;
                continue;
            }

            let max_messages = self.config.max_messages.min(free);
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self
                    .resource
                    .receive_batch(max_messages, self.config.wait_time_seconds) => received,
            };

            match received {
                // A short poll returns at once; back off so an empty queue
                // is not hammered.
                Ok(messages) if messages.is_empty() && self.config.wait_time_seconds == 0 => {
                    self.idle(&cancel).await;
                }
                Ok(messages) => self.admit_batch(messages, &cancel),
                Err(e) => {
                    error!(backend = self.resource.name(), error = %e, "Failed to receive messages");
                    self.idle(&cancel).await;
                }
            }
        }

        info!("Message receiver stopped");
    }

    fn admit_batch(&self, messages: Vec<RawMessage>, cancel: &CancellationToken) {
        if messages.is_empty() {
            return;
        }
        self.metrics.record_received(messages.len());
        debug!(count = messages.len(), "Received messages");

        for message in messages {
            if cancel.is_cancelled() {
                debug!(job_id = %message.id, "Shutting down, leaving message unacknowledged");
                continue;
            }

            let job = Job::from_message(message);
            let id = job.id().to_string();
            if !self.tracker.admit(job) {
                debug!(job_id = %id, "Job not admitted, leaving for redelivery");
                self.metrics.record_admission_rejected();
            }
        }
    }

    async fn idle(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.idle_interval) => {}
        }
    }
}
