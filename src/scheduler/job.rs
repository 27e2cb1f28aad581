//! Job definitions for the scheduler.
//!
//! This module defines the core job types used by the tracker and consumer:
//!
//! - `Job`: One received queue message plus its write-once outcome
//! - `JobOutcome`: How the downstream call for a job ended
//! - `JobSummary`: Read-only view of an in-flight job for the stat surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::resource::RawMessage;

/// Format of the first-received-at header sent to the worker.
const RECEIVED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// How a job's downstream invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// Worker answered 200; the message was acknowledged.
    Success,
    /// Worker answered with any other status.
    Failure,
    /// The request never produced a response.
    Error(String),
}

impl JobOutcome {
    /// Classifies a worker call result.
    pub fn from_call(ok: bool, error: Option<&DispatchError>) -> Self {
        match error {
            Some(e) => JobOutcome::Error(e.to_string()),
            None if ok => JobOutcome::Success,
            None => JobOutcome::Failure,
        }
    }

    /// Returns whether the job should count as succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success)
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Success => write!(f, "success"),
            JobOutcome::Failure => write!(f, "failure"),
            JobOutcome::Error(detail) => write!(f, "error: {}", detail),
        }
    }
}

/// A job representing one received queue message.
///
/// Everything except the outcome is fixed at receipt. The outcome is set
/// once by the consumer before the job is reported complete.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    id: String,
    payload: String,
    receipt: String,
    received_at: DateTime<Utc>,
    outcome: Option<JobOutcome>,
}

impl Job {
    /// Creates a job received now.
    pub fn new(
        id: impl Into<String>,
        payload: impl Into<String>,
        receipt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            receipt: receipt.into(),
            received_at: Utc::now(),
            outcome: None,
        }
    }

    /// Creates a job from a message pulled off the queue backend.
    pub fn from_message(message: RawMessage) -> Self {
        Self::new(message.id, message.body, message.receipt)
    }

    /// Overrides the receipt timestamp.
    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Backend message identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw message body.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Backend handle needed to delete the message.
    pub fn receipt(&self) -> &str {
        &self.receipt
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Receipt time in the header format expected by workers.
    pub fn first_received_at(&self) -> String {
        self.received_at.format(RECEIVED_AT_FORMAT).to_string()
    }

    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.outcome.as_ref()
    }

    /// Records the outcome. Returns `false` and leaves the existing outcome
    /// in place if one was already recorded.
    pub fn record_outcome(&mut self, outcome: JobOutcome) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    /// Returns the observability view of this job.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            payload: self.payload.clone(),
            received_at: self.received_at.timestamp(),
        }
    }
}

/// Point-in-time view of an in-flight job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub payload: String,
    /// Unix seconds of first local receipt.
    pub received_at: i64,
}
