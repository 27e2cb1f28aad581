//! In-process queue backend.
//!
//! Behaves like a visibility-timeout queue: received messages move to an
//! in-flight set keyed by a fresh receipt, and return to the ready queue if
//! they are not deleted before their lease expires. Used by tests and by
//! `backend: memory` for local dry runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::{RawMessage, Resource};
use crate::error::ResourceError;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
}

#[derive(Debug)]
struct Lease {
    message: StoredMessage,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct MemoryState {
    ready: VecDeque<StoredMessage>,
    in_flight: HashMap<String, Lease>,
}

impl MemoryState {
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(lease) = self.in_flight.remove(&receipt) {
                self.ready.push_back(lease.message);
            }
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.in_flight.values().map(|lease| lease.expires_at).min()
    }
}

/// In-memory visibility-timeout queue.
#[derive(Debug)]
pub struct InMemoryResource {
    state: Mutex<MemoryState>,
    arrivals: Notify,
    visibility_timeout: Duration,
    receive_requests: AtomicU64,
    deleted: AtomicU64,
    fail_deletes: AtomicBool,
}

impl InMemoryResource {
    /// Creates an empty queue whose deliveries stay invisible for
    /// `visibility_timeout`.
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            arrivals: Notify::new(),
            visibility_timeout,
            receive_requests: AtomicU64::new(0),
            deleted: AtomicU64::new(0),
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// Enqueues a message with a generated ID and returns the ID.
    pub fn push(&self, body: impl Into<String>) -> String {
        let id = Uuid::new_v4().to_string();
        self.push_with_id(id.clone(), body);
        id
    }

    /// Enqueues a message with a caller-chosen ID.
    ///
    /// Pushing an ID that is already queued or in flight models a duplicate
    /// delivery.
    pub fn push_with_id(&self, id: impl Into<String>, body: impl Into<String>) {
        self.state
            .lock()
            .expect("memory queue lock poisoned")
            .ready
            .push_back(StoredMessage {
                id: id.into(),
                body: body.into(),
            });
        self.arrivals.notify_one();
    }

    /// Makes every subsequent delete fail, for exercising the
    /// acknowledgment-failure path.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Messages waiting to be received.
    pub fn pending_count(&self) -> usize {
        self.state.lock().expect("memory queue lock poisoned").ready.len()
    }

    /// Deliveries that were received but not yet deleted or expired.
    pub fn in_flight_count(&self) -> usize {
        self.state
            .lock()
            .expect("memory queue lock poisoned")
            .in_flight
            .len()
    }

    /// Number of `receive_batch` calls served.
    pub fn receive_requests(&self) -> u64 {
        self.receive_requests.load(Ordering::SeqCst)
    }

    /// Number of successful deletes.
    pub fn deleted_count(&self) -> u64 {
        self.deleted.load(Ordering::SeqCst)
    }

    fn take_batch(&self, max_messages: usize) -> Option<Vec<RawMessage>> {
        let mut state = self.state.lock().expect("memory queue lock poisoned");
        let now = Instant::now();
        state.requeue_expired(now);

        if state.ready.is_empty() {
            return None;
        }

        let mut batch = Vec::new();
        while batch.len() < max_messages {
            let Some(message) = state.ready.pop_front() else {
                break;
            };
            let receipt = Uuid::new_v4().to_string();
            batch.push(RawMessage {
                id: message.id.clone(),
                body: message.body.clone(),
                receipt: receipt.clone(),
            });
            state.in_flight.insert(
                receipt,
                Lease {
                    message,
                    expires_at: now + self.visibility_timeout,
                },
            );
        }
        Some(batch)
    }
}

impl Default for InMemoryResource {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Resource for InMemoryResource {
    async fn receive_batch(
        &self,
        max_messages: usize,
        wait_seconds: u32,
    ) -> Result<Vec<RawMessage>, ResourceError> {
        self.receive_requests.fetch_add(1, Ordering::SeqCst);
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + Duration::from_secs(u64::from(wait_seconds));
        loop {
            if let Some(batch) = self.take_batch(max_messages) {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            // Wake on a new arrival, the next lease expiry, or the deadline.
            let wake_at = self
                .state
                .lock()
                .expect("memory queue lock poisoned")
                .next_expiry()
                .map_or(deadline, |expiry| expiry.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, self.arrivals.notified()).await;
        }
    }

    async fn delete_message(&self, receipt: &str) -> Result<(), ResourceError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ResourceError::ConnectionFailed(
                "memory queue configured to fail deletes".to_string(),
            ));
        }

        let removed = self
            .state
            .lock()
            .expect("memory queue lock poisoned")
            .in_flight
            .remove(receipt);

        match removed {
            Some(_) => {
                self.deleted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(ResourceError::ReceiptNotFound(receipt.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
