//! Queue backend gateways.
//!
//! The daemon depends on exactly two backend operations: a long-poll batch
//! receive and a delete by receipt. Everything else about the wire protocol
//! stays inside the backend implementation.
//!
//! - **SqsResource**: Amazon SQS (or any SQS-compatible endpoint)
//! - **RedisResource**: Redis lists with lease-based visibility timeouts
//! - **InMemoryResource**: In-process queue for tests and local runs
//!
//! All backends are at-least-once: a received message that is never deleted
//! becomes receivable again once its visibility timeout expires.

pub mod memory;
pub mod redis_queue;
pub mod sqs;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ResourceError;

pub use self::memory::InMemoryResource;
pub use self::redis_queue::RedisResource;
pub use self::sqs::SqsResource;

/// A message as returned by a backend receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Backend-assigned message identifier.
    pub id: String,
    /// Message body, forwarded verbatim to the worker.
    pub body: String,
    /// Handle for deleting this particular delivery.
    pub receipt: String,
}

/// Gateway to a queue backend.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Receives up to `max_messages`, waiting up to `wait_seconds` for the
    /// first one to arrive. An empty batch is not an error.
    async fn receive_batch(
        &self,
        max_messages: usize,
        wait_seconds: u32,
    ) -> Result<Vec<RawMessage>, ResourceError>;

    /// Acknowledges a delivery so it is never redelivered.
    async fn delete_message(&self, receipt: &str) -> Result<(), ResourceError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}
