//! Redis-backed queue with visibility timeouts.
//!
//! # Key Structure
//!
//! The queue uses three Redis keys:
//!
//! - `{queue_name}`: List of waiting message envelopes (LPUSH in, RPOP out)
//! - `{queue_name}:inflight`: Hash of receipt → envelope for received messages
//! - `{queue_name}:leases`: Sorted set of receipts scored by lease deadline (ms)
//!
//! # Visibility
//!
//! Every receive first returns expired leases to the head of the waiting
//! list, so an undeleted message becomes receivable again once its lease
//! runs out. Deleting a receipt drops both the envelope and the lease.
//!
//! Blocking pops run on a dedicated connection so a long poll never stalls
//! deletes issued by in-flight jobs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{RawMessage, Resource};
use crate::error::ResourceError;

/// Serialized form of a waiting message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Envelope {
    id: String,
    body: String,
}

impl Envelope {
    /// Parses a list entry. Entries pushed by foreign producers as bare
    /// bodies get a generated ID instead of being dropped.
    fn parse(data: &str) -> Self {
        serde_json::from_str(data).unwrap_or_else(|_| Envelope {
            id: Uuid::new_v4().to_string(),
            body: data.to_string(),
        })
    }

    /// Serialized form stored while leased and pushed back on expiry, so a
    /// generated ID survives redelivery.
    fn to_entry(&self) -> Result<String, ResourceError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Redis queue with lease-based redelivery.
pub struct RedisResource {
    /// Connection for non-blocking commands.
    redis: ConnectionManager,
    /// Connection reserved for BRPOP.
    blocking: ConnectionManager,
    queue_name: String,
    inflight_key: String,
    leases_key: String,
    visibility_timeout: Duration,
}

impl RedisResource {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `queue_name` - Name of the queue (used as prefix for Redis keys)
    /// * `visibility_timeout` - How long a received message stays hidden
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::ConnectionFailed` if the connection fails.
    pub async fn connect(
        redis_url: &str,
        queue_name: &str,
        visibility_timeout: Duration,
    ) -> Result<Self, ResourceError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| ResourceError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| ResourceError::ConnectionFailed(e.to_string()))?;
        let blocking = ConnectionManager::new(client)
            .await
            .map_err(|e| ResourceError::ConnectionFailed(e.to_string()))?;

        info!(queue = queue_name, "Connected to Redis queue");

        Ok(Self {
            redis,
            blocking,
            queue_name: queue_name.to_string(),
            inflight_key: format!("{}:inflight", queue_name),
            leases_key: format!("{}:leases", queue_name),
            visibility_timeout,
        })
    }

    /// Enqueues a message body and returns its generated ID.
    pub async fn enqueue(&self, body: &str) -> Result<String, ResourceError> {
        let id = Uuid::new_v4().to_string();
        self.enqueue_with_id(&id, body).await?;
        Ok(id)
    }

    /// Enqueues a message with a caller-chosen ID.
    pub async fn enqueue_with_id(&self, id: &str, body: &str) -> Result<(), ResourceError> {
        let envelope = serde_json::to_string(&Envelope {
            id: id.to_string(),
            body: body.to_string(),
        })?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, envelope).await?;
        Ok(())
    }

    /// Returns expired leases to the waiting list.
    ///
    /// # Returns
    ///
    /// The number of messages made receivable again.
    pub async fn requeue_expired(&self) -> Result<usize, ResourceError> {
        let mut conn = self.redis.clone();
        let now = Utc::now().timestamp_millis();
        let expired: Vec<String> = conn.zrangebyscore(&self.leases_key, "-inf", now).await?;

        let mut requeued = 0;
        for receipt in expired {
            // Whoever removes the lease owns the requeue.
            let claimed: i64 = conn.zrem(&self.leases_key, &receipt).await?;
            if claimed == 0 {
                continue;
            }

            let envelope: Option<String> = conn.hget(&self.inflight_key, &receipt).await?;
            if let Some(envelope) = envelope {
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .hdel(&self.inflight_key, &receipt)
                    .ignore()
                    .rpush(&self.queue_name, &envelope)
                    .ignore();
                pipe.query_async::<_, ()>(&mut conn).await?;
                requeued += 1;
            }
        }

        if requeued > 0 {
            debug!(queue = %self.queue_name, requeued, "Requeued expired leases");
        }
        Ok(requeued)
    }

    /// Number of messages waiting to be received.
    pub async fn pending_len(&self) -> Result<usize, ResourceError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.queue_name).await?;
        Ok(len)
    }

    /// Number of received, undeleted deliveries.
    pub async fn in_flight_len(&self) -> Result<usize, ResourceError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.hlen(&self.inflight_key).await?;
        Ok(len)
    }

    /// Deletes all queue keys.
    ///
    /// **Warning**: This permanently drops every waiting and in-flight message.
    pub async fn clear(&self) -> Result<(), ResourceError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.del(&self.queue_name)
            .del(&self.inflight_key)
            .del(&self.leases_key);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Pops the first envelope, blocking up to `wait_seconds`.
    async fn pop_first(&self, wait_seconds: u32) -> Result<Option<String>, ResourceError> {
        if wait_seconds == 0 {
            let mut conn = self.redis.clone();
            let data: Option<String> = redis::cmd("RPOP")
                .arg(&self.queue_name)
                .query_async(&mut conn)
                .await?;
            return Ok(data);
        }

        let mut conn = self.blocking.clone();
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.queue_name)
            .arg(wait_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_, data)| data))
    }

    /// Records a lease for a popped envelope and returns the delivery.
    async fn lease(&self, data: &str) -> Result<RawMessage, ResourceError> {
        let envelope = Envelope::parse(data);
        let entry = envelope.to_entry()?;
        let receipt = Uuid::new_v4().to_string();
        let deadline = Utc::now().timestamp_millis() + self.visibility_timeout.as_millis() as i64;

        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&self.inflight_key, &receipt, &entry)
            .ignore()
            .zadd(&self.leases_key, &receipt, deadline)
            .ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(RawMessage {
            id: envelope.id,
            body: envelope.body,
            receipt,
        })
    }
}

#[async_trait]
impl Resource for RedisResource {
    async fn receive_batch(
        &self,
        max_messages: usize,
        wait_seconds: u32,
    ) -> Result<Vec<RawMessage>, ResourceError> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }
        self.requeue_expired().await?;

        let Some(first) = self.pop_first(wait_seconds).await? else {
            return Ok(Vec::new());
        };

        let mut messages = Vec::with_capacity(max_messages);
        messages.push(self.lease(&first).await?);

        let mut conn = self.redis.clone();
        while messages.len() < max_messages {
            let data: Option<String> = redis::cmd("RPOP")
                .arg(&self.queue_name)
                .query_async(&mut conn)
                .await?;
            let Some(data) = data else {
                break;
            };
            messages.push(self.lease(&data).await?);
        }

        Ok(messages)
    }

    async fn delete_message(&self, receipt: &str) -> Result<(), ResourceError> {
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hdel(&self.inflight_key, receipt)
            .zrem(&self.leases_key, receipt)
            .ignore();
        let (removed,): (i64,) = pipe.query_async(&mut conn).await?;

        if removed == 0 {
            return Err(ResourceError::ReceiptNotFound(receipt.to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
