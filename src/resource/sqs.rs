//! Amazon SQS backend.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::Client;
use tracing::{info, warn};

use super::{RawMessage, Resource};
use crate::error::ResourceError;

/// SQS caps a single receive at this many messages.
const SQS_MAX_BATCH: usize = 10;
/// SQS caps long polling at this many seconds.
const SQS_MAX_WAIT_SECONDS: u32 = 20;

/// Gateway to one SQS queue.
#[derive(Debug, Clone)]
pub struct SqsResource {
    client: Client,
    queue_url: String,
}

impl SqsResource {
    /// Builds a client from the default AWS credential chain.
    ///
    /// `endpoint_url` points the client at an SQS-compatible service such as
    /// ElasticMQ or LocalStack.
    pub async fn connect(
        queue_url: impl Into<String>,
        region: Option<String>,
        endpoint_url: Option<String>,
    ) -> Result<Self, ResourceError> {
        let queue_url = queue_url.into();
        if queue_url.is_empty() {
            return Err(ResourceError::ConnectionFailed(
                "SQS queue URL is empty".to_string(),
            ));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(endpoint_url) = endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let config = loader.load().await;

        info!(queue_url = %queue_url, "Configured SQS queue");

        Ok(Self::from_client(Client::new(&config), queue_url))
    }

    /// Wraps an already configured client.
    pub fn from_client(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl Resource for SqsResource {
    async fn receive_batch(
        &self,
        max_messages: usize,
        wait_seconds: u32,
    ) -> Result<Vec<RawMessage>, ResourceError> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.min(SQS_MAX_BATCH) as i32)
            .wait_time_seconds(wait_seconds.min(SQS_MAX_WAIT_SECONDS) as i32)
            .send()
            .await
            .map_err(|e| ResourceError::Sqs(DisplayErrorContext(&e).to_string()))?;

        let mut messages = Vec::with_capacity(output.messages().len());
        for message in output.messages() {
            match (
                message.message_id(),
                message.body(),
                message.receipt_handle(),
            ) {
                (Some(id), Some(body), Some(receipt)) => messages.push(RawMessage {
                    id: id.to_string(),
                    body: body.to_string(),
                    receipt: receipt.to_string(),
                }),
                _ => warn!(
                    message_id = ?message.message_id(),
                    "Skipping SQS message without id, body, or receipt handle"
                ),
            }
        }

        Ok(messages)
    }

    async fn delete_message(&self, receipt: &str) -> Result<(), ResourceError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| ResourceError::Sqs(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqs"
    }
}
