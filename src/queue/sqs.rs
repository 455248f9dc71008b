use async_trait::async_trait;
use aws_sdk_sqs::types::QueueAttributeName;
use aws_sdk_sqs::Client;
use tracing::info;

use super::{IngestJob, QueueError, QueueMessage, WorkQueue};

/// AWS SQS work queue. Long-polls with a 20 second wait and hides claimed
/// messages for the configured visibility timeout.
pub struct SqsQueue {
    client: Client,
    queue_url: String,
    visibility_timeout_secs: u32,
}

impl SqsQueue {
    pub fn new(
        aws_access_key: &str,
        aws_secret_key: &str,
        region: &str,
        queue_url: &str,
        visibility_timeout_secs: u32,
    ) -> Self {
        let creds = aws_sdk_sqs::config::Credentials::new(
            aws_access_key,
            aws_secret_key,
            None,
            None,
            "paperstore",
        );

        let config = aws_sdk_sqs::config::Builder::new()
            .region(aws_sdk_sqs::config::Region::new(region.to_string()))
            .credentials_provider(creds)
            .build();

        Self {
            client: Client::from_conf(config),
            queue_url: queue_url.to_string(),
            visibility_timeout_secs,
        }
    }
}

#[async_trait]
impl WorkQueue for SqsQueue {
    async fn enqueue(&self, job: &IngestJob) -> Result<(), QueueError> {
        let body = serde_json::to_string(job)?;
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::Transport(format!("{e}")))?;
        info!("Enqueued ingestion job for task {}", job.task_id);
        Ok(())
    }

    async fn poll(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max.clamp(1, 10) as i32)
            .wait_time_seconds(20)
            .visibility_timeout(self.visibility_timeout_secs as i32)
            .send()
            .await
            .map_err(|e| QueueError::Transport(format!("{e}")))?;

        let mut messages = Vec::new();
        for msg in resp.messages() {
            let (Some(body), Some(receipt)) = (msg.body(), msg.receipt_handle()) else {
                continue;
            };
            let job: IngestJob = serde_json::from_str(body)?;
            messages.push(QueueMessage {
                job,
                receipt: receipt.to_string(),
            });
        }
        Ok(messages)
    }

    async fn ack(&self, receipt: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| QueueError::Transport(format!("{e}")))?;
        Ok(())
    }

    async fn depth(&self) -> Result<i64, QueueError> {
        let resp = self
            .client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| QueueError::Transport(format!("{e}")))?;

        let depth = resp
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(depth)
    }
}
