pub mod memory;
pub mod sqs;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ingestion job carried by the queue. One job per document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestJob {
    pub task_id: String,
    pub blob_handle: String,
    pub filename: String,
    pub user_id: i64,
    /// Optional summarization prompt supplied at upload time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// A claimed queue message. The receipt must be passed back to `ack` to
/// delete it; an unacked message reappears after the visibility timeout.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub job: IngestJob,
    pub receipt: String,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(String),
    #[error("malformed queue message: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Abstract work queue with at-least-once delivery and visibility-timeout
/// semantics.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue a job for processing.
    async fn enqueue(&self, job: &IngestJob) -> Result<(), QueueError>;

    /// Long-poll for up to `max` messages. May return early with fewer.
    async fn poll(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge (delete) a claimed message.
    async fn ack(&self, receipt: &str) -> Result<(), QueueError>;

    /// Approximate number of messages waiting or in flight.
    async fn depth(&self) -> Result<i64, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_wire_format() {
        let job = IngestJob {
            task_id: "42".into(),
            blob_handle: "uploads/abc.pdf".into(),
            filename: "report.pdf".into(),
            user_id: 1,
            prompt: None,
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["task_id"], "42");
        assert_eq!(json["blob_handle"], "uploads/abc.pdf");
        assert_eq!(json["user_id"], 1);
        assert!(json.get("prompt").is_none());

        let restored: IngestJob = serde_json::from_value(json).unwrap();
        assert_eq!(restored, job);
    }

    #[test]
    fn test_job_without_prompt_field_deserializes() {
        let json = r#"{"task_id":"1","blob_handle":"k","filename":"f.pdf","user_id":2}"#;
        let job: IngestJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.prompt, None);
    }
}
