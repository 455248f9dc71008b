use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{IngestJob, QueueError, QueueMessage, WorkQueue};

/// In-process work queue with real visibility-timeout semantics. The
/// development provider, and the double the pipeline tests run against.
pub struct MemoryQueue {
    visibility_timeout: Duration,
    poll_wait: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    ready: VecDeque<IngestJob>,
    /// receipt → (job, instant at which the claim lapses and the job
    /// becomes visible again)
    in_flight: HashMap<String, (IngestJob, Instant)>,
    next_receipt: u64,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            poll_wait: Duration::from_secs(20),
            inner: Mutex::new(Inner {
                ready: VecDeque::new(),
                in_flight: HashMap::new(),
                next_receipt: 0,
            }),
        }
    }

    /// Shorten the long-poll wait; used by tests.
    pub fn with_poll_wait(mut self, poll_wait: Duration) -> Self {
        self.poll_wait = poll_wait;
        self
    }

    /// Move lapsed claims back to the ready queue, then claim up to `max`.
    fn try_claim(&self, max: usize) -> Vec<QueueMessage> {
        let mut inner = self.inner.lock().expect("memory queue lock poisoned");
        let now = Instant::now();

        let lapsed: Vec<String> = inner
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in lapsed {
            if let Some((job, _)) = inner.in_flight.remove(&receipt) {
                inner.ready.push_back(job);
            }
        }

        let mut claimed = Vec::new();
        while claimed.len() < max {
            let Some(job) = inner.ready.pop_front() else {
                break;
            };
            inner.next_receipt += 1;
            let receipt = format!("receipt-{}", inner.next_receipt);
            inner
                .in_flight
                .insert(receipt.clone(), (job.clone(), now + self.visibility_timeout));
            claimed.push(QueueMessage { job, receipt });
        }
        claimed
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, job: &IngestJob) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().expect("memory queue lock poisoned");
        inner.ready.push_back(job.clone());
        Ok(())
    }

    async fn poll(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + self.poll_wait;
        loop {
            let claimed = self.try_claim(max);
            if !claimed.is_empty() {
                return Ok(claimed);
            }
            if Instant::now() >= deadline {
                return Ok(vec![]);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn ack(&self, receipt: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().expect("memory queue lock poisoned");
        inner.in_flight.remove(receipt);
        Ok(())
    }

    async fn depth(&self) -> Result<i64, QueueError> {
        let inner = self.inner.lock().expect("memory queue lock poisoned");
        Ok((inner.ready.len() + inner.in_flight.len()) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> IngestJob {
        IngestJob {
            task_id: id.to_string(),
            blob_handle: format!("uploads/{id}.pdf"),
            filename: format!("{id}.pdf"),
            user_id: 1,
            prompt: None,
        }
    }

    #[tokio::test]
    async fn test_enqueue_poll_ack() {
        let queue = MemoryQueue::new(Duration::from_secs(30))
            .with_poll_wait(Duration::from_millis(10));
        queue.enqueue(&job("1")).await.unwrap();

        let messages = queue.poll(1).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].job.task_id, "1");
        assert_eq!(queue.depth().await.unwrap(), 1);

        queue.ack(&messages[0].receipt).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 0);
        assert!(queue.poll(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claimed_message_is_invisible() {
        let queue = MemoryQueue::new(Duration::from_secs(30))
            .with_poll_wait(Duration::from_millis(10));
        queue.enqueue(&job("1")).await.unwrap();

        let first = queue.poll(1).await.unwrap();
        assert_eq!(first.len(), 1);
        // Still claimed: a second poll sees nothing.
        assert!(queue.poll(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unacked_message_redelivered_after_visibility_timeout() {
        let queue = MemoryQueue::new(Duration::from_millis(50))
            .with_poll_wait(Duration::from_millis(200));
        queue.enqueue(&job("1")).await.unwrap();

        let first = queue.poll(1).await.unwrap();
        assert_eq!(first.len(), 1);

        // Simulated worker death: never ack. The claim lapses.
        let second = queue.poll(1).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].job.task_id, "1");
        assert_ne!(second[0].receipt, first[0].receipt);
    }

    #[tokio::test]
    async fn test_poll_respects_max() {
        let queue = MemoryQueue::new(Duration::from_secs(30))
            .with_poll_wait(Duration::from_millis(10));
        for i in 0..5 {
            queue.enqueue(&job(&i.to_string())).await.unwrap();
        }
        let messages = queue.poll(2).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(queue.depth().await.unwrap(), 5);
    }
}
