pub mod redis;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{CachedResult, TaskRecord};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache payload error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Low-latency advisory store for task state and short-TTL results.
///
/// Every write is best-effort at the call site: a cache failure is logged
/// and never fails the operation that attempted it. The catalog remains
/// authoritative; readers fall back to it on a miss.
#[async_trait]
pub trait ProgressCache: Send + Sync {
    /// Write a full task record under `task:<id>`, refreshing its TTL.
    async fn put_task(&self, record: &TaskRecord) -> Result<(), CacheError>;

    /// Merge individual fields into `task:<id>`, refreshing its TTL.
    async fn merge_task(&self, task_id: &str, fields: &[(&str, String)])
        -> Result<(), CacheError>;

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, CacheError>;

    async fn delete_task(&self, task_id: &str) -> Result<(), CacheError>;

    /// Cache an extraction result under `result:<id>` with the short TTL.
    async fn put_result(&self, result: &CachedResult) -> Result<(), CacheError>;

    async fn get_result(&self, task_id: &str) -> Result<Option<CachedResult>, CacheError>;

    async fn delete_result(&self, task_id: &str) -> Result<(), CacheError>;

    /// Append a task id to the advisory `all_tasks` list.
    async fn push_task_id(&self, task_id: &str) -> Result<(), CacheError>;

    async fn remove_task_id(&self, task_id: &str) -> Result<(), CacheError>;

    async fn list_task_ids(&self, offset: i64, limit: i64) -> Result<Vec<String>, CacheError>;

    async fn task_count(&self) -> Result<i64, CacheError>;

    /// Sliding-window rate limit: returns true when the caller identified by
    /// `key` has exceeded `max` hits within the window.
    async fn rate_limit_exceeded(
        &self,
        key: &str,
        max: u32,
        window_secs: u64,
    ) -> Result<bool, CacheError>;

    /// Connectivity probe for the health endpoint.
    async fn healthy(&self) -> bool;
}
