use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::info;

use super::{CacheError, ProgressCache};
use crate::models::{CachedResult, TaskRecord};

const ALL_TASKS_KEY: &str = "all_tasks";

fn task_key(task_id: &str) -> String {
    format!("task:{task_id}")
}

fn result_key(task_id: &str) -> String {
    format!("result:{task_id}")
}

/// Redis-backed progress cache. Uses a multiplexed connection manager that
/// reconnects on its own; clones are cheap handles to the same connection.
pub struct RedisCache {
    conn: ConnectionManager,
    task_ttl_secs: u64,
    result_ttl_secs: u64,
}

impl RedisCache {
    pub async fn connect(
        url: &str,
        task_ttl_secs: u64,
        result_ttl_secs: u64,
    ) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Redis at {url}");
        Ok(Self {
            conn,
            task_ttl_secs,
            result_ttl_secs,
        })
    }

    fn backend(e: redis::RedisError) -> CacheError {
        CacheError::Backend(e.to_string())
    }
}

#[async_trait]
impl ProgressCache for RedisCache {
    async fn put_task(&self, record: &TaskRecord) -> Result<(), CacheError> {
        let key = task_key(&record.task_id);
        let fields: Vec<(String, String)> = record
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset_multiple(&key, &fields)
            .await
            .map_err(Self::backend)?;
        let _: () = conn
            .expire(&key, self.task_ttl_secs as i64)
            .await
            .map_err(Self::backend)?;
        Ok(())
    }

    async fn merge_task(
        &self,
        task_id: &str,
        fields: &[(&str, String)],
    ) -> Result<(), CacheError> {
        let key = task_key(task_id);
        let pairs: Vec<(String, String)> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset_multiple(&key, &pairs)
            .await
            .map_err(Self::backend)?;
        let _: () = conn
            .expire(&key, self.task_ttl_secs as i64)
            .await
            .map_err(Self::backend)?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, CacheError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(task_key(task_id))
            .await
            .map_err(Self::backend)?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(TaskRecord::from_fields(task_id, &fields)))
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(task_key(task_id)).await.map_err(Self::backend)?;
        Ok(())
    }

    async fn put_result(&self, result: &CachedResult) -> Result<(), CacheError> {
        let payload = serde_json::to_string(result)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(result_key(&result.task_id), payload, self.result_ttl_secs)
            .await
            .map_err(Self::backend)?;
        Ok(())
    }

    async fn get_result(&self, task_id: &str) -> Result<Option<CachedResult>, CacheError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn
            .get(result_key(task_id))
            .await
            .map_err(Self::backend)?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete_result(&self, task_id: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(result_key(task_id))
            .await
            .map_err(Self::backend)?;
        Ok(())
    }

    async fn push_task_id(&self, task_id: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .rpush(ALL_TASKS_KEY, task_id)
            .await
            .map_err(Self::backend)?;
        Ok(())
    }

    async fn remove_task_id(&self, task_id: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .lrem(ALL_TASKS_KEY, 0, task_id)
            .await
            .map_err(Self::backend)?;
        Ok(())
    }

    async fn list_task_ids(&self, offset: i64, limit: i64) -> Result<Vec<String>, CacheError> {
        if limit <= 0 {
            return Ok(vec![]);
        }
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .lrange(ALL_TASKS_KEY, offset as isize, (offset + limit - 1) as isize)
            .await
            .map_err(Self::backend)?;
        Ok(ids)
    }

    async fn task_count(&self) -> Result<i64, CacheError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.llen(ALL_TASKS_KEY).await.map_err(Self::backend)?;
        Ok(count)
    }

    async fn rate_limit_exceeded(
        &self,
        key: &str,
        max: u32,
        window_secs: u64,
    ) -> Result<bool, CacheError> {
        let counter_key = format!("rate:{key}");
        let mut conn = self.conn.clone();
        let hits: i64 = conn.incr(&counter_key, 1).await.map_err(Self::backend)?;
        if hits == 1 {
            let _: () = conn
                .expire(&counter_key, window_secs as i64)
                .await
                .map_err(Self::backend)?;
        }
        Ok(hits > max as i64)
    }

    async fn healthy(&self) -> bool {
        let mut conn = self.conn.clone();
        conn.llen::<_, i64>(ALL_TASKS_KEY).await.is_ok()
    }
}
