use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use super::{vector_literal, Catalog};
use crate::models::{Document, DocumentStatus, IngestionOutcome, ScoredChunk, User};

const DOCUMENT_COLUMNS: &str = "id, user_id, filename, blob_handle, status, result_text, \
     summary, error_message, page_count, extraction_time_seconds, \
     created_at, started_at, completed_at";

/// PostgreSQL catalog with a pgvector-backed ANN index over chunk
/// embeddings.
pub struct PostgresCatalog {
    pool: PgPool,
    dimensions: u32,
    ann_m: u32,
    ann_ef_construction: u32,
    ef_search: u32,
}

impl PostgresCatalog {
    pub async fn new(
        uri: &str,
        pool_size: u32,
        acquire_timeout_secs: u64,
        dimensions: u32,
        ann_m: u32,
        ann_ef_construction: u32,
        ef_search: u32,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(std::time::Duration::from_secs(acquire_timeout_secs))
            .test_before_acquire(true)
            .connect(uri)
            .await?;

        info!("Connected to PostgreSQL (pool_size={pool_size})");
        Ok(Self {
            pool,
            dimensions,
            ann_m,
            ann_ef_construction,
            ef_search,
        })
    }

    /// Create extension, tables and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id BIGSERIAL PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                api_key TEXT NOT NULL UNIQUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                filename TEXT NOT NULL,
                blob_handle TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                result_text TEXT,
                summary TEXT,
                error_message TEXT,
                page_count INTEGER,
                extraction_time_seconds DOUBLE PRECISION,
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ
            )",
        )
        .execute(&self.pool)
        .await?;

        let create_chunks = format!(
            "CREATE TABLE IF NOT EXISTS document_chunks (
                id BIGSERIAL PRIMARY KEY,
                document_id BIGINT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                text_content TEXT NOT NULL,
                embedding vector({}) NOT NULL,
                token_count INTEGER,
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            self.dimensions
        );
        sqlx::query(&create_chunks).execute(&self.pool).await?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_documents_user_status ON documents(user_id, status)",
            "CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_user_id ON document_chunks(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_document_chunk \
             ON document_chunks(document_id, chunk_index)",
        ] {
            sqlx::query(stmt).execute(&self.pool).await?;
        }

        let create_hnsw = format!(
            "CREATE INDEX IF NOT EXISTS idx_chunks_embedding_hnsw ON document_chunks \
             USING hnsw (embedding vector_cosine_ops) \
             WITH (m = {}, ef_construction = {})",
            self.ann_m, self.ann_ef_construction
        );
        sqlx::query(&create_hnsw).execute(&self.pool).await?;

        info!("Catalog schema initialized (vector({}))", self.dimensions);
        Ok(())
    }

    /// Check that nearest-neighbor queries actually use the HNSW index.
    /// Degraded (sequential-scan) retrieval still works, just slowly, so a
    /// missing index is a warning rather than a startup failure.
    pub async fn verify_ann_index(&self) -> anyhow::Result<bool> {
        let zero = vector_literal(&vec![0.0f32; self.dimensions as usize]);
        let explain = format!(
            "EXPLAIN SELECT id FROM document_chunks \
             ORDER BY embedding <=> '{zero}'::vector LIMIT 1"
        );
        let rows = sqlx::query(&explain).fetch_all(&self.pool).await?;
        let plan: String = rows
            .iter()
            .map(|r| r.get::<String, _>(0))
            .collect::<Vec<_>>()
            .join("\n");

        let uses_index = plan.contains("idx_chunks_embedding_hnsw");
        if uses_index {
            info!("ANN queries use the HNSW index");
        } else {
            warn!("ANN index not used; retrieval will fall back to sequential scan:\n{plan}");
        }
        Ok(uses_index)
    }

    fn row_to_document(row: &PgRow) -> Document {
        let status: String = row.get("status");
        Document {
            id: row.get("id"),
            user_id: row.get("user_id"),
            filename: row.get("filename"),
            blob_handle: row.get("blob_handle"),
            status: DocumentStatus::parse(&status).unwrap_or(DocumentStatus::Pending),
            result_text: row.get("result_text"),
            summary: row.get("summary"),
            error_message: row.get("error_message"),
            page_count: row.get("page_count"),
            extraction_time_seconds: row.get("extraction_time_seconds"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        }
    }

    fn row_to_user(row: &PgRow) -> User {
        User {
            id: row.get("id"),
            email: row.get("email"),
            api_key: row.get("api_key"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl Catalog for PostgresCatalog {
    async fn create_user(&self, email: &str, api_key: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query(
            "INSERT INTO users (email, api_key) VALUES ($1, $2)
             ON CONFLICT (email) DO NOTHING
             RETURNING id, email, api_key, created_at",
        )
        .bind(email)
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_user(&r)))
    }

    async fn get_user(&self, user_id: i64) -> anyhow::Result<Option<User>> {
        let row = sqlx::query("SELECT id, email, api_key, created_at FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Self::row_to_user(&r)))
    }

    async fn ensure_user(&self, user_id: i64) -> anyhow::Result<User> {
        if let Some(user) = self.get_user(user_id).await? {
            return Ok(user);
        }

        let email = format!("user{user_id}@paperstore.local");
        let api_key = format!("user{user_id}-key-{}", uuid::Uuid::new_v4());
        sqlx::query(
            "INSERT INTO users (id, email, api_key) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(user_id)
        .bind(&email)
        .bind(&api_key)
        .execute(&self.pool)
        .await?;

        // Keep the sequence ahead of explicitly assigned ids.
        sqlx::query("SELECT setval('users_id_seq', (SELECT MAX(id) FROM users))")
            .execute(&self.pool)
            .await?;

        self.get_user(user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user {user_id} missing after insert"))
    }

    async fn create_document(
        &self,
        user_id: i64,
        filename: &str,
        blob_handle: &str,
    ) -> anyhow::Result<Document> {
        let row = sqlx::query(&format!(
            "INSERT INTO documents (user_id, filename, blob_handle, status)
             VALUES ($1, $2, $3, 'PENDING')
             RETURNING {DOCUMENT_COLUMNS}"
        ))
        .bind(user_id)
        .bind(filename)
        .bind(blob_handle)
        .fetch_one(&self.pool)
        .await?;

        Ok(Self::row_to_document(&row))
    }

    async fn get_document(&self, document_id: i64) -> anyhow::Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1"
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Self::row_to_document(&r)))
    }

    async fn list_documents(
        &self,
        user_id: i64,
        status: Option<DocumentStatus>,
        offset: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<Document>> {
        let rows = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents
                 WHERE user_id = $1 AND status = $2
                 ORDER BY created_at DESC
                 OFFSET $3 LIMIT $4"
            ))
            .bind(user_id)
            .bind(status.as_str())
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents
                 WHERE user_id = $1
                 ORDER BY created_at DESC
                 OFFSET $2 LIMIT $3"
            ))
            .bind(user_id)
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows.iter().map(Self::row_to_document).collect())
    }

    async fn mark_processing(&self, document_id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE documents
             SET status = 'PROCESSING', started_at = CURRENT_TIMESTAMP, error_message = NULL
             WHERE id = $1 AND status IN ('PENDING', 'FAILED')",
        )
        .bind(document_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, document_id: i64, error: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE documents
             SET status = 'FAILED', error_message = $2, completed_at = CURRENT_TIMESTAMP
             WHERE id = $1",
        )
        .bind(document_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_ingestion(
        &self,
        document_id: i64,
        outcome: &IngestionOutcome,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        // Lock the row; a concurrently deleted document aborts the commit.
        let user_id: Option<i64> =
            sqlx::query_scalar("SELECT user_id FROM documents WHERE id = $1 FOR UPDATE")
                .bind(document_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(user_id) = user_id else {
            anyhow::bail!("document {document_id} no longer exists");
        };

        // Delete-then-insert keeps redelivered messages idempotent.
        sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in &outcome.chunks {
            sqlx::query(
                "INSERT INTO document_chunks
                 (document_id, user_id, chunk_index, text_content, embedding, token_count)
                 VALUES ($1, $2, $3, $4, $5::vector, $6)",
            )
            .bind(document_id)
            .bind(user_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(vector_literal(&chunk.embedding))
            .bind(chunk.token_count)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE documents
             SET status = 'COMPLETED',
                 result_text = $2,
                 page_count = $3,
                 extraction_time_seconds = $4,
                 summary = COALESCE($5, summary),
                 error_message = NULL,
                 completed_at = CURRENT_TIMESTAMP
             WHERE id = $1",
        )
        .bind(document_id)
        .bind(&outcome.result_text)
        .bind(outcome.page_count)
        .bind(outcome.extraction_time_seconds)
        .bind(&outcome.summary)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            "Committed ingestion for document {document_id} ({} chunks)",
            outcome.chunks.len()
        );
        Ok(())
    }

    async fn delete_document(&self, document_id: i64) -> anyhow::Result<Option<String>> {
        let blob_handle: Option<String> =
            sqlx::query_scalar("DELETE FROM documents WHERE id = $1 RETURNING blob_handle")
                .bind(document_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(blob_handle)
    }

    async fn count_chunks(&self, document_id: i64) -> anyhow::Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks WHERE document_id = $1")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn ann_search(
        &self,
        user_id: i64,
        query_vector: &[f32],
        top_k: i64,
        document_id: Option<i64>,
    ) -> anyhow::Result<Vec<ScoredChunk>> {
        let embedding = vector_literal(query_vector);

        let mut tx = self.pool.begin().await?;
        // Scoped to this transaction; ignored when the extension lacks it.
        sqlx::query(&format!("SET LOCAL hnsw.ef_search = {}", self.ef_search))
            .execute(&mut *tx)
            .await
            .ok();

        let rows = if let Some(document_id) = document_id {
            sqlx::query(
                "SELECT dc.id, dc.document_id, dc.chunk_index, dc.text_content, d.filename,
                        dc.embedding <=> $1::vector AS distance
                 FROM document_chunks dc
                 JOIN documents d ON d.id = dc.document_id
                 WHERE dc.user_id = $2 AND dc.document_id = $3
                 ORDER BY dc.embedding <=> $1::vector
                 LIMIT $4",
            )
            .bind(&embedding)
            .bind(user_id)
            .bind(document_id)
            .bind(top_k)
            .fetch_all(&mut *tx)
            .await?
        } else {
            sqlx::query(
                "SELECT dc.id, dc.document_id, dc.chunk_index, dc.text_content, d.filename,
                        dc.embedding <=> $1::vector AS distance
                 FROM document_chunks dc
                 JOIN documents d ON d.id = dc.document_id
                 WHERE dc.user_id = $2
                 ORDER BY dc.embedding <=> $1::vector
                 LIMIT $3",
            )
            .bind(&embedding)
            .bind(user_id)
            .bind(top_k)
            .fetch_all(&mut *tx)
            .await?
        };
        tx.commit().await?;

        let mut chunks: Vec<ScoredChunk> = rows
            .into_iter()
            .map(|row| {
                let distance: f64 = row.get("distance");
                ScoredChunk {
                    chunk_id: row.get("id"),
                    document_id: row.get("document_id"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text_content"),
                    filename: row.get("filename"),
                    similarity: (1.0 - distance).clamp(0.0, 1.0),
                }
            })
            .collect();

        // The index scan orders by distance only; break similarity ties by
        // chunk id so results are reproducible.
        chunks.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        Ok(chunks)
    }

    async fn pending_older_than(
        &self,
        min_age_secs: u64,
        limit: i64,
    ) -> anyhow::Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE status = 'PENDING'
               AND created_at < CURRENT_TIMESTAMP - make_interval(secs => $1)
             ORDER BY created_at
             LIMIT $2"
        ))
        .bind(min_age_secs as f64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_document).collect())
    }

    async fn healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
