pub mod postgres;

use async_trait::async_trait;

use crate::models::{Document, DocumentStatus, IngestionOutcome, ScoredChunk, User};

/// Authoritative relational store: users, documents, chunks and their
/// vectors. The ANN index lives alongside the chunks and is maintained by
/// the same writes.
#[async_trait]
pub trait Catalog: Send + Sync {
    // ──────────── users ────────────

    /// Create a user; returns None when the email is already taken.
    async fn create_user(&self, email: &str, api_key: &str) -> anyhow::Result<Option<User>>;

    async fn get_user(&self, user_id: i64) -> anyhow::Result<Option<User>>;

    /// Fetch the user, creating a placeholder account on first use.
    async fn ensure_user(&self, user_id: i64) -> anyhow::Result<User>;

    // ──────────── documents ────────────

    async fn create_document(
        &self,
        user_id: i64,
        filename: &str,
        blob_handle: &str,
    ) -> anyhow::Result<Document>;

    async fn get_document(&self, document_id: i64) -> anyhow::Result<Option<Document>>;

    async fn list_documents(
        &self,
        user_id: i64,
        status: Option<DocumentStatus>,
        offset: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<Document>>;

    /// PENDING or FAILED → PROCESSING, stamping started_at. Returns false
    /// when the document was in neither state (already claimed or terminal).
    async fn mark_processing(&self, document_id: i64) -> anyhow::Result<bool>;

    async fn mark_failed(&self, document_id: i64, error: &str) -> anyhow::Result<()>;

    /// The single ingestion commit: delete any existing chunks for the
    /// document, insert the new set, and flip the document to COMPLETED with
    /// its extraction metadata. All or nothing; a concurrent reader sees the
    /// old state or the new state, never a partial chunk set.
    async fn complete_ingestion(
        &self,
        document_id: i64,
        outcome: &IngestionOutcome,
    ) -> anyhow::Result<()>;

    /// Delete the document, cascading to its chunks (and their index
    /// entries). Returns the blob handle so the caller can clean up storage.
    async fn delete_document(&self, document_id: i64) -> anyhow::Result<Option<String>>;

    async fn count_chunks(&self, document_id: i64) -> anyhow::Result<i64>;

    // ──────────── search ────────────

    /// Tenant-scoped nearest-neighbor search over chunk embeddings, cosine
    /// metric. `document_id` narrows the search to one document. Results are
    /// ordered by descending similarity, ties broken by ascending chunk id.
    async fn ann_search(
        &self,
        user_id: i64,
        query_vector: &[f32],
        top_k: i64,
        document_id: Option<i64>,
    ) -> anyhow::Result<Vec<ScoredChunk>>;

    // ──────────── maintenance ────────────

    /// Documents stuck in PENDING for at least `min_age_secs`, for the
    /// reconciliation sweeper.
    async fn pending_older_than(
        &self,
        min_age_secs: u64,
        limit: i64,
    ) -> anyhow::Result<Vec<Document>>;

    /// Connectivity probe for the health endpoint.
    async fn healthy(&self) -> bool;
}

/// Render an embedding as a pgvector literal, e.g. `[0.1,0.2,...]`.
pub fn vector_literal(embedding: &[f32]) -> String {
    let mut out = String::with_capacity(embedding.len() * 10 + 2);
    out.push('[');
    for (i, v) in embedding.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal_format() {
        assert_eq!(vector_literal(&[]), "[]");
        assert_eq!(vector_literal(&[1.0]), "[1]");
        assert_eq!(vector_literal(&[0.5, -0.25, 2.0]), "[0.5,-0.25,2]");
    }
}
