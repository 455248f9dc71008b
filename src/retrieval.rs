//! Query-side retrieval: embed the question, run a tenant-scoped ANN
//! search, return ranked chunks with provenance.

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::embedding::{normalize, EmbeddingModel};
use crate::error::UpstreamError;
use crate::models::ScoredChunk;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// Unknown document, or a document owned by someone else. Collapsed
    /// into one case so responses don't reveal which.
    #[error("document not found")]
    NotFound,
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("catalog error: {0}")]
    Catalog(anyhow::Error),
}

pub struct Retriever {
    embedding: Arc<dyn EmbeddingModel>,
    catalog: Arc<dyn Catalog>,
    top_k_max: usize,
}

impl Retriever {
    pub fn new(
        embedding: Arc<dyn EmbeddingModel>,
        catalog: Arc<dyn Catalog>,
        top_k_max: usize,
    ) -> Self {
        Self {
            embedding,
            catalog,
            top_k_max,
        }
    }

    pub fn clamp_top_k(&self, top_k: usize) -> usize {
        top_k.clamp(1, self.top_k_max)
    }

    /// Retrieve the `top_k` most similar chunks for `user_id`, optionally
    /// restricted to one document. The ownership check happens before any
    /// search work so a foreign document id costs nothing and returns the
    /// same NotFound an unknown id does.
    pub async fn search(
        &self,
        user_id: i64,
        query: &str,
        top_k: usize,
        document_id: Option<i64>,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let top_k = self.clamp_top_k(top_k);

        if let Some(document_id) = document_id {
            let doc = self
                .catalog
                .get_document(document_id)
                .await
                .map_err(RetrievalError::Catalog)?;
            match doc {
                Some(doc) if doc.user_id == user_id => {}
                _ => return Err(RetrievalError::NotFound),
            }
        }

        let mut query_vector = self.embedding.embed_for_query(query).await?;
        normalize(&mut query_vector);

        let chunks = self
            .catalog
            .ann_search(user_id, &query_vector, top_k as i64, document_id)
            .await
            .map_err(RetrievalError::Catalog)?;

        Ok(chunks)
    }
}
