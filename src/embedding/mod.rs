pub mod openai;

use async_trait::async_trait;

use crate::error::UpstreamError;

/// Abstract embedding model interface.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed a list of texts for ingestion, preserving order: output vector
    /// i corresponds to input text i. Batching happens inside.
    async fn embed_for_ingestion(&self, texts: &[String])
        -> Result<Vec<Vec<f32>>, UpstreamError>;

    /// Embed a single query string.
    async fn embed_for_query(&self, query: &str) -> Result<Vec<f32>, UpstreamError>;

    /// Return the embedding dimensions.
    fn dimensions(&self) -> u32;
}

/// L2-normalize in place. Providers usually return unit vectors already;
/// this makes cosine semantics hold even when they don't.
pub fn normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if magnitude > 0.0 && (magnitude - 1.0).abs() > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= magnitude;
        }
    }
}

/// Validate an embedding before it is persisted: exact dimension count,
/// every component finite.
pub fn validate_embedding(vector: &[f32], dimensions: u32) -> Result<(), String> {
    if vector.len() != dimensions as usize {
        return Err(format!(
            "embedding dimension mismatch: expected {dimensions}, got {}",
            vector.len()
        ));
    }
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(format!("non-finite embedding component at index {pos}"));
    }
    Ok(())
}
