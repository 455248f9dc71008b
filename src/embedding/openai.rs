use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{normalize, EmbeddingModel};
use crate::error::UpstreamError;
use crate::retry::{retry_with_backoff, BackoffPolicy};

const SERVICE: &str = "embedding";

/// OpenAI embedding model via API.
pub struct OpenAIEmbeddingModel {
    model_name: String,
    api_key: String,
    dimensions: u32,
    http_client: reqwest::Client,
    batch_size: usize,
    backoff: BackoffPolicy,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAIEmbeddingModel {
    pub fn new(model_name: &str, api_key: &str, dimensions: u32, batch_size: usize) -> Self {
        Self {
            model_name: model_name.to_string(),
            api_key: api_key.to_string(),
            dimensions,
            http_client: reqwest::Client::new(),
            batch_size: batch_size.max(1),
            backoff: BackoffPolicy::default(),
        }
    }

    async fn embed_batch_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
        let request = EmbeddingRequest {
            model: self.model_name.clone(),
            input: texts.to_vec(),
        };

        let resp = self
            .http_client
            .post("https://api.openai.com/v1/embeddings")
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|source| UpstreamError::Transport {
                service: SERVICE,
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        let response: EmbeddingResponse =
            resp.json().await.map_err(|e| UpstreamError::Malformed {
                service: SERVICE,
                detail: e.to_string(),
            })?;

        if response.data.len() != texts.len() {
            return Err(UpstreamError::Malformed {
                service: SERVICE,
                detail: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    response.data.len()
                ),
            });
        }

        let mut embeddings: Vec<Vec<f32>> =
            response.data.into_iter().map(|d| d.embedding).collect();

        for emb in &mut embeddings {
            if emb.len() != self.dimensions as usize {
                return Err(UpstreamError::Malformed {
                    service: SERVICE,
                    detail: format!(
                        "embedding dimension mismatch: expected {}, got {}",
                        self.dimensions,
                        emb.len()
                    ),
                });
            }
            // The provider claims unit vectors for this model family;
            // normalize anyway so cosine scores stay in range.
            normalize(emb);
        }

        Ok(embeddings)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
        retry_with_backoff(
            &self.backoff,
            "embedding batch",
            UpstreamError::is_transient,
            || self.embed_batch_once(texts),
        )
        .await
    }
}

#[async_trait]
impl EmbeddingModel for OpenAIEmbeddingModel {
    async fn embed_for_ingestion(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, UpstreamError> {
        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embeddings = self.embed_batch(batch).await?;
            all_embeddings.extend(embeddings);
        }
        Ok(all_embeddings)
    }

    async fn embed_for_query(&self, query: &str) -> Result<Vec<f32>, UpstreamError> {
        let results = self.embed_batch(&[query.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| UpstreamError::Malformed {
                service: SERVICE,
                detail: "no embedding returned for query".into(),
            })
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_request_serialization() {
        let req = EmbeddingRequest {
            model: "text-embedding-3-small".to_string(),
            input: vec!["hello world".to_string()],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["input"][0], "hello world");
    }

    #[test]
    fn test_embedding_response_deserialization() {
        let json = r#"{
            "data": [
                {"embedding": [0.1, 0.2, 0.3], "index": 0, "object": "embedding"}
            ],
            "model": "text-embedding-3-small",
            "object": "list",
            "usage": {"prompt_tokens": 2, "total_tokens": 2}
        }"#;
        let resp: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.data.len(), 1);
        assert_eq!(resp.data[0].embedding.len(), 3);
    }
}
