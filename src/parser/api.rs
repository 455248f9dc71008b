use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

use super::PdfParser;
use crate::error::UpstreamError;
use crate::models::ParsedPdf;
use crate::retry::{retry_with_backoff, BackoffPolicy};

const SERVICE: &str = "parser";

/// Parser backed by an external parse API: the PDF is posted as multipart
/// and comes back as markdown with tables preserved inline.
pub struct ApiParser {
    endpoint: String,
    http_client: reqwest::Client,
    backoff: BackoffPolicy,
}

#[derive(Deserialize)]
struct ParseResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    page_count: Option<i32>,
}

impl ApiParser {
    pub fn new(endpoint: String, request_timeout_secs: u64) -> Self {
        Self {
            endpoint,
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(request_timeout_secs))
                .build()
                .unwrap_or_default(),
            backoff: BackoffPolicy::default(),
        }
    }

    async fn parse_once(
        &self,
        file_bytes: &[u8],
        filename: &str,
    ) -> Result<ParsedPdf, UpstreamError> {
        let url = format!("{}/parse", self.endpoint);
        let part = reqwest::multipart::Part::bytes(file_bytes.to_vec())
            .file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .http_client
            .post(&url)
            .multipart(form)
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

        let parsed: ParseResponse =
            resp.json().await.map_err(|e| UpstreamError::Malformed {
                service: SERVICE,
                detail: e.to_string(),
            })?;

        Ok(ParsedPdf {
            markdown: parsed.text,
            page_count: parsed.page_count.unwrap_or(0),
        })
    }
}

#[async_trait]
impl PdfParser for ApiParser {
    async fn parse(&self, path: &Path, filename: &str) -> Result<ParsedPdf, UpstreamError> {
        let file_bytes = tokio::fs::read(path).await.map_err(|source| UpstreamError::Io {
            service: SERVICE,
            source,
        })?;

        retry_with_backoff(
            &self.backoff,
            "pdf parse",
            UpstreamError::is_transient,
            || self.parse_once(&file_bytes, filename),
        )
        .await
    }
}
