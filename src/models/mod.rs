pub mod api;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Document lifecycle status. Transitions are monotone:
/// PENDING → PROCESSING → {COMPLETED | FAILED}, with FAILED → PROCESSING
/// allowed on queue redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Completed => "COMPLETED",
            DocumentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DocumentStatus::Pending),
            "PROCESSING" => Some(DocumentStatus::Processing),
            "COMPLETED" => Some(DocumentStatus::Completed),
            "FAILED" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }

}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An API user. Owns documents; tenant boundary for search.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub api_key: String,
    pub created_at: DateTime<Utc>,
}

/// An uploaded document and its processing state. The authoritative record;
/// the cache only mirrors it for fast status reads.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub user_id: i64,
    pub filename: String,
    pub blob_handle: String,
    pub status: DocumentStatus,
    pub result_text: Option<String>,
    pub summary: Option<String>,
    pub error_message: Option<String>,
    pub page_count: Option<i32>,
    pub extraction_time_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Task ids are the document id rendered as a string.
    pub fn task_id(&self) -> String {
        self.id.to_string()
    }
}

/// Output of the parse stage.
#[derive(Debug, Clone)]
pub struct ParsedPdf {
    pub markdown: String,
    pub page_count: i32,
}

/// A chunk produced by the planner, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChunk {
    pub chunk_index: i32,
    pub text: String,
    pub token_count: i32,
}

/// A chunk with its embedding, ready to persist.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk_index: i32,
    pub text: String,
    pub token_count: i32,
    pub embedding: Vec<f32>,
}

/// Everything the final ingestion commit writes in one transaction.
#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    pub result_text: String,
    pub page_count: i32,
    pub extraction_time_seconds: f64,
    pub summary: Option<String>,
    pub chunks: Vec<EmbeddedChunk>,
}

/// A search hit: chunk plus provenance and similarity.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: i64,
    pub document_id: i64,
    pub chunk_index: i32,
    pub text: String,
    pub filename: String,
    pub similarity: f64,
}

/// Advisory task state mirrored into the cache. The document row stays
/// authoritative; this record may expire without affecting correctness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub task_id: String,
    pub status: DocumentStatus,
    pub progress: u8,
    pub filename: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn pending(task_id: String, filename: String, created_at: String) -> Self {
        Self {
            task_id,
            status: DocumentStatus::Pending,
            progress: 0,
            filename,
            created_at,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Flatten into hash fields for the cache.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("status", self.status.as_str().to_string()),
            ("progress", self.progress.to_string()),
            ("filename", self.filename.clone()),
            ("created_at", self.created_at.clone()),
            ("started_at", self.started_at.clone().unwrap_or_default()),
            (
                "completed_at",
                self.completed_at.clone().unwrap_or_default(),
            ),
            ("error", self.error.clone().unwrap_or_default()),
        ]
    }

    /// Rebuild from hash fields; unknown statuses collapse to PENDING.
    pub fn from_fields(
        task_id: &str,
        fields: &std::collections::HashMap<String, String>,
    ) -> Self {
        let opt = |k: &str| fields.get(k).filter(|v| !v.is_empty()).cloned();
        Self {
            task_id: task_id.to_string(),
            status: fields
                .get("status")
                .and_then(|s| DocumentStatus::parse(s))
                .unwrap_or(DocumentStatus::Pending),
            progress: fields
                .get("progress")
                .and_then(|p| p.parse().ok())
                .unwrap_or(0),
            filename: fields.get("filename").cloned().unwrap_or_default(),
            created_at: fields.get("created_at").cloned().unwrap_or_default(),
            started_at: opt("started_at"),
            completed_at: opt("completed_at"),
            error: opt("error"),
        }
    }
}

/// Short-TTL snapshot of an extraction result, cached for fast reads.
/// Absence means "read from the catalog".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResult {
    pub task_id: String,
    pub filename: String,
    pub page_count: Option<i32>,
    pub text: String,
    pub extraction_time_seconds: Option<f64>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_status_round_trip() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Completed,
            DocumentStatus::Failed,
        ] {
            assert_eq!(DocumentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DocumentStatus::parse("UNKNOWN"), None);
    }

    #[test]
    fn test_task_record_field_round_trip() {
        let rec = TaskRecord {
            task_id: "42".into(),
            status: DocumentStatus::Processing,
            progress: 40,
            filename: "report.pdf".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            started_at: Some("2026-01-01T00:00:05Z".into()),
            completed_at: None,
            error: None,
        };
        let fields: HashMap<String, String> = rec
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let restored = TaskRecord::from_fields("42", &fields);
        assert_eq!(restored, rec);
    }

    #[test]
    fn test_task_record_empty_optionals() {
        let fields: HashMap<String, String> = [
            ("status", "PENDING"),
            ("progress", "0"),
            ("filename", "a.pdf"),
            ("created_at", "2026-01-01T00:00:00Z"),
            ("started_at", ""),
            ("completed_at", ""),
            ("error", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let rec = TaskRecord::from_fields("7", &fields);
        assert_eq!(rec.started_at, None);
        assert_eq!(rec.completed_at, None);
        assert_eq!(rec.error, None);
    }

    #[test]
    fn test_cached_result_serde() {
        let result = CachedResult {
            task_id: "1".into(),
            filename: "doc.pdf".into(),
            page_count: Some(3),
            text: "# Title\n\nbody".into(),
            extraction_time_seconds: Some(2.5),
            summary: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        let restored: CachedResult = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.filename, "doc.pdf");
        assert_eq!(restored.page_count, Some(3));
        assert_eq!(restored.summary, None);
    }
}
