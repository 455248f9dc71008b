use serde::{Deserialize, Serialize};

use super::{Document, DocumentStatus, TaskRecord, User};

// ──────────────────────────── Upload ────────────────────────────

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub task_ids: Vec<String>,
    pub total_files: usize,
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub user_id: i64,
    #[serde(default)]
    pub prompt: Option<String>,
}

// ──────────────────────────── Tasks ────────────────────────────

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: DocumentStatus,
    pub progress: u8,
    pub filename: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<TaskRecord> for TaskStatusResponse {
    fn from(rec: TaskRecord) -> Self {
        Self {
            task_id: rec.task_id,
            status: rec.status,
            progress: rec.progress,
            filename: rec.filename,
            created_at: rec.created_at,
            started_at: rec.started_at,
            completed_at: rec.completed_at,
            error: rec.error,
        }
    }
}

impl TaskStatusResponse {
    /// Synthesize a status view from the authoritative document row, for
    /// when the cache record has expired.
    pub fn from_document(doc: &Document) -> Self {
        let progress = match doc.status {
            DocumentStatus::Pending => 0,
            DocumentStatus::Processing => 50,
            DocumentStatus::Completed | DocumentStatus::Failed => 100,
        };
        Self {
            task_id: doc.task_id(),
            status: doc.status,
            progress,
            filename: doc.filename.clone(),
            created_at: doc.created_at.to_rfc3339(),
            started_at: doc.started_at.map(|t| t.to_rfc3339()),
            completed_at: doc.completed_at.map(|t| t.to_rfc3339()),
            error: doc.error_message.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub items: Vec<TaskStatusResponse>,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct TaskResultResponse {
    pub task_id: String,
    pub filename: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_time_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

// ──────────────────────────── Documents ────────────────────────────

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: i64,
    pub user_id: i64,
    pub filename: String,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_time_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            user_id: doc.user_id,
            filename: doc.filename,
            status: doc.status,
            page_count: doc.page_count,
            extraction_time_seconds: doc.extraction_time_seconds,
            error_message: doc.error_message,
            summary: doc.summary,
            created_at: doc.created_at.to_rfc3339(),
            started_at: doc.started_at.map(|t| t.to_rfc3339()),
            completed_at: doc.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListDocumentsParams {
    pub user_id: i64,
    #[serde(default)]
    pub status_filter: Option<String>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct OwnerParams {
    pub user_id: i64,
}

// ──────────────────────────── Users ────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub api_key: String,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            api_key: user.api_key,
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

// ──────────────────────────── Chat ────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub document_id: Option<i64>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatSource {
    pub document_id: i64,
    pub filename: String,
    pub chunk_index: i32,
    pub similarity: f64,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ChatUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<ChatSource>,
    pub chunks_found: usize,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChatUsage>,
}

// ──────────────────────────── Health ────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub postgres: bool,
    pub redis: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_chat_request_deserialization() {
        let json = r#"{"question": "What is the revenue?", "document_id": 12, "top_k": 3}"#;
        let req: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.question, "What is the revenue?");
        assert_eq!(req.document_id, Some(12));
        assert_eq!(req.top_k, Some(3));
        assert_eq!(req.model, None);
    }

    #[test]
    fn test_chat_request_defaults() {
        let req: ChatRequest = serde_json::from_str(r#"{"question": "hi"}"#).unwrap();
        assert_eq!(req.document_id, None);
        assert_eq!(req.top_k, None);
    }

    #[test]
    fn test_task_status_serializes_enum_uppercase() {
        let resp = TaskStatusResponse {
            task_id: "3".into(),
            status: DocumentStatus::Processing,
            progress: 40,
            filename: "a.pdf".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            started_at: None,
            completed_at: None,
            error: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "PROCESSING");
        assert!(json.get("started_at").is_none());
    }

    #[test]
    fn test_status_from_document_synthesizes_progress() {
        let doc = Document {
            id: 9,
            user_id: 1,
            filename: "x.pdf".into(),
            blob_handle: "uploads/x.pdf".into(),
            status: DocumentStatus::Completed,
            result_text: Some("text".into()),
            summary: None,
            error_message: None,
            page_count: Some(2),
            extraction_time_seconds: Some(1.0),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
        };
        let resp = TaskStatusResponse::from_document(&doc);
        assert_eq!(resp.task_id, "9");
        assert_eq!(resp.progress, 100);
        assert!(resp.completed_at.is_some());
    }
}
