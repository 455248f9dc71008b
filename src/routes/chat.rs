use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;

use crate::app::AppState;
use crate::chat::ChatError;
use crate::error::ApiError;
use crate::models::api::{ChatRequest, ChatResponse, OwnerParams};

const MAX_QUESTION_CHARS: usize = 2000;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/chat", post(chat))
}

/// POST /chat?user_id=<int>: answer a question over the user's corpus.
async fn chat(
    State(state): State<Arc<AppState>>,
    Query(params): Query<OwnerParams>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let question = req.question.trim();
    if question.is_empty() || question.chars().count() > MAX_QUESTION_CHARS {
        return Err(ApiError::Validation(format!(
            "question must be between 1 and {MAX_QUESTION_CHARS} characters"
        )));
    }

    let top_k = req.top_k.unwrap_or(state.settings.top_k_default);
    if top_k < 1 || top_k > state.settings.top_k_max {
        return Err(ApiError::Validation(format!(
            "top_k must be between 1 and {}",
            state.settings.top_k_max
        )));
    }

    // When the question is scoped to one document, check it has anything to
    // retrieve from before spending an embedding call on it.
    if let Some(document_id) = req.document_id {
        let document = state
            .catalog
            .get_document(document_id)
            .await
            .map_err(ApiError::internal)?
            .filter(|doc| doc.user_id == params.user_id)
            .ok_or_else(|| {
                ApiError::NotFound(format!("Document not found: {document_id}"))
            })?;

        let chunk_count = state
            .catalog
            .count_chunks(document.id)
            .await
            .map_err(ApiError::internal)?;
        if chunk_count == 0 {
            return Err(ApiError::NoContent(format!(
                "Document {document_id} has no extractable content to search"
            )));
        }
    }

    let response = state
        .chat
        .ask(
            params.user_id,
            question,
            req.document_id,
            top_k,
            req.model.as_deref(),
        )
        .await
        .map_err(|e| match e {
            ChatError::NotFound => {
                ApiError::NotFound("Document not found".into())
            }
            ChatError::Upstream(err) if err.is_transient() => {
                ApiError::UpstreamUnavailable(
                    "An upstream model is unavailable. Please retry shortly.".into(),
                )
            }
            ChatError::Upstream(err) => ApiError::internal(err),
            ChatError::Internal(err) => ApiError::internal(err),
        })?;

    Ok(Json(response))
}
