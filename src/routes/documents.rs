use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

use crate::app::AppState;
use crate::error::ApiError;
use crate::models::api::{DocumentResponse, HealthResponse, ListDocumentsParams, OwnerParams};
use crate::models::DocumentStatus;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/documents", get(list_documents))
        .route("/documents/{document_id}", get(get_document))
}

/// GET /health: liveness of the two stores.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let postgres = state.catalog.healthy().await;
    let redis = state.cache.healthy().await;
    let status = if postgres { "healthy" } else { "unhealthy" };
    Json(HealthResponse {
        status: status.to_string(),
        postgres,
        redis,
    })
}

/// GET /documents?user_id=&status_filter=&offset=&limit=
async fn list_documents(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListDocumentsParams>,
) -> Result<Json<Vec<DocumentResponse>>, ApiError> {
    if params.offset < 0 || params.limit < 1 || params.limit > 1000 {
        return Err(ApiError::Validation(
            "offset must be >= 0 and limit in 1..=1000".into(),
        ));
    }

    let status = match &params.status_filter {
        Some(raw) => Some(DocumentStatus::parse(raw).ok_or_else(|| {
            ApiError::Validation(format!(
                "Invalid status_filter: {raw}. \
                 Expected PENDING, PROCESSING, COMPLETED or FAILED."
            ))
        })?),
        None => None,
    };

    let documents = state
        .catalog
        .list_documents(params.user_id, status, params.offset, params.limit)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(documents.into_iter().map(Into::into).collect()))
}

/// GET /documents/{id}?user_id=: one document; 404 when not owned, so a
/// foreign id is indistinguishable from a missing one.
async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<i64>,
    Query(params): Query<OwnerParams>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let document = state
        .catalog
        .get_document(document_id)
        .await
        .map_err(ApiError::internal)?
        .filter(|doc| doc.user_id == params.user_id)
        .ok_or_else(|| ApiError::NotFound(format!("Document not found: {document_id}")))?;

    Ok(Json(document.into()))
}
