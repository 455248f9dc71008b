use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::error::ApiError;
use crate::models::api::{
    PageParams, TaskListResponse, TaskResultResponse, TaskStatusResponse,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status/{task_id}", get(task_status))
        .route("/result/{task_id}", get(task_result))
        .route("/tasks", get(list_tasks))
        .route("/task/{task_id}", delete(delete_task))
}

/// GET /status/{task_id}: live progress from the cache, synthesized from
/// the document row when the cache record has expired.
async fn task_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    match state.cache.get_task(&task_id).await {
        Ok(Some(record)) => return Ok(Json(record.into())),
        Ok(None) => {}
        Err(e) => warn!("Status cache read failed for {task_id}: {e}"),
    }

    let document_id: i64 = task_id
        .parse()
        .map_err(|_| ApiError::NotFound(format!("Task not found: {task_id}")))?;
    let document = state
        .catalog
        .get_document(document_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::NotFound(format!("Task not found: {task_id}")))?;

    Ok(Json(TaskStatusResponse::from_document(&document)))
}

/// GET /result/{task_id}: cached result first, catalog fallback after the
/// cache TTL has lapsed. 404 only when both miss.
async fn task_result(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskResultResponse>, ApiError> {
    match state.cache.get_result(&task_id).await {
        Ok(Some(result)) => {
            return Ok(Json(TaskResultResponse {
                task_id: result.task_id,
                filename: result.filename,
                text: result.text,
                page_count: result.page_count,
                extraction_time_seconds: result.extraction_time_seconds,
                summary: result.summary,
            }));
        }
        Ok(None) => {}
        Err(e) => warn!("Result cache read failed for {task_id}: {e}"),
    }

    let not_found = || ApiError::NotFound(format!("Result not found for task: {task_id}"));
    let document_id: i64 = task_id.parse().map_err(|_| not_found())?;
    let document = state
        .catalog
        .get_document(document_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(not_found)?;

    let Some(text) = document.result_text.clone().filter(|t| !t.is_empty()) else {
        return Err(not_found());
    };

    Ok(Json(TaskResultResponse {
        task_id,
        filename: document.filename,
        text,
        page_count: document.page_count,
        extraction_time_seconds: document.extraction_time_seconds,
        summary: document.summary,
    }))
}

/// GET /tasks?offset&limit: recent tasks from the advisory cache list.
async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageParams>,
) -> Result<Json<TaskListResponse>, ApiError> {
    if params.offset < 0 || params.limit < 1 || params.limit > 100 {
        return Err(ApiError::Validation(
            "offset must be >= 0 and limit in 1..=100".into(),
        ));
    }

    let total = state
        .cache
        .task_count()
        .await
        .map_err(|e| ApiError::UpstreamUnavailable(format!("Task list unavailable: {e}")))?;
    let ids = state
        .cache
        .list_task_ids(params.offset, params.limit)
        .await
        .map_err(|e| ApiError::UpstreamUnavailable(format!("Task list unavailable: {e}")))?;

    let mut items = Vec::with_capacity(ids.len());
    for id in ids {
        match state.cache.get_task(&id).await {
            Ok(Some(record)) => items.push(record.into()),
            Ok(None) => {} // expired entry still referenced by the list
            Err(e) => warn!("Task read failed for {id}: {e}"),
        }
    }

    Ok(Json(TaskListResponse { items, total }))
}

/// DELETE /task/{task_id}: remove the document (cascading chunks), its
/// cache entries, and best-effort its blob.
async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let document_id: Option<i64> = task_id.parse().ok();

    let cached = state
        .cache
        .get_task(&task_id)
        .await
        .unwrap_or_else(|e| {
            warn!("Task cache read failed for {task_id}: {e}");
            None
        });

    let mut blob_handle = None;
    let mut found_in_catalog = false;
    if let Some(document_id) = document_id {
        blob_handle = state
            .catalog
            .delete_document(document_id)
            .await
            .map_err(ApiError::internal)?;
        found_in_catalog = blob_handle.is_some();
    }

    if !found_in_catalog && cached.is_none() {
        return Err(ApiError::NotFound(format!("Task not found: {task_id}")));
    }

    if let Some(handle) = blob_handle {
        if let Err(e) = state.blobs.delete(&handle).await {
            warn!("Blob delete failed for {handle}: {e}");
        }
    }

    for op in [
        state.cache.delete_task(&task_id).await,
        state.cache.delete_result(&task_id).await,
        state.cache.remove_task_id(&task_id).await,
    ] {
        if let Err(e) = op {
            warn!("Cache cleanup failed for {task_id}: {e}");
        }
    }

    info!("Deleted task {task_id}");
    Ok(StatusCode::NO_CONTENT)
}
