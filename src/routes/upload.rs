use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::error::ApiError;
use crate::models::api::{UploadParams, UploadResponse};
use crate::models::TaskRecord;
use crate::queue::IngestJob;
use crate::storage::is_pdf;

pub fn routes() -> Router<Arc<AppState>> {
    // The default axum body limit is far below a PDF batch.
    Router::new()
        .route("/upload", post(upload_files))
        .layer(DefaultBodyLimit::max(512 * 1024 * 1024))
}

/// POST /upload?user_id=<int>: admit one or more PDFs for ingestion.
///
/// Per file: upload bytes to the blob store, create the PENDING document
/// row, mirror a task record into the cache, enqueue the ingestion job.
/// A failure before the enqueue rolls back that file's document and blob.
async fn upload_files(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    // Per-user rate limit; a cache outage fails open.
    match state
        .cache
        .rate_limit_exceeded(
            &format!("upload:{}", params.user_id),
            state.settings.rate_limit_requests,
            state.settings.rate_limit_window_secs,
        )
        .await
    {
        Ok(true) => return Err(ApiError::RateLimited),
        Ok(false) => {}
        Err(e) => warn!("Rate limit check unavailable: {e}"),
    }

    // Backpressure on queue depth.
    match state.queue.depth().await {
        Ok(depth) if depth > state.settings.backpressure_queue_depth => {
            return Err(ApiError::UpstreamUnavailable(
                "System is at capacity. Please try again in a few minutes.".into(),
            ));
        }
        Ok(_) => {}
        Err(e) => warn!("Queue depth check failed: {e}"),
    }

    // Read and validate every file before admitting any of them.
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Failed to read multipart field: {e}")))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| ApiError::Validation("File field is missing a filename".into()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("Failed to read file {filename}: {e}")))?
            .to_vec();
        files.push((filename, bytes));
    }

    if files.is_empty() {
        return Err(ApiError::Validation("No files provided".into()));
    }
    if files.len() > state.settings.max_files_per_request {
        return Err(ApiError::Validation(format!(
            "Too many files. Maximum {} files per request.",
            state.settings.max_files_per_request
        )));
    }
    for (filename, bytes) in &files {
        if !filename.to_lowercase().ends_with(".pdf") || !is_pdf(bytes) {
            return Err(ApiError::UnsupportedMedia(format!(
                "Invalid file type: {filename}. Only PDF files are allowed."
            )));
        }
        if bytes.len() > state.settings.max_file_size_bytes {
            return Err(ApiError::PayloadTooLarge(format!(
                "File too large: {filename}. Maximum size is {} bytes.",
                state.settings.max_file_size_bytes
            )));
        }
    }

    let user = state
        .catalog
        .ensure_user(params.user_id)
        .await
        .map_err(ApiError::internal)?;

    let total_files = files.len();
    let mut task_ids = Vec::with_capacity(total_files);

    for (filename, bytes) in files {
        let blob_handle = format!("uploads/{}.pdf", uuid::Uuid::new_v4());
        state
            .blobs
            .upload_bytes(&bytes, &blob_handle, Some("application/pdf"))
            .await
            .map_err(ApiError::internal)?;

        let document = match state
            .catalog
            .create_document(user.id, &filename, &blob_handle)
            .await
        {
            Ok(document) => document,
            Err(e) => {
                if let Err(del) = state.blobs.delete(&blob_handle).await {
                    warn!("Orphaned blob {blob_handle} after failed insert: {del}");
                }
                return Err(ApiError::internal(e));
            }
        };
        let task_id = document.task_id();

        // Advisory mirrors; failures don't block admission.
        let record = TaskRecord::pending(
            task_id.clone(),
            filename.clone(),
            document.created_at.to_rfc3339(),
        );
        if let Err(e) = state.cache.put_task(&record).await {
            warn!("Task record write failed for {task_id}: {e}");
        }
        if let Err(e) = state.cache.push_task_id(&task_id).await {
            warn!("Task list append failed for {task_id}: {e}");
        }

        let job = IngestJob {
            task_id: task_id.clone(),
            blob_handle: blob_handle.clone(),
            filename: filename.clone(),
            user_id: user.id,
            prompt: params.prompt.clone(),
        };
        if let Err(e) = state.queue.enqueue(&job).await {
            // Unwind this file so it doesn't linger in PENDING forever.
            if let Err(del) = state.catalog.delete_document(document.id).await {
                warn!("Rollback of document {} failed: {del}", document.id);
            }
            if let Err(del) = state.blobs.delete(&blob_handle).await {
                warn!("Rollback of blob {blob_handle} failed: {del}");
            }
            if let Err(del) = state.cache.delete_task(&task_id).await {
                warn!("Rollback of task record {task_id} failed: {del}");
            }
            return Err(ApiError::internal(e));
        }

        info!("Queued {filename} as task {task_id}");
        task_ids.push(task_id);
    }

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            task_ids,
            total_files,
        }),
    ))
}
