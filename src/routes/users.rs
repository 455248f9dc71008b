use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;

use crate::app::AppState;
use crate::error::ApiError;
use crate::models::api::{CreateUserRequest, UserResponse};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/{user_id}", get(get_user))
}

/// POST /users
async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    if !req.email.contains('@') || req.email.len() > 255 {
        return Err(ApiError::Validation("A valid email is required".into()));
    }
    if req.api_key.trim().is_empty() || req.api_key.len() > 255 {
        return Err(ApiError::Validation("A non-empty api_key is required".into()));
    }

    let user = state
        .catalog
        .create_user(&req.email, &req.api_key)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::Conflict("User with this email already exists".into()))?;

    Ok((StatusCode::CREATED, Json(user.into())))
}

/// GET /users/{user_id}
async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .catalog
        .get_user(user_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::NotFound(format!("User not found: {user_id}")))?;

    Ok(Json(user.into()))
}
