pub mod chat;
pub mod documents;
pub mod tasks;
pub mod upload;
pub mod users;

use axum::Router;
use std::sync::Arc;

use crate::app::AppState;

/// Build all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(upload::routes())
        .merge(tasks::routes())
        .merge(documents::routes())
        .merge(users::routes())
        .merge(chat::routes())
        .with_state(state)
}
