use std::sync::Arc;

use crate::cache::ProgressCache;
use crate::catalog::Catalog;
use crate::chat::ChatOrchestrator;
use crate::config::Settings;
use crate::queue::WorkQueue;
use crate::retrieval::Retriever;
use crate::storage::BlobStore;

/// Shared application state passed to all route handlers.
pub struct AppState {
    pub settings: Settings,
    pub catalog: Arc<dyn Catalog>,
    pub cache: Arc<dyn ProgressCache>,
    pub blobs: Arc<dyn BlobStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub retriever: Arc<Retriever>,
    pub chat: Arc<ChatOrchestrator>,
}
