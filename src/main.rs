mod app;
mod cache;
mod catalog;
mod chat;
mod chunker;
mod completion;
mod config;
mod embedding;
mod error;
mod models;
mod parser;
mod pipeline;
mod queue;
mod retrieval;
mod retry;
mod routes;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use app::AppState;
use cache::redis::RedisCache;
use cache::ProgressCache;
use catalog::postgres::PostgresCatalog;
use catalog::Catalog;
use chat::ChatOrchestrator;
use chunker::ChunkPlanner;
use completion::openai::OpenAICompletionModel;
use completion::CompletionModel;
use config::load_settings_from_path;
use embedding::openai::OpenAIEmbeddingModel;
use embedding::EmbeddingModel;
use parser::api::ApiParser;
use parser::PdfParser;
use pipeline::{spawn_reconciler, spawn_workers, IngestionWorker, PipelineConfig};
use queue::memory::MemoryQueue;
use queue::sqs::SqsQueue;
use queue::WorkQueue;
use retrieval::Retriever;
use storage::local::LocalStorage;
use storage::s3::S3Storage;
use storage::BlobStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting paperstore...");

    let settings = load_settings_from_path("paperstore.toml")?;
    info!(
        "Configuration loaded: host={}, port={}, storage={}, queue={}",
        settings.host, settings.port, settings.storage_provider, settings.queue_provider
    );

    // Catalog (authoritative store + vector index).
    let postgres = Arc::new(
        PostgresCatalog::new(
            &settings.postgres_uri,
            settings.db_pool_size,
            settings.db_acquire_timeout_secs,
            settings.vector_dimensions,
            settings.ann_m,
            settings.ann_ef_construction,
            settings.ef_search,
        )
        .await?,
    );
    postgres.ensure_schema().await?;
    postgres.verify_ann_index().await?;
    let catalog: Arc<dyn Catalog> = postgres;
    info!("Catalog initialized");

    // Progress cache.
    let cache: Arc<dyn ProgressCache> = Arc::new(
        RedisCache::connect(
            &settings.redis_url,
            settings.task_ttl_secs,
            settings.result_ttl_secs,
        )
        .await?,
    );

    // Blob store.
    let blobs: Arc<dyn BlobStore> = match settings.storage_provider.as_str() {
        "aws-s3" => Arc::new(S3Storage::new(
            settings.aws_access_key.as_deref().unwrap_or(""),
            settings.aws_secret_access_key.as_deref().unwrap_or(""),
            settings.aws_region.as_deref().unwrap_or("us-east-1"),
            settings
                .s3_bucket
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("storage.bucket_name required for aws-s3"))?,
        )),
        _ => Arc::new(LocalStorage::new(&settings.storage_path)),
    };
    info!("Blob store initialized: {}", blobs.provider_name());

    // Work queue.
    let queue: Arc<dyn WorkQueue> = match settings.queue_provider.as_str() {
        "sqs" => Arc::new(SqsQueue::new(
            settings.aws_access_key.as_deref().unwrap_or(""),
            settings.aws_secret_access_key.as_deref().unwrap_or(""),
            settings.aws_region.as_deref().unwrap_or("us-east-1"),
            settings
                .sqs_queue_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("SQS_QUEUE_URL required for sqs provider"))?,
            settings.visibility_timeout_secs,
        )),
        _ => Arc::new(MemoryQueue::new(Duration::from_secs(
            settings.visibility_timeout_secs as u64,
        ))),
    };
    info!("Work queue initialized: {}", settings.queue_provider);

    // Model clients.
    let embedding: Arc<dyn EmbeddingModel> = Arc::new(OpenAIEmbeddingModel::new(
        &settings.embedding_model,
        &settings.openai_api_key,
        settings.vector_dimensions,
        settings.embedding_batch_size,
    ));
    let completion: Arc<dyn CompletionModel> = Arc::new(OpenAICompletionModel::new(
        &settings.synthesizer_model,
        &settings.openai_api_key,
        settings.synthesizer_max_tokens,
        settings.synthesizer_temperature,
    ));
    let parser: Arc<dyn PdfParser> = Arc::new(ApiParser::new(
        settings
            .parser_api_endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("parser.api_endpoint is required"))?,
        settings.parser_request_timeout_secs,
    ));
    info!(
        "Model clients initialized: embedding={}, synthesizer={}",
        settings.embedding_model, settings.synthesizer_model
    );

    // Query side.
    let retriever = Arc::new(Retriever::new(
        embedding.clone(),
        catalog.clone(),
        settings.top_k_max,
    ));
    let chat = Arc::new(ChatOrchestrator::new(
        retriever.clone(),
        completion.clone(),
        settings.context_budget_tokens,
        settings.synthesizer_max_tokens,
        settings.synthesizer_temperature,
        settings.synthesizer_model.clone(),
    ));

    // Ingestion side.
    let worker = Arc::new(IngestionWorker::new(
        catalog.clone(),
        cache.clone(),
        blobs.clone(),
        queue.clone(),
        parser,
        embedding.clone(),
        Some(completion.clone()),
        ChunkPlanner::new(settings.chunk_size_tokens, settings.chunk_overlap_tokens),
        PipelineConfig {
            parse_timeout: Duration::from_secs(settings.parse_timeout_secs),
            embed_timeout: Duration::from_secs(settings.embed_timeout_secs),
            synth_timeout: Duration::from_secs(settings.synth_timeout_secs),
            per_message_deadline: Duration::from_secs(settings.per_message_deadline_secs),
            embed_batch_size: settings.embedding_batch_size,
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handles = spawn_workers(worker, settings.worker_pool_size, shutdown_rx.clone());
    let reconciler = spawn_reconciler(
        catalog.clone(),
        queue.clone(),
        Duration::from_secs(settings.reconcile_interval_secs),
        Duration::from_secs(settings.reconcile_min_age_secs),
        shutdown_rx.clone(),
    );
    info!("Spawned {} ingestion worker(s)", settings.worker_pool_size);

    // HTTP surface.
    let state = Arc::new(AppState {
        settings: settings.clone(),
        catalog,
        cache,
        blobs,
        queue,
        retriever,
        chat,
    });
    let router = routes::build_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    // Drain workers: each finishes its in-flight message, then exits.
    info!("Shutting down; draining ingestion workers");
    shutdown_tx.send(true).ok();
    for handle in worker_handles {
        handle.await.ok();
    }
    reconciler.await.ok();
    info!("Shutdown complete");

    Ok(())
}
