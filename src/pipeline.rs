//! The ingestion worker pool.
//!
//! Each worker long-polls the work queue and drives one document at a time
//! through fetch → parse → chunk → embed → persist, reporting progress to
//! the cache at every stage boundary. Delivery is at-least-once: the final
//! commit deletes any chunks a previous attempt wrote, so redelivered
//! messages converge on the same state.

use chrono::Utc;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::cache::ProgressCache;
use crate::catalog::Catalog;
use crate::chunker::ChunkPlanner;
use crate::completion::{CompletionModel, Message};
use crate::embedding::{normalize, validate_embedding, EmbeddingModel};
use crate::error::StageError;
use crate::models::{CachedResult, DocumentStatus, EmbeddedChunk, IngestionOutcome};
use crate::queue::{IngestJob, QueueMessage, WorkQueue};
use crate::retry::{retry_with_backoff, BackoffPolicy};
use crate::storage::{BlobStore, StorageError};

const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a helpful document summarizer. Be concise and accurate.";
/// Cap on how much of the parsed text is handed to the summarizer.
const SUMMARY_INPUT_CHARS: usize = 12_000;

/// Stage wall clocks and sizing knobs the worker needs.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub parse_timeout: Duration,
    pub embed_timeout: Duration,
    pub synth_timeout: Duration,
    pub per_message_deadline: Duration,
    pub embed_batch_size: usize,
}

pub struct IngestionWorker {
    catalog: Arc<dyn Catalog>,
    cache: Arc<dyn ProgressCache>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn WorkQueue>,
    parser: Arc<dyn crate::parser::PdfParser>,
    embedding: Arc<dyn EmbeddingModel>,
    completion: Option<Arc<dyn CompletionModel>>,
    planner: ChunkPlanner,
    config: PipelineConfig,
}

impl IngestionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        cache: Arc<dyn ProgressCache>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn WorkQueue>,
        parser: Arc<dyn crate::parser::PdfParser>,
        embedding: Arc<dyn EmbeddingModel>,
        completion: Option<Arc<dyn CompletionModel>>,
        planner: ChunkPlanner,
        config: PipelineConfig,
    ) -> Self {
        Self {
            catalog,
            cache,
            blobs,
            queue,
            parser,
            embedding,
            completion,
            planner,
            config,
        }
    }

    /// Poll-process loop. On shutdown the in-flight message drains to its
    /// stage outcome before the worker exits.
    pub async fn run(self: Arc<Self>, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        info!("Ingestion worker {worker_id} started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                polled = self.queue.poll(1) => match polled {
                    Ok(messages) => {
                        for message in messages {
                            self.process_message(message).await;
                        }
                    }
                    Err(e) => {
                        warn!("Worker {worker_id} queue poll failed: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                },
            }
        }
        info!("Ingestion worker {worker_id} stopped");
    }

    /// Handle one claimed message to an ack / no-ack decision.
    pub async fn process_message(&self, message: QueueMessage) {
        let task_id = message.job.task_id.clone();
        let Ok(document_id) = task_id.parse::<i64>() else {
            warn!("Dropping message with malformed task id {task_id:?}");
            self.ack(&message.receipt).await;
            return;
        };

        // Claim check against the authoritative row.
        match self.catalog.get_document(document_id).await {
            Ok(Some(doc)) if doc.status == DocumentStatus::Completed => {
                info!("Document {document_id} already completed; redelivery is a no-op");
                self.ack(&message.receipt).await;
                return;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                info!("Document {document_id} no longer exists; dropping message");
                self.ack(&message.receipt).await;
                return;
            }
            Err(e) => {
                warn!("Cannot read document {document_id}: {e}; leaving message for redelivery");
                return;
            }
        }

        match timeout(
            self.config.per_message_deadline,
            self.ingest(&message.job, document_id),
        )
        .await
        {
            Ok(Ok(())) => {
                self.ack(&message.receipt).await;
            }
            Ok(Err(StageError::Permanent(e))) => {
                error!("Document {document_id} failed permanently: {e}");
                self.fail_document(document_id, &task_id, &e.to_string()).await;
                self.ack(&message.receipt).await;
            }
            Ok(Err(StageError::Transient(e))) => {
                warn!(
                    "Document {document_id} failed transiently: {e}; \
                     leaving message for queue redelivery"
                );
                self.fail_document(document_id, &task_id, &e.to_string()).await;
                // No ack: the visibility timeout re-exposes the message.
            }
            Err(_) => {
                error!(
                    "Document {document_id} exceeded the {}s processing deadline",
                    self.config.per_message_deadline.as_secs()
                );
                self.fail_document(document_id, &task_id, "processing deadline exceeded")
                    .await;
                self.ack(&message.receipt).await;
            }
        }
    }

    /// The per-document state machine. Any error aborts the remaining
    /// stages; the caller maps it to an ack decision.
    async fn ingest(&self, job: &IngestJob, document_id: i64) -> Result<(), StageError> {
        let task_id = &job.task_id;
        let started = Instant::now();

        // CLAIMED
        self.catalog
            .mark_processing(document_id)
            .await
            .map_err(StageError::transient)?;
        self.report(
            task_id,
            &[
                ("status", DocumentStatus::Processing.as_str().to_string()),
                ("progress", "0".to_string()),
                ("started_at", Utc::now().to_rfc3339()),
                ("error", String::new()),
            ],
        )
        .await;
        info!("Processing document {document_id} ({})", job.filename);

        // FETCHED
        let pdf_bytes = retry_with_backoff(
            &BackoffPolicy::default(),
            "blob download",
            StorageError::is_transient,
            || self.blobs.download(&job.blob_handle),
        )
        .await
        .map_err(|e| match e {
            StorageError::NotFound { .. } => StageError::permanent(e),
            other => StageError::transient(other),
        })?;

        // The bytes live in a scratch file for the parse stage only. Drop
        // removes the file on every exit path, including early errors.
        let scratch = tokio::task::spawn_blocking(move || -> std::io::Result<tempfile::NamedTempFile> {
            let mut file = tempfile::Builder::new()
                .prefix("paperstore-")
                .suffix(".pdf")
                .tempfile()?;
            file.write_all(&pdf_bytes)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(StageError::transient)?
        .map_err(StageError::transient)?;
        self.progress(task_id, 10).await;

        // PARSED
        let parsed = timeout(
            self.config.parse_timeout,
            self.parser.parse(scratch.path(), &job.filename),
        )
        .await
        .map_err(|_| StageError::transient(anyhow::anyhow!("parse stage timed out")))?
        .map_err(StageError::from)?;
        drop(scratch);
        self.progress(task_id, 40).await;

        if parsed.markdown.trim().is_empty() {
            return Err(StageError::permanent(anyhow::anyhow!("no extractable text")));
        }

        // Optional summarization when the upload supplied a prompt. A
        // failed summary never fails the document.
        let summary = match (&job.prompt, &self.completion) {
            (Some(prompt), Some(completion)) if !prompt.trim().is_empty() => {
                self.generate_summary(completion.as_ref(), prompt, &parsed.markdown)
                    .await
            }
            _ => None,
        };

        // CHUNKED
        let planned = self.planner.plan(&parsed.markdown);
        if planned.is_empty() {
            return Err(StageError::permanent(anyhow::anyhow!("no extractable text")));
        }
        self.progress(task_id, 60).await;

        // EMBEDDED
        let texts: Vec<String> = planned.iter().map(|c| c.text.clone()).collect();
        let batches = texts.len().div_ceil(self.config.embed_batch_size.max(1)) as u32;
        let embed_deadline = self.config.embed_timeout * batches.max(1);
        let mut embeddings = timeout(embed_deadline, self.embedding.embed_for_ingestion(&texts))
            .await
            .map_err(|_| StageError::transient(anyhow::anyhow!("embed stage timed out")))?
            .map_err(StageError::from)?;

        if embeddings.len() != planned.len() {
            return Err(StageError::permanent(anyhow::anyhow!(
                "embedding count {} does not match chunk count {}",
                embeddings.len(),
                planned.len()
            )));
        }
        let dimensions = self.embedding.dimensions();
        for embedding in &mut embeddings {
            normalize(embedding);
            validate_embedding(embedding, dimensions)
                .map_err(|e| StageError::permanent(anyhow::anyhow!(e)))?;
        }

        let chunks: Vec<EmbeddedChunk> = planned
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| EmbeddedChunk {
                chunk_index: chunk.chunk_index,
                text: chunk.text,
                token_count: chunk.token_count,
                embedding,
            })
            .collect();
        self.progress(task_id, 80).await;

        // PERSISTED
        let extraction_time = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;
        let outcome = IngestionOutcome {
            result_text: parsed.markdown,
            page_count: parsed.page_count,
            extraction_time_seconds: extraction_time,
            summary,
            chunks,
        };
        self.catalog
            .complete_ingestion(document_id, &outcome)
            .await
            .map_err(StageError::transient)?;

        let completed_at = Utc::now().to_rfc3339();
        if let Err(e) = self
            .cache
            .put_result(&CachedResult {
                task_id: task_id.clone(),
                filename: job.filename.clone(),
                page_count: Some(outcome.page_count),
                text: outcome.result_text.clone(),
                extraction_time_seconds: Some(extraction_time),
                summary: outcome.summary.clone(),
            })
            .await
        {
            warn!("Result cache write failed for task {task_id}: {e}");
        }
        self.report(
            task_id,
            &[
                ("status", DocumentStatus::Completed.as_str().to_string()),
                ("progress", "100".to_string()),
                ("completed_at", completed_at),
            ],
        )
        .await;

        info!(
            "Completed document {document_id} in {extraction_time}s ({} chunks, {} pages)",
            outcome.chunks.len(),
            outcome.page_count
        );
        Ok(())
    }

    async fn generate_summary(
        &self,
        completion: &dyn CompletionModel,
        prompt: &str,
        text: &str,
    ) -> Option<String> {
        let excerpt: String = text.chars().take(SUMMARY_INPUT_CHARS).collect();
        let messages = [
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::user(format!("{prompt}\n\n---\n\n{excerpt}")),
        ];
        match timeout(
            self.config.synth_timeout,
            completion.complete(&messages, None, None, None),
        )
        .await
        {
            Ok(Ok(result)) => Some(result.content),
            Ok(Err(e)) => {
                warn!("Summary generation failed: {e}");
                None
            }
            Err(_) => {
                warn!("Summary generation timed out");
                None
            }
        }
    }

    async fn fail_document(&self, document_id: i64, task_id: &str, error_message: &str) {
        if let Err(e) = self.catalog.mark_failed(document_id, error_message).await {
            error!("Could not mark document {document_id} failed: {e}");
        }
        self.report(
            task_id,
            &[
                ("status", DocumentStatus::Failed.as_str().to_string()),
                ("error", error_message.to_string()),
                ("completed_at", Utc::now().to_rfc3339()),
            ],
        )
        .await;
    }

    async fn progress(&self, task_id: &str, progress: u8) {
        self.report(
            task_id,
            &[
                ("status", DocumentStatus::Processing.as_str().to_string()),
                ("progress", progress.to_string()),
            ],
        )
        .await;
    }

    /// Progress writes are advisory; failures are logged and swallowed.
    async fn report(&self, task_id: &str, fields: &[(&str, String)]) {
        if let Err(e) = self.cache.merge_task(task_id, fields).await {
            warn!("Progress cache write failed for task {task_id}: {e}");
        }
    }

    async fn ack(&self, receipt: &str) {
        if let Err(e) = self.queue.ack(receipt).await {
            warn!("Queue ack failed: {e}");
        }
    }
}

/// Launch the worker pool.
pub fn spawn_workers(
    worker: Arc<IngestionWorker>,
    pool_size: usize,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..pool_size.max(1))
        .map(|worker_id| {
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(worker.run(worker_id, shutdown))
        })
        .collect()
}

/// Periodic sweep that re-enqueues documents stuck in PENDING, covering the
/// window where admission created the row but the enqueue never happened.
/// A duplicate enqueue for a document that does get processed is harmless:
/// the redelivered message hits the completed no-op path.
pub fn spawn_reconciler(
    catalog: Arc<dyn Catalog>,
    queue: Arc<dyn WorkQueue>,
    interval: Duration,
    min_age: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Reconciliation sweeper started (every {}s, min age {}s)",
            interval.as_secs(),
            min_age.as_secs()
        );
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let stuck = match catalog.pending_older_than(min_age.as_secs(), 100).await {
                Ok(stuck) => stuck,
                Err(e) => {
                    warn!("Reconciliation scan failed: {e}");
                    continue;
                }
            };
            for doc in stuck {
                let job = IngestJob {
                    task_id: doc.task_id(),
                    blob_handle: doc.blob_handle.clone(),
                    filename: doc.filename.clone(),
                    user_id: doc.user_id,
                    prompt: None,
                };
                match queue.enqueue(&job).await {
                    Ok(()) => info!("Re-enqueued stuck pending document {}", doc.id),
                    Err(e) => warn!("Could not re-enqueue document {}: {e}", doc.id),
                }
            }
        }
        info!("Reconciliation sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::cache::CacheError;
    use crate::error::UpstreamError;
    use crate::models::{Document, ParsedPdf, ScoredChunk, TaskRecord, User};
    use crate::parser::PdfParser;
    use crate::queue::memory::MemoryQueue;
    use crate::retrieval::test_support::HashEmbedder;
    use crate::retrieval::{RetrievalError, Retriever};
    use crate::storage::local::LocalStorage;

    const DIMS: usize = 64;

    // ──────────── in-memory fakes behind the trait seams ────────────

    #[derive(Default)]
    struct FakeCatalog {
        documents: Mutex<HashMap<i64, Document>>,
        chunks: Mutex<HashMap<i64, Vec<EmbeddedChunk>>>,
    }

    impl FakeCatalog {
        fn insert_document(&self, id: i64, user_id: i64, filename: &str, blob: &str) {
            let doc = Document {
                id,
                user_id,
                filename: filename.to_string(),
                blob_handle: blob.to_string(),
                status: DocumentStatus::Pending,
                result_text: None,
                summary: None,
                error_message: None,
                page_count: None,
                extraction_time_seconds: None,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
            };
            self.documents.lock().unwrap().insert(id, doc);
        }

        fn status_of(&self, id: i64) -> Option<DocumentStatus> {
            self.documents.lock().unwrap().get(&id).map(|d| d.status)
        }

        fn error_of(&self, id: i64) -> Option<String> {
            self.documents
                .lock()
                .unwrap()
                .get(&id)
                .and_then(|d| d.error_message.clone())
        }

        fn chunks_of(&self, id: i64) -> Vec<EmbeddedChunk> {
            self.chunks.lock().unwrap().get(&id).cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn create_user(&self, _: &str, _: &str) -> anyhow::Result<Option<User>> {
            unimplemented!("not used by pipeline tests")
        }

        async fn get_user(&self, _: i64) -> anyhow::Result<Option<User>> {
            Ok(None)
        }

        async fn ensure_user(&self, _: i64) -> anyhow::Result<User> {
            unimplemented!("not used by pipeline tests")
        }

        async fn create_document(
            &self,
            _: i64,
            _: &str,
            _: &str,
        ) -> anyhow::Result<Document> {
            unimplemented!("not used by pipeline tests")
        }

        async fn get_document(&self, document_id: i64) -> anyhow::Result<Option<Document>> {
            Ok(self.documents.lock().unwrap().get(&document_id).cloned())
        }

        async fn list_documents(
            &self,
            user_id: i64,
            _: Option<DocumentStatus>,
            _: i64,
            _: i64,
        ) -> anyhow::Result<Vec<Document>> {
            Ok(self
                .documents
                .lock()
                .unwrap()
                .values()
                .filter(|d| d.user_id == user_id)
                .cloned()
                .collect())
        }

        async fn mark_processing(&self, document_id: i64) -> anyhow::Result<bool> {
            let mut docs = self.documents.lock().unwrap();
            if let Some(doc) = docs.get_mut(&document_id) {
                if matches!(doc.status, DocumentStatus::Pending | DocumentStatus::Failed) {
                    doc.status = DocumentStatus::Processing;
                    doc.started_at = Some(Utc::now());
                    doc.error_message = None;
                    return Ok(true);
                }
            }
            Ok(false)
        }

        async fn mark_failed(&self, document_id: i64, error: &str) -> anyhow::Result<()> {
            let mut docs = self.documents.lock().unwrap();
            if let Some(doc) = docs.get_mut(&document_id) {
                doc.status = DocumentStatus::Failed;
                doc.error_message = Some(error.to_string());
                doc.completed_at = Some(Utc::now());
            }
            Ok(())
        }

        async fn complete_ingestion(
            &self,
            document_id: i64,
            outcome: &IngestionOutcome,
        ) -> anyhow::Result<()> {
            let mut docs = self.documents.lock().unwrap();
            let doc = docs
                .get_mut(&document_id)
                .ok_or_else(|| anyhow::anyhow!("document {document_id} no longer exists"))?;
            doc.status = DocumentStatus::Completed;
            doc.result_text = Some(outcome.result_text.clone());
            doc.page_count = Some(outcome.page_count);
            doc.extraction_time_seconds = Some(outcome.extraction_time_seconds);
            doc.summary = outcome.summary.clone();
            doc.error_message = None;
            doc.completed_at = Some(Utc::now());
            // Delete-then-insert, mirroring the real single transaction.
            self.chunks
                .lock()
                .unwrap()
                .insert(document_id, outcome.chunks.clone());
            Ok(())
        }

        async fn delete_document(&self, document_id: i64) -> anyhow::Result<Option<String>> {
            let doc = self.documents.lock().unwrap().remove(&document_id);
            self.chunks.lock().unwrap().remove(&document_id);
            Ok(doc.map(|d| d.blob_handle))
        }

        async fn count_chunks(&self, document_id: i64) -> anyhow::Result<i64> {
            Ok(self.chunks_of(document_id).len() as i64)
        }

        async fn ann_search(
            &self,
            user_id: i64,
            query_vector: &[f32],
            top_k: i64,
            document_id: Option<i64>,
        ) -> anyhow::Result<Vec<ScoredChunk>> {
            let docs = self.documents.lock().unwrap();
            let chunks = self.chunks.lock().unwrap();
            let mut hits: Vec<ScoredChunk> = Vec::new();
            for (doc_id, doc_chunks) in chunks.iter() {
                let Some(doc) = docs.get(doc_id) else { continue };
                if doc.user_id != user_id {
                    continue;
                }
                if let Some(filter) = document_id {
                    if *doc_id != filter {
                        continue;
                    }
                }
                for (offset, chunk) in doc_chunks.iter().enumerate() {
                    let dot: f32 = chunk
                        .embedding
                        .iter()
                        .zip(query_vector.iter())
                        .map(|(a, b)| a * b)
                        .sum();
                    hits.push(ScoredChunk {
                        chunk_id: doc_id * 1000 + offset as i64,
                        document_id: *doc_id,
                        chunk_index: chunk.chunk_index,
                        text: chunk.text.clone(),
                        filename: doc.filename.clone(),
                        similarity: (dot as f64).clamp(0.0, 1.0),
                    });
                }
            }
            hits.sort_by(|a, b| {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.chunk_id.cmp(&b.chunk_id))
            });
            hits.truncate(top_k as usize);
            Ok(hits)
        }

        async fn pending_older_than(
            &self,
            _: u64,
            _: i64,
        ) -> anyhow::Result<Vec<Document>> {
            Ok(self
                .documents
                .lock()
                .unwrap()
                .values()
                .filter(|d| d.status == DocumentStatus::Pending)
                .cloned()
                .collect())
        }

        async fn healthy(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct FakeCache {
        tasks: Mutex<HashMap<String, HashMap<String, String>>>,
        results: Mutex<HashMap<String, CachedResult>>,
    }

    #[async_trait]
    impl ProgressCache for FakeCache {
        async fn put_task(&self, record: &TaskRecord) -> Result<(), CacheError> {
            let fields = record
                .to_fields()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
            self.tasks
                .lock()
                .unwrap()
                .insert(record.task_id.clone(), fields);
            Ok(())
        }

        async fn merge_task(
            &self,
            task_id: &str,
            fields: &[(&str, String)],
        ) -> Result<(), CacheError> {
            let mut tasks = self.tasks.lock().unwrap();
            let entry = tasks.entry(task_id.to_string()).or_default();
            for (k, v) in fields {
                entry.insert(k.to_string(), v.clone());
            }
            Ok(())
        }

        async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, CacheError> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .get(task_id)
                .map(|fields| TaskRecord::from_fields(task_id, fields)))
        }

        async fn delete_task(&self, task_id: &str) -> Result<(), CacheError> {
            self.tasks.lock().unwrap().remove(task_id);
            Ok(())
        }

        async fn put_result(&self, result: &CachedResult) -> Result<(), CacheError> {
            self.results
                .lock()
                .unwrap()
                .insert(result.task_id.clone(), result.clone());
            Ok(())
        }

        async fn get_result(&self, task_id: &str) -> Result<Option<CachedResult>, CacheError> {
            Ok(self.results.lock().unwrap().get(task_id).cloned())
        }

        async fn delete_result(&self, task_id: &str) -> Result<(), CacheError> {
            self.results.lock().unwrap().remove(task_id);
            Ok(())
        }

        async fn push_task_id(&self, _: &str) -> Result<(), CacheError> {
            Ok(())
        }

        async fn remove_task_id(&self, _: &str) -> Result<(), CacheError> {
            Ok(())
        }

        async fn list_task_ids(&self, _: i64, _: i64) -> Result<Vec<String>, CacheError> {
            Ok(vec![])
        }

        async fn task_count(&self) -> Result<i64, CacheError> {
            Ok(self.tasks.lock().unwrap().len() as i64)
        }

        async fn rate_limit_exceeded(
            &self,
            _: &str,
            _: u32,
            _: u64,
        ) -> Result<bool, CacheError> {
            Ok(false)
        }

        async fn healthy(&self) -> bool {
            true
        }
    }

    /// Parser stub that returns fixed text, or a classified failure.
    struct StubParser {
        text: String,
        page_count: i32,
        fail_with: Option<u16>,
    }

    #[async_trait]
    impl PdfParser for StubParser {
        async fn parse(
            &self,
            path: &std::path::Path,
            _filename: &str,
        ) -> Result<ParsedPdf, UpstreamError> {
            // The scratch file must exist while parsing runs.
            assert!(path.exists(), "scratch file missing during parse");
            if let Some(status) = self.fail_with {
                return Err(UpstreamError::Status {
                    service: "parser",
                    status,
                    body: "stub failure".into(),
                });
            }
            Ok(ParsedPdf {
                markdown: self.text.clone(),
                page_count: self.page_count,
            })
        }
    }

    struct Harness {
        catalog: Arc<FakeCatalog>,
        cache: Arc<FakeCache>,
        queue: Arc<MemoryQueue>,
        worker: Arc<IngestionWorker>,
        _storage_dir: tempfile::TempDir,
    }

    async fn harness(parser: StubParser) -> Harness {
        let catalog = Arc::new(FakeCatalog::default());
        let cache = Arc::new(FakeCache::default());
        let queue = Arc::new(
            MemoryQueue::new(Duration::from_secs(30)).with_poll_wait(Duration::from_millis(10)),
        );
        let storage_dir = tempfile::TempDir::new().unwrap();
        let blobs = Arc::new(LocalStorage::new(storage_dir.path().to_str().unwrap()));
        blobs
            .upload_bytes(b"%PDF-1.7 test", "uploads/doc.pdf", None)
            .await
            .unwrap();

        let worker = Arc::new(IngestionWorker::new(
            catalog.clone(),
            cache.clone(),
            blobs,
            queue.clone(),
            Arc::new(parser),
            Arc::new(HashEmbedder { dimensions: DIMS }),
            None,
            ChunkPlanner::new(64, 16),
            PipelineConfig {
                parse_timeout: Duration::from_secs(5),
                embed_timeout: Duration::from_secs(5),
                synth_timeout: Duration::from_secs(5),
                per_message_deadline: Duration::from_secs(30),
                embed_batch_size: 100,
            },
        ));

        Harness {
            catalog,
            cache,
            queue,
            worker,
            _storage_dir: storage_dir,
        }
    }

    fn job(task_id: &str) -> IngestJob {
        IngestJob {
            task_id: task_id.to_string(),
            blob_handle: "uploads/doc.pdf".to_string(),
            filename: "doc.pdf".to_string(),
            user_id: 1,
            prompt: None,
        }
    }

    async fn deliver_and_process(h: &Harness, job: &IngestJob) {
        h.queue.enqueue(job).await.unwrap();
        let messages = h.queue.poll(1).await.unwrap();
        assert_eq!(messages.len(), 1);
        h.worker.process_message(messages.into_iter().next().unwrap()).await;
    }

    fn long_text() -> String {
        (0..120)
            .map(|i| format!("Sentence {i} covers hydraulic pressure and flow measurements."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[tokio::test]
    async fn test_happy_path_completes_document() {
        let h = harness(StubParser {
            text: long_text(),
            page_count: 3,
            fail_with: None,
        })
        .await;
        h.catalog.insert_document(1, 1, "doc.pdf", "uploads/doc.pdf");

        deliver_and_process(&h, &job("1")).await;

        assert_eq!(h.catalog.status_of(1), Some(DocumentStatus::Completed));
        let chunks = h.catalog.chunks_of(1);
        assert!(chunks.len() >= 2, "expected multiple chunks");
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i32);
            assert_eq!(chunk.embedding.len(), DIMS);
            assert!(chunk.embedding.iter().all(|v| v.is_finite()));
        }

        // Message acked; result and terminal status cached.
        assert_eq!(h.queue.depth().await.unwrap(), 0);
        let result = h.cache.get_result("1").await.unwrap().unwrap();
        assert_eq!(result.page_count, Some(3));
        assert!(!result.text.is_empty());
        let task = h.cache.get_task("1").await.unwrap().unwrap();
        assert_eq!(task.status, DocumentStatus::Completed);
        assert_eq!(task.progress, 100);
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let h = harness(StubParser {
            text: long_text(),
            page_count: 2,
            fail_with: None,
        })
        .await;
        h.catalog.insert_document(1, 1, "doc.pdf", "uploads/doc.pdf");

        deliver_and_process(&h, &job("1")).await;
        let first = h.catalog.chunks_of(1);

        // Simulated duplicate delivery after completion: no-op ack.
        deliver_and_process(&h, &job("1")).await;
        let second = h.catalog.chunks_of(1);

        assert_eq!(first.len(), second.len());
        let indices: Vec<i32> = second.iter().map(|c| c.chunk_index).collect();
        let expected: Vec<i32> = (0..second.len() as i32).collect();
        assert_eq!(indices, expected, "duplicate or missing chunk indices");
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.text, b.text);
        }
        assert_eq!(h.queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rerun_after_interrupted_processing_converges() {
        let h = harness(StubParser {
            text: long_text(),
            page_count: 2,
            fail_with: None,
        })
        .await;
        h.catalog.insert_document(1, 1, "doc.pdf", "uploads/doc.pdf");

        // A previous worker died mid-flight: row stuck in PROCESSING with
        // a partial chunk set already persisted.
        h.catalog.mark_processing(1).await.unwrap();
        h.catalog.chunks.lock().unwrap().insert(
            1,
            vec![EmbeddedChunk {
                chunk_index: 0,
                text: "stale partial chunk".into(),
                token_count: 3,
                embedding: vec![0.0; DIMS],
            }],
        );

        deliver_and_process(&h, &job("1")).await;

        assert_eq!(h.catalog.status_of(1), Some(DocumentStatus::Completed));
        let chunks = h.catalog.chunks_of(1);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.text != "stale partial chunk"));
    }

    #[tokio::test]
    async fn test_empty_parse_fails_terminally() {
        let h = harness(StubParser {
            text: "   \n\n ".into(),
            page_count: 1,
            fail_with: None,
        })
        .await;
        h.catalog.insert_document(1, 1, "doc.pdf", "uploads/doc.pdf");

        deliver_and_process(&h, &job("1")).await;

        assert_eq!(h.catalog.status_of(1), Some(DocumentStatus::Failed));
        assert_eq!(h.catalog.error_of(1).as_deref(), Some("no extractable text"));
        assert!(h.catalog.chunks_of(1).is_empty());
        // Terminal failure: message acked, no retry loop.
        assert_eq!(h.queue.depth().await.unwrap(), 0);
        assert!(h.cache.get_result("1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_permanent_parser_failure_acks() {
        let h = harness(StubParser {
            text: String::new(),
            page_count: 0,
            fail_with: Some(422),
        })
        .await;
        h.catalog.insert_document(1, 1, "doc.pdf", "uploads/doc.pdf");

        deliver_and_process(&h, &job("1")).await;

        assert_eq!(h.catalog.status_of(1), Some(DocumentStatus::Failed));
        assert_eq!(h.queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_parser_failure_leaves_message_for_redelivery() {
        let h = harness(StubParser {
            text: String::new(),
            page_count: 0,
            fail_with: Some(503),
        })
        .await;
        h.catalog.insert_document(1, 1, "doc.pdf", "uploads/doc.pdf");

        deliver_and_process(&h, &job("1")).await;

        assert_eq!(h.catalog.status_of(1), Some(DocumentStatus::Failed));
        // Not acked: still claimed, waiting for the visibility timeout.
        assert_eq!(h.queue.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_deleted_document_drops_message() {
        let h = harness(StubParser {
            text: long_text(),
            page_count: 1,
            fail_with: None,
        })
        .await;
        // No document row at all: upload was deleted before processing.
        deliver_and_process(&h, &job("1")).await;
        assert_eq!(h.queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retriever_tenant_isolation_end_to_end() {
        let h = harness(StubParser {
            text: String::new(),
            page_count: 0,
            fail_with: None,
        })
        .await;

        let embedder = HashEmbedder { dimensions: DIMS };
        for (doc_id, user_id, text) in [
            (1i64, 1i64, "confidential user 1 data"),
            (2, 2, "confidential user 2 data"),
        ] {
            h.catalog
                .insert_document(doc_id, user_id, "doc.pdf", "uploads/doc.pdf");
            h.catalog
                .complete_ingestion(
                    doc_id,
                    &IngestionOutcome {
                        result_text: text.to_string(),
                        page_count: 1,
                        extraction_time_seconds: 0.1,
                        summary: None,
                        chunks: vec![EmbeddedChunk {
                            chunk_index: 0,
                            text: text.to_string(),
                            token_count: 5,
                            embedding: embedder.embed_text(text),
                        }],
                    },
                )
                .await
                .unwrap();
        }

        let retriever = Retriever::new(
            Arc::new(HashEmbedder { dimensions: DIMS }),
            h.catalog.clone(),
            20,
        );

        // User 1 only ever sees user 1's chunks.
        let hits = retriever.search(1, "confidential", 5, None).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|c| c.document_id == 1));

        // User 2 asking for user 1's document gets NotFound, not a leak.
        let err = retriever.search(2, "confidential", 5, Some(1)).await;
        assert!(matches!(err, Err(RetrievalError::NotFound)));

        // Happy-path scoped search still works for the owner.
        let scoped = retriever.search(1, "confidential", 5, Some(1)).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert!(scoped[0].similarity >= 0.5);
    }

    #[tokio::test]
    async fn test_summary_generated_when_prompt_present() {
        struct CannedCompletion;

        #[async_trait]
        impl CompletionModel for CannedCompletion {
            async fn complete(
                &self,
                messages: &[Message],
                _: Option<&str>,
                _: Option<u32>,
                _: Option<f64>,
            ) -> Result<crate::completion::CompletionResult, UpstreamError> {
                assert!(messages[1].content.contains("summarize the findings"));
                Ok(crate::completion::CompletionResult {
                    content: "A concise summary.".into(),
                    model: "stub".into(),
                    usage: None,
                })
            }
        }

        let catalog = Arc::new(FakeCatalog::default());
        let cache = Arc::new(FakeCache::default());
        let queue = Arc::new(
            MemoryQueue::new(Duration::from_secs(30)).with_poll_wait(Duration::from_millis(10)),
        );
        let storage_dir = tempfile::TempDir::new().unwrap();
        let blobs = Arc::new(LocalStorage::new(storage_dir.path().to_str().unwrap()));
        blobs
            .upload_bytes(b"%PDF-1.7 test", "uploads/doc.pdf", None)
            .await
            .unwrap();

        let worker = Arc::new(IngestionWorker::new(
            catalog.clone(),
            cache,
            blobs,
            queue.clone(),
            Arc::new(StubParser {
                text: long_text(),
                page_count: 1,
                fail_with: None,
            }),
            Arc::new(HashEmbedder { dimensions: DIMS }),
            Some(Arc::new(CannedCompletion)),
            ChunkPlanner::new(64, 16),
            PipelineConfig {
                parse_timeout: Duration::from_secs(5),
                embed_timeout: Duration::from_secs(5),
                synth_timeout: Duration::from_secs(5),
                per_message_deadline: Duration::from_secs(30),
                embed_batch_size: 100,
            },
        ));
        catalog.insert_document(1, 1, "doc.pdf", "uploads/doc.pdf");

        let mut j = job("1");
        j.prompt = Some("Please summarize the findings".into());
        queue.enqueue(&j).await.unwrap();
        let messages = queue.poll(1).await.unwrap();
        worker
            .process_message(messages.into_iter().next().unwrap())
            .await;

        let doc = catalog.get_document(1).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.summary.as_deref(), Some("A concise summary."));
    }
}
