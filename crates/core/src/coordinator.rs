use crate::models::{IngestionReport, PipelineOptions};
use crate::scheduler::BatchScheduler;
use crate::source::{self, BookRecords, SkippedBook};
use crate::traits::{BatchEmbedder, VectorIndex};
use crate::writer::VectorStoreWriter;
use crate::error::SourceError;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Linear per-document progression. Failures downgrade record status but the
/// machine always moves forward to Reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStage {
    Parsing,
    Embedding,
    Storing,
    Reporting,
}

/// Aggregate counters shared across document workers; the only mutable state
/// that crosses document boundaries.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    pub documents_done: AtomicUsize,
    pub records_embedded: AtomicUsize,
    pub records_failed: AtomicUsize,
    pub records_stored: AtomicUsize,
}

#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub reports: Vec<IngestionReport>,
    pub skipped_books: Vec<SkippedBook>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct IngestionCoordinator<E, S> {
    embedder: E,
    writer: VectorStoreWriter<S>,
    scheduler: BatchScheduler,
    options: PipelineOptions,
    progress: ProgressCounters,
}

impl<E, S> IngestionCoordinator<E, S>
where
    E: BatchEmbedder + Send + Sync,
    S: VectorIndex + Send + Sync,
{
    pub fn new(embedder: E, store: S, options: PipelineOptions) -> Self {
        Self {
            embedder,
            writer: VectorStoreWriter::new(store, &options),
            scheduler: BatchScheduler::new(&options),
            options,
            progress: ProgressCounters::default(),
        }
    }

    pub fn progress(&self) -> &ProgressCounters {
        &self.progress
    }

    /// Ingests one already-parsed book: embed every record, store what
    /// embedded, report counts. Never fails — partial failure lives in the
    /// report.
    pub async fn ingest_book(
        &self,
        book: BookRecords,
        cancel: &CancellationToken,
    ) -> IngestionReport {
        let BookRecords {
            fingerprint,
            records,
        } = book;
        let started_at = Utc::now();
        let records_seen = records.len();

        debug!(
            stage = ?IngestionStage::Embedding,
            document_id = %fingerprint.document_id,
            records = records_seen,
            "embedding paragraphs"
        );
        let rows = self.scheduler.run(records, &self.embedder, cancel).await;
        let embedded_ok = rows.iter().filter(|(_, outcome)| outcome.is_embedded()).count();
        let embed_failures = rows.len() - embedded_ok;

        debug!(
            stage = ?IngestionStage::Storing,
            document_id = %fingerprint.document_id,
            eligible = embedded_ok,
            "storing embedded paragraphs"
        );
        let mut stored_ok = 0;
        let mut store_failures = 0;
        for batch in rows.chunks(self.options.batch_size.max(1)) {
            match self.writer.store_batch(batch, cancel).await {
                Ok(outcome) => stored_ok += outcome.stored,
                Err(error) => {
                    let eligible = batch
                        .iter()
                        .filter(|(_, outcome)| outcome.is_embedded())
                        .count();
                    store_failures += eligible;
                    warn!(
                        document_id = %fingerprint.document_id,
                        records = eligible,
                        error = %error,
                        "batch dropped at storage time"
                    );
                }
            }
        }

        self.progress
            .records_embedded
            .fetch_add(embedded_ok, Ordering::Relaxed);
        self.progress
            .records_failed
            .fetch_add(embed_failures, Ordering::Relaxed);
        self.progress
            .records_stored
            .fetch_add(stored_ok, Ordering::Relaxed);
        self.progress.documents_done.fetch_add(1, Ordering::Relaxed);

        let report = IngestionReport {
            document_id: fingerprint.document_id.clone(),
            document_title: fingerprint.title.clone(),
            records_seen,
            embedded_ok,
            embed_failures,
            stored_ok,
            store_failures,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            stage = ?IngestionStage::Reporting,
            document_id = %report.document_id,
            title = %report.document_title,
            seen = report.records_seen,
            embedded = report.embedded_ok,
            embed_failed = report.embed_failures,
            stored = report.stored_ok,
            store_failed = report.store_failures,
            "document ingestion finished"
        );

        report
    }

    /// Parses one book file and ingests it. Parse failures and empty books
    /// are document-level failures.
    pub async fn ingest_book_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<IngestionReport, SourceError> {
        debug!(stage = ?IngestionStage::Parsing, path = %path.display(), "parsing book file");
        let book = source::load_book_records(path, &self.options)?;
        Ok(self.ingest_book(book, cancel).await)
    }
}

impl<E, S> IngestionCoordinator<E, S>
where
    E: BatchEmbedder + Send + Sync + 'static,
    S: VectorIndex + Send + Sync + 'static,
{
    /// Ingests every book file under a folder, running up to
    /// `worker_count` documents concurrently. Unreadable or empty books are
    /// skipped and reported, never fatal for the run.
    pub async fn ingest_folder(
        self: &Arc<Self>,
        folder: &Path,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, SourceError> {
        let files = source::discover_book_files(folder);
        if files.is_empty() {
            return Err(SourceError::NoBooks(folder.display().to_string()));
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, books = files.len(), folder = %folder.display(), "ingestion run starting");

        let limit = Arc::new(Semaphore::new(self.options.worker_count.max(1)));
        let mut tasks = JoinSet::new();

        for path in files {
            let coordinator = Arc::clone(self);
            let limit = Arc::clone(&limit);
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = limit
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                let result = coordinator.ingest_book_file(&path, &cancel).await;
                (path, result)
            });
        }

        let mut reports = Vec::new();
        let mut skipped_books = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(report))) => reports.push(report),
                Ok((path, Err(error))) => {
                    warn!(path = %path.display(), reason = %error, "skipped book");
                    skipped_books.push(SkippedBook {
                        path,
                        reason: error.to_string(),
                    });
                }
                Err(join_error) => {
                    warn!(error = %join_error, "document worker panicked");
                }
            }
        }

        let summary = RunSummary {
            run_id,
            reports,
            skipped_books,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            %run_id,
            documents = summary.reports.len(),
            skipped = summary.skipped_books.len(),
            embedded = self.progress.records_embedded.load(Ordering::Relaxed),
            stored = self.progress.records_stored.load(Ordering::Relaxed),
            "ingestion run finished"
        );

        Ok(summary)
    }
}
