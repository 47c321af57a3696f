use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookFingerprint {
    pub document_id: String,
    pub title: String,
    pub author: String,
    pub source_path: String,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParagraphRecord {
    pub document_id: String,
    pub chapter_index: u32,
    pub chapter_title: String,
    pub paragraph_index: u32,
    pub text: String,
    pub metadata: BTreeMap<String, Value>,
}

impl ParagraphRecord {
    /// Deterministic store key; re-running the same document upserts
    /// instead of duplicating.
    pub fn store_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.document_id, self.chapter_index, self.paragraph_index
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Non-retriable 4xx from the embedding provider.
    ClientRejected { status: u16 },
    /// Local failure while handling an otherwise well-formed response.
    Internal { detail: String },
    /// Configured retry cap reached without a usable response.
    RetriesExhausted,
    /// External cancellation observed before the record completed.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EmbeddingOutcome {
    Embedded(Vec<f32>),
    Failed(FailureReason),
}

impl EmbeddingOutcome {
    pub fn is_embedded(&self) -> bool {
        matches!(self, EmbeddingOutcome::Embedded(_))
    }

    pub fn vector(&self) -> Option<&[f32]> {
        match self {
            EmbeddingOutcome::Embedded(vector) => Some(vector),
            EmbeddingOutcome::Failed(_) => None,
        }
    }
}

/// Column-oriented upsert payload: one entry per record in every list, all
/// lists aligned by position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnarBatch {
    pub ids: Vec<String>,
    pub vectors: Vec<Vec<f32>>,
    pub attributes: BTreeMap<String, Vec<Value>>,
}

impl ColumnarBatch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub distance_metric: String,
    pub include_attributes: Vec<String>,
}

impl VectorQuery {
    pub fn new(vector: Vec<f32>, top_k: usize) -> Self {
        Self {
            vector,
            top_k,
            distance_metric: "cosine_distance".to_string(),
            include_attributes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryHit {
    pub id: String,
    pub distance: f64,
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub document_id: String,
    pub document_title: String,
    pub records_seen: usize,
    pub embedded_ok: usize,
    pub embed_failures: usize,
    pub stored_ok: usize,
    pub store_failures: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IngestionReport {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub batch_size: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// None keeps retrying transient provider failures until cancelled.
    pub embed_retry_limit: Option<u32>,
    pub max_store_retries: u32,
    pub embedding_dimensions: usize,
    pub min_paragraph_chars: usize,
    pub inter_batch_pause: Duration,
    pub worker_count: usize,
    pub request_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            embed_retry_limit: None,
            max_store_retries: 5,
            embedding_dimensions: 1024,
            min_paragraph_chars: 15,
            inter_batch_pause: Duration::from_millis(200),
            worker_count: 1,
            request_timeout: Duration::from_secs(90),
        }
    }
}
