pub mod backoff;
pub mod coordinator;
pub mod embedder;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod source;
pub mod stores;
pub mod traits;
pub mod writer;

pub use backoff::RetryState;
pub use coordinator::{IngestionCoordinator, IngestionStage, ProgressCounters, RunSummary};
pub use embedder::{normalize_embedding_payload, NormalizedPayload, RemoteEmbedder};
pub use error::{EmbedError, SourceError, StoreError};
pub use models::{
    BookFingerprint, ColumnarBatch, EmbeddingOutcome, FailureReason, IngestionReport,
    ParagraphRecord, PipelineOptions, QueryHit, VectorQuery,
};
pub use scheduler::BatchScheduler;
pub use source::{discover_book_files, load_book_records, BookRecords, SkippedBook};
pub use stores::TurbopufferStore;
pub use traits::{BatchEmbedder, VectorIndex};
pub use writer::{columnarize, StoreOutcome, VectorStoreWriter};
