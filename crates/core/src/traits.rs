use crate::error::StoreError;
use crate::models::{ColumnarBatch, EmbeddingOutcome, QueryHit, VectorQuery};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Turns one batch of texts into one outcome per text, in input order.
/// Implementations resolve transient provider failures internally; the
/// returned vector always has the same length as `texts`.
#[async_trait]
pub trait BatchEmbedder {
    async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Vec<EmbeddingOutcome>;
}

#[async_trait]
pub trait VectorIndex {
    async fn upsert_columns(&self, batch: &ColumnarBatch) -> Result<(), StoreError>;

    async fn query_vectors(&self, query: &VectorQuery) -> Result<Vec<QueryHit>, StoreError>;
}
