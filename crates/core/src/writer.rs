use crate::backoff::RetryState;
use crate::error::StoreError;
use crate::models::{ColumnarBatch, EmbeddingOutcome, ParagraphRecord, PipelineOptions};
use crate::traits::VectorIndex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of writing one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOutcome {
    /// Records upserted into the store.
    pub stored: usize,
    /// Records excluded up front because their embedding failed.
    pub skipped_failures: usize,
}

/// Transforms embedded records into the store's column-oriented payload and
/// upserts them, retrying transient store failures a bounded number of
/// times.
pub struct VectorStoreWriter<S> {
    store: S,
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl<S> VectorStoreWriter<S>
where
    S: VectorIndex + Sync,
{
    pub fn new(store: S, options: &PipelineOptions) -> Self {
        Self {
            store,
            max_retries: options.max_store_retries.max(1),
            initial_backoff: options.initial_backoff,
            max_backoff: options.max_backoff,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn store_batch(
        &self,
        rows: &[(ParagraphRecord, EmbeddingOutcome)],
        cancel: &CancellationToken,
    ) -> Result<StoreOutcome, StoreError> {
        let (batch, skipped_failures) = columnarize(rows);

        if batch.is_empty() {
            return Ok(StoreOutcome {
                stored: 0,
                skipped_failures,
            });
        }

        let mut retry = RetryState::new(self.initial_backoff, self.max_backoff);
        let mut last_failure = String::new();

        while retry.attempt() < self.max_retries {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }

            match self.store.upsert_columns(&batch).await {
                Ok(()) => {
                    return Ok(StoreOutcome {
                        stored: batch.len(),
                        skipped_failures,
                    });
                }
                Err(error) if error.is_transient() => {
                    last_failure = error.to_string();
                    let delay = retry.next_delay();
                    debug!(
                        attempt = retry.attempt(),
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %last_failure,
                        "transient store failure, backing off"
                    );

                    if retry.attempt() >= self.max_retries {
                        break;
                    }

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(error) => return Err(error),
            }
        }

        warn!(
            attempts = retry.attempt(),
            records = batch.len(),
            "store retries exhausted, dropping batch from store"
        );
        Err(StoreError::RetriesExhausted {
            attempts: retry.attempt(),
            details: last_failure,
        })
    }
}

/// Builds the aligned column payload from successfully embedded rows.
/// Attribute keys are the union of every row's metadata keys; rows missing a
/// key contribute an explicit null so all columns keep the id/vector length.
pub fn columnarize(rows: &[(ParagraphRecord, EmbeddingOutcome)]) -> (ColumnarBatch, usize) {
    let embedded: Vec<(&ParagraphRecord, &[f32])> = rows
        .iter()
        .filter_map(|(record, outcome)| outcome.vector().map(|vector| (record, vector)))
        .collect();
    let skipped_failures = rows.len() - embedded.len();

    let all_keys: BTreeSet<&String> = embedded
        .iter()
        .flat_map(|(record, _)| record.metadata.keys())
        .collect();

    let mut batch = ColumnarBatch::default();
    for (record, vector) in &embedded {
        batch.ids.push(record.store_key());
        batch.vectors.push(vector.to_vec());
    }

    for key in all_keys {
        let column: Vec<Value> = embedded
            .iter()
            .map(|(record, _)| record.metadata.get(key).cloned().unwrap_or(Value::Null))
            .collect();
        batch.attributes.insert(key.clone(), column);
    }

    (batch, skipped_failures)
}
