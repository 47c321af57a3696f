use crate::models::{EmbeddingOutcome, FailureReason, ParagraphRecord, PipelineOptions};
use crate::traits::BatchEmbedder;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Drives one document's paragraph stream through the embedder in fixed-size
/// batches and re-pairs every record with its outcome, preserving input
/// order. Output length always equals input length.
pub struct BatchScheduler {
    batch_size: usize,
    inter_batch_pause: Duration,
}

impl BatchScheduler {
    pub fn new(options: &PipelineOptions) -> Self {
        Self {
            batch_size: options.batch_size.max(1),
            inter_batch_pause: options.inter_batch_pause,
        }
    }

    pub async fn run<E>(
        &self,
        records: Vec<ParagraphRecord>,
        embedder: &E,
        cancel: &CancellationToken,
    ) -> Vec<(ParagraphRecord, EmbeddingOutcome)>
    where
        E: BatchEmbedder + Sync,
    {
        if records.is_empty() {
            return Vec::new();
        }

        let total_batches = records.len().div_ceil(self.batch_size);
        let mut paired = Vec::with_capacity(records.len());
        let mut batches = records.chunks(self.batch_size).enumerate().peekable();

        while let Some((batch_index, batch)) = batches.next() {
            let texts: Vec<String> = batch.iter().map(|record| record.text.clone()).collect();
            let mut outcomes = embedder.embed_batch(&texts, cancel).await;

            // A well-behaved embedder returns one outcome per input; pad or
            // truncate so a misbehaving one can never drop records silently.
            if outcomes.len() != batch.len() {
                debug!(
                    batch = batch_index + 1,
                    expected = batch.len(),
                    got = outcomes.len(),
                    "embedder broke the length invariant"
                );
                outcomes.resize(
                    batch.len(),
                    EmbeddingOutcome::Failed(FailureReason::Internal {
                        detail: "embedder returned wrong outcome count".to_string(),
                    }),
                );
            }

            debug!(
                batch = batch_index + 1,
                of = total_batches,
                embedded = outcomes.iter().filter(|outcome| outcome.is_embedded()).count(),
                "batch finished"
            );

            paired.extend(batch.iter().cloned().zip(outcomes));

            let more_to_come = batches.peek().is_some();
            if more_to_come && !self.inter_batch_pause.is_zero() && !cancel.is_cancelled() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.inter_batch_pause) => {}
                }
            }
        }

        paired
    }
}
