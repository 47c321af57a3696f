use crate::backoff::RetryState;
use crate::error::EmbedError;
use crate::models::{EmbeddingOutcome, FailureReason, PipelineOptions};
use crate::traits::BatchEmbedder;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Remote embedding client. Transient provider failures are resolved by
/// waiting and retrying the same batch; only terminal per-record outcomes
/// ever leave this type.
pub struct RemoteEmbedder {
    client: Client,
    endpoint: Url,
    expected_dimensions: Option<usize>,
    initial_backoff: Duration,
    max_backoff: Duration,
    retry_limit: Option<u32>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    inputs: &'a [String],
}

/// One provider exchange, classified.
enum Attempt {
    Success(Vec<Vec<f32>>),
    Transient(String),
    Rejected(StatusCode),
    Internal(String),
}

impl RemoteEmbedder {
    pub fn new(
        endpoint: impl AsRef<str>,
        api_key: impl AsRef<str>,
        options: &PipelineOptions,
    ) -> Result<Self, EmbedError> {
        let api_key = api_key.as_ref().trim();
        if api_key.is_empty() {
            return Err(EmbedError::Credentials(
                "embedding api key is empty".to_string(),
            ));
        }

        let endpoint = Url::parse(endpoint.as_ref())?;

        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {api_key}");
        let mut auth = HeaderValue::from_str(&bearer)
            .map_err(|_| EmbedError::Credentials("api key is not a valid header".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(options.request_timeout)
            .default_headers(headers)
            .build()?;

        let expected_dimensions = if options.embedding_dimensions > 0 {
            Some(options.embedding_dimensions)
        } else {
            None
        };

        Ok(Self {
            client,
            endpoint,
            expected_dimensions,
            initial_backoff: options.initial_backoff,
            max_backoff: options.max_backoff,
            retry_limit: options.embed_retry_limit,
        })
    }

    async fn attempt_batch(&self, texts: &[String]) -> Attempt {
        let request = EmbeddingRequest { inputs: texts };
        let response = match self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => return Attempt::Transient(format!("request failed: {error}")),
        };

        let status = response.status();

        if status.is_success() {
            let payload: Value = match response.json().await {
                Ok(payload) => payload,
                Err(error) => {
                    return Attempt::Transient(format!("undecodable response body: {error}"))
                }
            };

            return match normalize_embedding_payload(payload) {
                NormalizedPayload::Recognized(vectors) => self.validate_vectors(vectors, texts),
                NormalizedPayload::Unrecognized(raw) => {
                    Attempt::Transient(format!("unrecognized payload shape: {}", summarize(&raw)))
                }
            };
        }

        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            return Attempt::Rejected(status);
        }

        Attempt::Transient(format!("provider returned {status}"))
    }

    fn validate_vectors(&self, vectors: Vec<Vec<f32>>, texts: &[String]) -> Attempt {
        if vectors.len() != texts.len() {
            return Attempt::Transient(format!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            ));
        }

        let dimension = match vectors.first() {
            Some(first) => first.len(),
            None => return Attempt::Success(vectors),
        };

        if vectors.iter().any(|vector| vector.len() != dimension) {
            return Attempt::Internal("ragged vector lengths in provider response".to_string());
        }

        if let Some(expected) = self.expected_dimensions {
            if dimension != expected {
                return Attempt::Internal(format!(
                    "provider returned {dimension}-dimensional vectors, expected {expected}"
                ));
            }
        }

        Attempt::Success(vectors)
    }
}

#[async_trait]
impl BatchEmbedder for RemoteEmbedder {
    async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Vec<EmbeddingOutcome> {
        if texts.is_empty() {
            return Vec::new();
        }

        let mut retry = RetryState::new(self.initial_backoff, self.max_backoff);

        loop {
            if cancel.is_cancelled() {
                return fail_all(texts.len(), FailureReason::Cancelled);
            }

            match self.attempt_batch(texts).await {
                Attempt::Success(vectors) => {
                    return vectors.into_iter().map(EmbeddingOutcome::Embedded).collect();
                }
                Attempt::Rejected(status) => {
                    warn!(%status, batch_len = texts.len(), "provider rejected batch");
                    return fail_all(
                        texts.len(),
                        FailureReason::ClientRejected {
                            status: status.as_u16(),
                        },
                    );
                }
                Attempt::Internal(detail) => {
                    warn!(detail = %detail, batch_len = texts.len(), "failed handling provider response");
                    return fail_all(texts.len(), FailureReason::Internal { detail });
                }
                Attempt::Transient(reason) => {
                    if let Some(limit) = self.retry_limit {
                        if retry.attempt() >= limit {
                            warn!(
                                attempts = retry.attempt(),
                                reason = %reason,
                                "embedding retry limit reached, abandoning batch"
                            );
                            return fail_all(texts.len(), FailureReason::RetriesExhausted);
                        }
                    }

                    let delay = retry.next_delay();
                    debug!(
                        attempt = retry.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "transient provider failure, backing off"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return fail_all(texts.len(), FailureReason::Cancelled);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

fn fail_all(len: usize, reason: FailureReason) -> Vec<EmbeddingOutcome> {
    vec![EmbeddingOutcome::Failed(reason); len]
}

fn summarize(raw: &Value) -> String {
    let rendered = raw.to_string();
    if rendered.chars().count() > 200 {
        let head: String = rendered.chars().take(200).collect();
        format!("{head}...")
    } else {
        rendered
    }
}

#[derive(Debug, PartialEq)]
pub enum NormalizedPayload {
    Recognized(Vec<Vec<f32>>),
    Unrecognized(Value),
}

/// Normalizes the shapes embedding providers are known to answer with into a
/// canonical vector list: a flat list of vectors, a singly-nested list (one
/// extra level per input), a list of `{"embedding": [...]}` objects, or a
/// top-level `{"embeddings": [...]}` object.
pub fn normalize_embedding_payload(payload: Value) -> NormalizedPayload {
    match &payload {
        Value::Array(items) => {
            if items.is_empty() {
                return NormalizedPayload::Recognized(Vec::new());
            }

            if let Some(vectors) = items
                .iter()
                .map(|item| {
                    item.as_array()
                        .filter(|inner| inner.len() == 1 && inner[0].is_array())
                        .and_then(|inner| value_to_vector(&inner[0]))
                })
                .collect::<Option<Vec<_>>>()
            {
                return NormalizedPayload::Recognized(vectors);
            }

            if let Some(vectors) = items
                .iter()
                .map(value_to_vector)
                .collect::<Option<Vec<_>>>()
            {
                return NormalizedPayload::Recognized(vectors);
            }

            if let Some(vectors) = items
                .iter()
                .map(|item| item.get("embedding").and_then(value_to_vector))
                .collect::<Option<Vec<_>>>()
            {
                return NormalizedPayload::Recognized(vectors);
            }

            NormalizedPayload::Unrecognized(payload)
        }
        Value::Object(map) => {
            if let Some(embeddings) = map.get("embeddings").and_then(Value::as_array) {
                if let Some(vectors) = embeddings
                    .iter()
                    .map(value_to_vector)
                    .collect::<Option<Vec<_>>>()
                {
                    return NormalizedPayload::Recognized(vectors);
                }
            }
            NormalizedPayload::Unrecognized(payload)
        }
        _ => NormalizedPayload::Unrecognized(payload),
    }
}

fn value_to_vector(value: &Value) -> Option<Vec<f32>> {
    let items = value.as_array()?;
    items
        .iter()
        .map(|item| item.as_f64().map(|number| number as f32))
        .collect()
}
