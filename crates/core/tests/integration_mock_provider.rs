//! Integration tests driving the embedding client against a mock HTTP
//! provider: transient failures resolve through backoff, client rejections
//! abandon the batch, cancellation wins over indefinite retry.

use std::time::Duration;

use epub_embed_core::{
    BatchEmbedder, EmbeddingOutcome, FailureReason, PipelineOptions, RemoteEmbedder,
};
use httpmock::prelude::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn test_options() -> PipelineOptions {
    PipelineOptions {
        // Wide enough that a test can swap mocks while the client waits.
        initial_backoff: Duration::from_millis(300),
        max_backoff: Duration::from_millis(600),
        embedding_dimensions: 2,
        request_timeout: Duration::from_secs(5),
        ..PipelineOptions::default()
    }
}

fn texts(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("paragraph number {i}")).collect()
}

async fn wait_for_hits(mock: &httpmock::Mock<'_>, at_least: usize) {
    for _ in 0..500 {
        if mock.hits_async().await >= at_least {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("mock never reached {at_least} hits");
}

#[tokio::test]
async fn batch_succeeds_after_transient_unavailability() {
    let server = MockServer::start_async().await;
    let mut unavailable = server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(503);
        })
        .await;

    let embedder = RemoteEmbedder::new(server.url("/embed"), "test-key", &test_options())
        .expect("embedder should build");

    let task = tokio::spawn(async move {
        embedder
            .embed_batch(&texts(3), &CancellationToken::new())
            .await
    });

    // Let the first attempt land on the overloaded provider, then recover it.
    wait_for_hits(&unavailable, 1).await;
    unavailable.delete_async().await;
    let healthy = server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(200)
                .json_body(json!([[0.1, 0.2], [0.3, 0.4], [0.5, 0.6]]));
        })
        .await;

    let outcomes = task.await.expect("embed task should not panic");

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(EmbeddingOutcome::is_embedded));
    // The batch was retried exactly once after the 503.
    assert_eq!(healthy.hits_async().await, 1);
}

#[tokio::test]
async fn client_rejection_abandons_batch_without_retry() {
    let server = MockServer::start_async().await;
    let rejected = server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(422).json_body(json!({"error": "input too long"}));
        })
        .await;

    let embedder = RemoteEmbedder::new(server.url("/embed"), "test-key", &test_options())
        .expect("embedder should build");

    let outcomes = embedder
        .embed_batch(&texts(3), &CancellationToken::new())
        .await;

    assert_eq!(outcomes.len(), 3);
    for outcome in &outcomes {
        assert_eq!(
            *outcome,
            EmbeddingOutcome::Failed(FailureReason::ClientRejected { status: 422 })
        );
    }
    assert_eq!(rejected.hits_async().await, 1);
}

#[tokio::test]
async fn length_mismatch_is_treated_as_transient() {
    let server = MockServer::start_async().await;
    let mut short_changed = server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(200).json_body(json!([[0.1, 0.2], [0.3, 0.4]]));
        })
        .await;

    let embedder = RemoteEmbedder::new(server.url("/embed"), "test-key", &test_options())
        .expect("embedder should build");

    let task = tokio::spawn(async move {
        embedder
            .embed_batch(&texts(3), &CancellationToken::new())
            .await
    });

    wait_for_hits(&short_changed, 1).await;
    short_changed.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(200)
                .json_body(json!([[0.1, 0.2], [0.3, 0.4], [0.5, 0.6]]));
        })
        .await;

    let outcomes = task.await.expect("embed task should not panic");
    assert!(outcomes.iter().all(EmbeddingOutcome::is_embedded));
}

#[tokio::test]
async fn rate_limiting_is_retried_not_rejected() {
    let server = MockServer::start_async().await;
    let mut throttled = server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(429);
        })
        .await;

    let embedder = RemoteEmbedder::new(server.url("/embed"), "test-key", &test_options())
        .expect("embedder should build");

    let task = tokio::spawn(async move {
        embedder
            .embed_batch(&texts(1), &CancellationToken::new())
            .await
    });

    wait_for_hits(&throttled, 1).await;
    throttled.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(200).json_body(json!([[1.0, 2.0]]));
        })
        .await;

    let outcomes = task.await.expect("embed task should not panic");
    assert_eq!(outcomes, vec![EmbeddingOutcome::Embedded(vec![1.0, 2.0])]);
}

#[tokio::test]
async fn provider_object_payload_is_normalized() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/embed")
                .json_body(json!({"inputs": ["paragraph number 1", "paragraph number 2"]}));
            then.status(200).json_body(json!([
                {"embedding": [0.1, 0.2], "index": 0},
                {"embedding": [0.3, 0.4], "index": 1}
            ]));
        })
        .await;

    let embedder = RemoteEmbedder::new(server.url("/embed"), "test-key", &test_options())
        .expect("embedder should build");

    let outcomes = embedder
        .embed_batch(&texts(2), &CancellationToken::new())
        .await;

    assert_eq!(
        outcomes,
        vec![
            EmbeddingOutcome::Embedded(vec![0.1, 0.2]),
            EmbeddingOutcome::Embedded(vec![0.3, 0.4]),
        ]
    );
}

#[tokio::test]
async fn wrong_dimension_is_a_terminal_internal_failure() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(200).json_body(json!([[0.1, 0.2, 0.3]]));
        })
        .await;

    let embedder = RemoteEmbedder::new(server.url("/embed"), "test-key", &test_options())
        .expect("embedder should build");

    let outcomes = embedder
        .embed_batch(&texts(1), &CancellationToken::new())
        .await;

    assert!(matches!(
        outcomes[0],
        EmbeddingOutcome::Failed(FailureReason::Internal { .. })
    ));
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn cancellation_mid_retry_marks_records_cancelled() {
    let server = MockServer::start_async().await;
    let unavailable = server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(503);
        })
        .await;

    let options = PipelineOptions {
        // Long enough that the test observes the wait, not a busy loop.
        initial_backoff: Duration::from_secs(30),
        max_backoff: Duration::from_secs(60),
        embedding_dimensions: 2,
        ..PipelineOptions::default()
    };
    let embedder = RemoteEmbedder::new(server.url("/embed"), "test-key", &options)
        .expect("embedder should build");

    let cancel = CancellationToken::new();
    let observed = cancel.clone();
    let task = tokio::spawn(async move { embedder.embed_batch(&texts(2), &observed).await });

    wait_for_hits(&unavailable, 1).await;
    cancel.cancel();

    let outcomes = task.await.expect("embed task should not panic");
    assert_eq!(
        outcomes,
        vec![EmbeddingOutcome::Failed(FailureReason::Cancelled); 2]
    );
}

#[tokio::test]
async fn configured_retry_cap_abandons_the_batch() {
    let server = MockServer::start_async().await;
    let unavailable = server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(503);
        })
        .await;

    let options = PipelineOptions {
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        embed_retry_limit: Some(2),
        embedding_dimensions: 2,
        ..PipelineOptions::default()
    };
    let embedder = RemoteEmbedder::new(server.url("/embed"), "test-key", &options)
        .expect("embedder should build");

    let outcomes = embedder
        .embed_batch(&texts(2), &CancellationToken::new())
        .await;

    assert_eq!(
        outcomes,
        vec![EmbeddingOutcome::Failed(FailureReason::RetriesExhausted); 2]
    );
    // Initial attempt plus the two allowed retries.
    assert_eq!(unavailable.hits_async().await, 3);
}
