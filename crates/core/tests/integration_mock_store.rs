//! Integration tests for the vector store client wire format: column
//! alignment on upsert, ranked query parsing, namespace administration.

use std::collections::BTreeMap;

use epub_embed_core::{
    ColumnarBatch, StoreError, TurbopufferStore, VectorIndex, VectorQuery,
};
use httpmock::prelude::*;
use serde_json::json;

fn sample_batch() -> ColumnarBatch {
    let mut attributes = BTreeMap::new();
    attributes.insert(
        "book_title".to_string(),
        vec![json!("1984"), json!("1984")],
    );
    attributes.insert(
        "chapter_title".to_string(),
        vec![json!("Part One"), json!(null)],
    );

    ColumnarBatch {
        ids: vec!["doc-1:1:1".to_string(), "doc-1:1:2".to_string()],
        vectors: vec![vec![0.1, 0.2], vec![0.3, 0.4]],
        attributes,
    }
}

#[tokio::test]
async fn upsert_sends_aligned_columns() {
    let server = MockServer::start_async().await;
    let upsert = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/vectors/orwell-shelf")
                .header("authorization", "Bearer store-key")
                .json_body(json!({
                    "ids": ["doc-1:1:1", "doc-1:1:2"],
                    "vectors": [[0.1, 0.2], [0.3, 0.4]],
                    "attributes": {
                        "book_title": ["1984", "1984"],
                        "chapter_title": ["Part One", null]
                    }
                }));
            then.status(200).json_body(json!({"status": "OK"}));
        })
        .await;

    let store = TurbopufferStore::new(server.base_url(), "store-key", "orwell-shelf")
        .expect("store should build");

    store
        .upsert_columns(&sample_batch())
        .await
        .expect("upsert should succeed");

    assert_eq!(upsert.hits_async().await, 1);
}

#[tokio::test]
async fn upsert_surfaces_backend_failures_with_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/vectors/orwell-shelf");
            then.status(503).body("upstream unavailable");
        })
        .await;

    let store = TurbopufferStore::new(server.base_url(), "store-key", "orwell-shelf")
        .expect("store should build");

    let error = store
        .upsert_columns(&sample_batch())
        .await
        .expect_err("upsert should fail");

    match &error {
        StoreError::BackendResponse { status, .. } => assert_eq!(*status, 503),
        other => panic!("unexpected error: {other}"),
    }
    assert!(error.is_transient());
}

#[tokio::test]
async fn empty_batch_skips_the_wire_entirely() {
    let server = MockServer::start_async().await;
    let upsert = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/vectors/orwell-shelf");
            then.status(200);
        })
        .await;

    let store = TurbopufferStore::new(server.base_url(), "store-key", "orwell-shelf")
        .expect("store should build");

    store
        .upsert_columns(&ColumnarBatch::default())
        .await
        .expect("empty upsert is a no-op");

    assert_eq!(upsert.hits_async().await, 0);
}

#[tokio::test]
async fn query_parses_ranked_hits() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/vectors/orwell-shelf/query")
                .json_body(json!({
                    "vector": [0.1, 0.2],
                    "top_k": 3,
                    "distance_metric": "cosine_distance",
                    "include_attributes": ["book_title", "paragraph_text"]
                }));
            then.status(200).json_body(json!([
                {
                    "id": "doc-1:1:1",
                    "dist": 0.12,
                    "attributes": {"book_title": "1984", "paragraph_text": "It was a bright cold day."}
                },
                {
                    "id": "doc-1:2:7",
                    "dist": 0.34,
                    "attributes": {"book_title": "1984", "paragraph_text": "The clocks were striking thirteen."}
                }
            ]));
        })
        .await;

    let store = TurbopufferStore::new(server.base_url(), "store-key", "orwell-shelf")
        .expect("store should build");

    let mut query = VectorQuery::new(vec![0.1, 0.2], 3);
    query.include_attributes = vec!["book_title".to_string(), "paragraph_text".to_string()];

    let hits = store
        .query_vectors(&query)
        .await
        .expect("query should succeed");

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "doc-1:1:1");
    assert!((hits[0].distance - 0.12).abs() < 1e-9);
    assert_eq!(hits[1].attributes["book_title"], json!("1984"));
}

#[tokio::test]
async fn namespaces_are_listed_and_deleted() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/namespaces");
            then.status(200).json_body(json!({
                "namespaces": [{"id": "orwell-shelf"}, {"id": "test-run"}]
            }));
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/v1/vectors/test-run");
            then.status(200);
        })
        .await;

    let listing_store = TurbopufferStore::new(server.base_url(), "store-key", "orwell-shelf")
        .expect("store should build");
    let namespaces = listing_store
        .list_namespaces()
        .await
        .expect("listing should succeed");
    assert_eq!(namespaces, vec!["orwell-shelf", "test-run"]);

    let doomed_store = TurbopufferStore::new(server.base_url(), "store-key", "test-run")
        .expect("store should build");
    doomed_store
        .delete_namespace()
        .await
        .expect("delete should succeed");
    assert_eq!(delete.hits_async().await, 1);
}
