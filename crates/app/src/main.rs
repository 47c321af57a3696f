use chrono::Utc;
use clap::{Parser, Subcommand};
use epub_embed_core::{
    BatchEmbedder, EmbeddingOutcome, IngestionCoordinator, PipelineOptions, RemoteEmbedder,
    TurbopufferStore, VectorIndex, VectorQuery,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "epub-embed", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Embedding provider endpoint
    #[arg(
        long,
        env = "EMBEDDINGS_ENDPOINT",
        default_value = "https://api-inference.huggingface.co/pipeline/feature-extraction/BAAI/bge-m3"
    )]
    embeddings_endpoint: String,

    /// Embedding provider API key
    #[arg(long, env = "EMBEDDINGS_API_KEY", hide_env_values = true)]
    embeddings_api_key: String,

    /// Vector store base URL
    #[arg(long, env = "VECTOR_STORE_URL", default_value = "https://api.turbopuffer.com")]
    store_url: String,

    /// Vector store API key
    #[arg(long, env = "VECTOR_STORE_API_KEY", hide_env_values = true)]
    store_api_key: String,

    /// Target namespace in the vector store
    #[arg(long, default_value = "alexandria-embeddings")]
    namespace: String,

    /// Expected embedding dimension (sanity check only)
    #[arg(long, default_value = "1024")]
    dimensions: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Embed every book file in a folder and upsert the vectors.
    Ingest {
        /// Folder that contains parsed book files recursively.
        #[arg(long)]
        folder: String,
        /// Paragraphs per embedding request.
        #[arg(long, default_value = "10")]
        batch_size: usize,
        /// Documents processed concurrently.
        #[arg(long, default_value = "1")]
        workers: usize,
        /// Optional cap on embedding retries per batch (unbounded if omitted).
        #[arg(long)]
        embed_retry_limit: Option<u32>,
        /// Upsert attempts per batch before dropping it from the store.
        #[arg(long, default_value = "5")]
        max_store_retries: u32,
    },
    /// Embed a query string and return the closest stored paragraphs.
    Query {
        /// Query text
        #[arg(long)]
        query: String,
        /// Number of hits to return.
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// List the namespaces currently present in the vector store.
    Namespaces,
    /// Delete the configured namespace and everything in it.
    DropNamespace,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight work as cancelled");
            signal_cancel.cancel();
        }
    });

    let store = TurbopufferStore::new(&cli.store_url, &cli.store_api_key, &cli.namespace)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    match cli.command {
        Command::Ingest {
            folder,
            batch_size,
            workers,
            embed_retry_limit,
            max_store_retries,
        } => {
            let options = PipelineOptions {
                batch_size,
                worker_count: workers,
                embed_retry_limit,
                max_store_retries,
                embedding_dimensions: cli.dimensions,
                ..PipelineOptions::default()
            };

            let embedder =
                RemoteEmbedder::new(&cli.embeddings_endpoint, &cli.embeddings_api_key, &options)
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            info!(
                folder = %folder,
                namespace = %cli.namespace,
                batch_size,
                workers,
                started_at = %Utc::now().to_rfc3339(),
                "ingestion starting"
            );

            let coordinator = Arc::new(IngestionCoordinator::new(embedder, store, options));
            let summary = coordinator
                .ingest_folder(Path::new(&folder), &cancel)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            for skipped in &summary.skipped_books {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped book");
            }

            for report in &summary.reports {
                println!(
                    "{}: {} seen, {} embedded, {} embed-failed, {} stored, {} store-failed ({}s)",
                    report.document_title,
                    report.records_seen,
                    report.embedded_ok,
                    report.embed_failures,
                    report.stored_ok,
                    report.store_failures,
                    report.duration().num_seconds()
                );
            }

            println!(
                "run {}: {} documents ingested, {} skipped",
                summary.run_id,
                summary.reports.len(),
                summary.skipped_books.len()
            );
        }
        Command::Query { query, top_k } => {
            let options = PipelineOptions {
                embedding_dimensions: cli.dimensions,
                // A query should answer promptly or not at all.
                embed_retry_limit: Some(3),
                initial_backoff: Duration::from_millis(500),
                ..PipelineOptions::default()
            };

            let embedder =
                RemoteEmbedder::new(&cli.embeddings_endpoint, &cli.embeddings_api_key, &options)
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let outcomes = embedder
                .embed_batch(std::slice::from_ref(&query), &cancel)
                .await;
            let vector = match outcomes.into_iter().next() {
                Some(EmbeddingOutcome::Embedded(vector)) => vector,
                Some(EmbeddingOutcome::Failed(reason)) => {
                    anyhow::bail!("query embedding failed: {reason:?}")
                }
                None => anyhow::bail!("query embedding returned nothing"),
            };

            let mut request = VectorQuery::new(vector, top_k);
            request.include_attributes = vec![
                "book_title".to_string(),
                "book_author".to_string(),
                "chapter_title".to_string(),
                "paragraph_text".to_string(),
            ];

            let hits = store
                .query_vectors(&request)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!("query: {query}");
            for hit in hits {
                let title = hit
                    .attributes
                    .get("book_title")
                    .and_then(|value| value.as_str())
                    .unwrap_or("Unknown");
                let author = hit
                    .attributes
                    .get("book_author")
                    .and_then(|value| value.as_str())
                    .unwrap_or("Unknown");
                let text = hit
                    .attributes
                    .get("paragraph_text")
                    .and_then(|value| value.as_str())
                    .unwrap_or("");

                println!("[{:.4}] {} ({} — {})", hit.distance, hit.id, title, author);
                if !text.is_empty() {
                    println!("  {text}");
                }
            }
        }
        Command::Namespaces => {
            let namespaces = store
                .list_namespaces()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            for namespace in namespaces {
                println!("{namespace}");
            }
        }
        Command::DropNamespace => {
            store
                .delete_namespace()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("namespace {} deleted", cli.namespace);
        }
    }

    Ok(())
}
