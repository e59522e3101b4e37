//! Export CLI: parse a `book_pages` SQL dump, segment it, embed it, and publish it into a
//! Chroma collection, recording the run as an export job.

use clap::Parser;
use ketabsearch::chroma::ChromaClient;
use ketabsearch::config::{self, EmbeddingProvider};
use ketabsearch::db::{Database, sync_embedding_models_from_jobs};
use ketabsearch::embedding::create_embedder_for_model;
use ketabsearch::ingest::exporter::{ExportConfig, mask_secret_args, run_export};
use ketabsearch::ingest::paragraphs::TitleHeuristics;
use ketabsearch::ingest::segments::SegmentConfig;
use ketabsearch::logging;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "export-pages",
    about = "Export a book_pages SQL dump into ChromaDB as paragraph segments."
)]
struct Args {
    /// Path to the SQL dump file.
    #[arg(long, default_value = "book_pages.sql")]
    sql_path: PathBuf,
    /// Target collection name (defaults to CHROMA_COLLECTION).
    #[arg(long)]
    collection: Option<String>,
    /// Number of segments to send per batch.
    #[arg(long, default_value_t = 48)]
    batch_size: usize,
    /// Maximum characters per primary segment.
    #[arg(long, default_value_t = 200)]
    max_length: usize,
    /// Overlap characters around each segment.
    #[arg(long, default_value_t = 100)]
    context: usize,
    /// Minimum merged paragraph line count.
    #[arg(long, default_value_t = 3)]
    min_paragraph_lines: usize,
    /// Importance weight assigned to heading segments.
    #[arg(long, default_value_t = 1.5)]
    title_weight: f64,
    /// Emit one whole-page document per page alongside the segments.
    #[arg(long)]
    page_level_docs: bool,
    /// Skip storing the full paragraph text on chunked segments.
    #[arg(long)]
    no_paragraph_text: bool,
    /// Chroma host (defaults to CHROMA_HOST).
    #[arg(long)]
    host: Option<String>,
    /// Chroma port (defaults to CHROMA_PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Use HTTPS when connecting to Chroma.
    #[arg(long)]
    ssl: bool,
    /// Authorization header value for secured Chroma instances.
    #[arg(long)]
    api_key: Option<String>,
    /// Drop the collection before uploading new documents.
    #[arg(long)]
    reset: bool,
    /// Embedding backend: openai | huggingface | gemini | none.
    #[arg(long)]
    embedding_provider: Option<String>,
    /// Embedding model identifier.
    #[arg(long)]
    embedding_model: Option<String>,
    /// OpenAI API key; overrides the environment when provided.
    #[arg(long)]
    openai_api_key: Option<String>,
    /// Gemini API key; overrides the environment when provided.
    #[arg(long)]
    gemini_api_key: Option<String>,
    /// Device for the local transformer backend (cpu | cuda).
    #[arg(long)]
    device: Option<String>,
}

#[tokio::main]
async fn main() {
    config::init_settings();
    logging::init_tracing(&config::get_settings().log_level);

    if let Err(err) = run(Args::parse()).await {
        tracing::error!("{err:#}");
        eprintln!("Export failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut settings = config::get_settings().clone();
    if let Some(host) = &args.host {
        settings.chroma_host = host.clone();
    }
    if let Some(port) = args.port {
        settings.chroma_port = port;
    }
    if args.ssl {
        settings.chroma_ssl = true;
    }
    if let Some(api_key) = &args.api_key {
        settings.chroma_api_key = Some(api_key.clone());
    }
    if let Some(key) = &args.openai_api_key {
        settings.openai_api_key = Some(key.clone());
    }
    if let Some(key) = &args.gemini_api_key {
        settings.gemini_api_key = Some(key.clone());
    }
    if let Some(device) = &args.device {
        settings.embedding_device = Some(device.clone());
    }

    let provider: EmbeddingProvider = match &args.embedding_provider {
        Some(value) => value
            .parse()
            .map_err(|()| anyhow::anyhow!("unsupported embedding provider '{value}'"))?,
        None => settings.embedding_provider,
    };
    let model = args
        .embedding_model
        .clone()
        .unwrap_or_else(|| settings.embedding_model.clone());
    let collection = args
        .collection
        .clone()
        .unwrap_or_else(|| settings.chroma_collection.clone());

    if !args.sql_path.exists() {
        anyhow::bail!("SQL file not found: {}", args.sql_path.display());
    }

    let chroma = ChromaClient::from_settings(&settings)?;
    let db = Database::default_path();
    db.init_schema()?;

    let embedder_settings = settings.clone();
    let embedder_model = model.clone();
    let embedder = tokio::task::spawn_blocking(move || {
        create_embedder_for_model(provider, &embedder_model, &embedder_settings)
    })
    .await??;

    let export_config = ExportConfig {
        sql_path: args.sql_path.clone(),
        collection,
        batch_size: args.batch_size,
        segmenting: SegmentConfig {
            max_length: args.max_length,
            context_length: args.context,
            min_paragraph_lines: args.min_paragraph_lines,
            title_weight: args.title_weight,
            include_page_level: args.page_level_docs,
            store_paragraph_text: !args.no_paragraph_text,
            title_heuristics: TitleHeuristics::default(),
        },
        reset: args.reset,
        provider,
        model,
        command_line_args: Some(mask_secret_args(&std::env::args().collect::<Vec<_>>())),
    };

    let outcome = run_export(&settings, export_config, &db, &chroma, Arc::new(embedder)).await?;

    // Refresh the model registry so the new collection is immediately selectable.
    if let Err(err) = db
        .call(|conn| sync_embedding_models_from_jobs(conn, 50))
        .await
    {
        tracing::warn!(error = %err, "Failed to sync embedding models after export");
    }

    println!(
        "Export completed: job #{}, collection '{}', {} records, {} books, {} segments{}",
        outcome.job_id,
        outcome.collection,
        outcome.total_records,
        outcome.total_books,
        outcome.total_segments,
        outcome
            .total_documents_in_collection
            .map(|count| format!(", {count} documents in collection"))
            .unwrap_or_default()
    );
    Ok(())
}
