//! Export driver: dump file → segments → embeddings → collection, with job tracking.

use crate::chroma::{AddBatch, ChromaClient, ChromaError, CollectionHandle};
use crate::config::{EmbeddingProvider, Settings};
use crate::db::{Database, NewExportJob};
use crate::embedding::Embedder;
use crate::ingest::IngestError;
use crate::ingest::html::html_to_text;
use crate::ingest::segments::{Segment, SegmentConfig, build_segments};
use crate::ingest::sql::BookPageReader;
use serde_json::{Map, json};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Parameters of one export run.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Dump file to ingest.
    pub sql_path: PathBuf,
    /// Target collection name.
    pub collection: String,
    /// Segments per upsert batch.
    pub batch_size: usize,
    /// Segment sizing and enrichment.
    pub segmenting: SegmentConfig,
    /// Drop the collection before writing.
    pub reset: bool,
    /// Provider used to embed segments.
    pub provider: EmbeddingProvider,
    /// Model used to embed segments.
    pub model: String,
    /// Masked command line stored on the job row.
    pub command_line_args: Option<String>,
}

/// Final counters of a successful run.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    /// Job row recording the run.
    pub job_id: i64,
    /// Collection actually written to (may be timestamp-suffixed).
    pub collection: String,
    /// Records parsed from the dump.
    pub total_records: i64,
    /// Distinct books seen.
    pub total_books: i64,
    /// Segments published.
    pub total_segments: i64,
    /// Documents counted in the collection after the run.
    pub total_documents_in_collection: Option<i64>,
}

/// Run a full export. The job row is created `running` up front and transitions to
/// `completed` or `failed` exactly once; any batch failure aborts the whole run.
pub async fn run_export(
    settings: &Settings,
    config: ExportConfig,
    db: &Database,
    chroma: &ChromaClient,
    embedder: Arc<Embedder>,
) -> Result<ExportOutcome, IngestError> {
    let job_row = NewExportJob {
        sql_path: config.sql_path.display().to_string(),
        collection: config.collection.clone(),
        batch_size: config.batch_size as i64,
        max_length: config.segmenting.max_length as i64,
        context_length: config.segmenting.context_length as i64,
        host: settings.chroma_host.clone(),
        port: i64::from(settings.chroma_port),
        ssl: settings.chroma_ssl,
        embedding_provider: config.provider.as_str().to_string(),
        embedding_model: config.model.clone(),
        reset: config.reset,
        command_line_args: config.command_line_args.clone(),
    };
    let job_id = db
        .call(move |conn| crate::db::create_export_job(conn, &job_row))
        .await?;

    match export_pipeline(&config, chroma, embedder, job_id).await {
        Ok(outcome) => {
            let (records, books, segments, in_collection) = (
                outcome.total_records,
                outcome.total_books,
                outcome.total_segments,
                outcome.total_documents_in_collection,
            );
            db.call(move |conn| {
                crate::db::complete_export_job(
                    conn,
                    job_id,
                    records,
                    books,
                    segments,
                    in_collection,
                )
            })
            .await?;
            Ok(outcome)
        }
        Err(err) => {
            let message = err.to_string();
            if let Err(db_err) = db
                .call(move |conn| crate::db::fail_export_job(conn, job_id, &message))
                .await
            {
                tracing::warn!(job_id, error = %db_err, "Failed to record job failure");
            }
            Err(err)
        }
    }
}

async fn export_pipeline(
    config: &ExportConfig,
    chroma: &ChromaClient,
    embedder: Arc<Embedder>,
    job_id: i64,
) -> Result<ExportOutcome, IngestError> {
    let collection = resolve_target_collection(config, chroma).await?;

    let sql_path = config.sql_path.clone();
    let segmenting = config.segmenting.clone();
    let (segments, total_records, total_books) = tokio::task::spawn_blocking(
        move || -> Result<(Vec<Segment>, i64, i64), IngestError> {
            let mut segments = Vec::new();
            let mut total_records = 0i64;
            let mut books = HashSet::new();
            for record in BookPageReader::open(&sql_path)? {
                let record = record?;
                total_records += 1;
                books.insert(record.book_id);
                let text = html_to_text(&record.page_text_html);
                segments.extend(build_segments(&record, &text, &segmenting));
            }
            Ok((segments, total_records, books.len() as i64))
        },
    )
    .await
    .map_err(|err| IngestError::Task(err.to_string()))??;

    tracing::info!(
        job_id,
        records = total_records,
        books = total_books,
        segments = segments.len(),
        collection = %collection.name,
        "Dump parsed; publishing segments"
    );

    let total_segments = segments.len() as i64;
    let mut published = 0usize;
    for batch in segments.chunks(config.batch_size.max(1)) {
        let documents: Vec<String> = batch.iter().map(|segment| segment.text.clone()).collect();
        let embeddings = if embedder.produces_vectors() {
            let embedder = Arc::clone(&embedder);
            let texts = documents.clone();
            Some(
                tokio::task::spawn_blocking(move || embedder.embed(&texts))
                    .await
                    .map_err(|err| IngestError::Task(err.to_string()))??,
            )
        } else {
            None
        };

        chroma
            .add(
                &collection,
                AddBatch {
                    ids: batch.iter().map(|s| s.document_id.clone()).collect(),
                    documents,
                    metadatas: batch.iter().map(|s| s.metadata.clone()).collect(),
                    embeddings,
                },
            )
            .await?;

        published += batch.len();
        tracing::info!(
            job_id,
            published,
            total = total_segments,
            "Batch published"
        );
    }

    let total_documents_in_collection = match chroma.count(&collection).await {
        Ok(count) => Some(count as i64),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to count documents after export");
            None
        }
    };

    Ok(ExportOutcome {
        job_id,
        collection: collection.name,
        total_records,
        total_books,
        total_segments,
        total_documents_in_collection,
    })
}

/// Resolve the collection the run writes to.
///
/// `reset` drops the existing collection first (missing is fine). Without `reset`, an
/// existing name diverts the run to a timestamp-suffixed variant so a live collection is
/// never mixed with a new export.
async fn resolve_target_collection(
    config: &ExportConfig,
    chroma: &ChromaClient,
) -> Result<CollectionHandle, IngestError> {
    if config.reset {
        chroma.delete_collection(&config.collection).await?;
        return Ok(chroma
            .create_collection(&config.collection, collection_metadata(config))
            .await?);
    }

    match chroma.get_collection(&config.collection).await {
        Ok(_) => {
            let suffixed = format!(
                "{}_{}",
                config.collection,
                chrono::Utc::now().format("%Y%m%d_%H%M%S")
            );
            tracing::warn!(
                existing = %config.collection,
                target = %suffixed,
                "Collection exists; writing to timestamp-suffixed variant"
            );
            Ok(chroma
                .create_collection(&suffixed, collection_metadata(config))
                .await?)
        }
        Err(ChromaError::CollectionNotFound { .. }) => Ok(chroma
            .create_collection(&config.collection, collection_metadata(config))
            .await?),
        Err(err) => Err(err.into()),
    }
}

fn collection_metadata(config: &ExportConfig) -> Map<String, serde_json::Value> {
    let mut metadata = Map::new();
    metadata.insert("source".into(), json!("book_pages_sql_export"));
    metadata.insert("max_length".into(), json!(config.segmenting.max_length));
    metadata.insert(
        "context_length".into(),
        json!(config.segmenting.context_length),
    );
    metadata.insert(
        "min_paragraph_lines".into(),
        json!(config.segmenting.min_paragraph_lines),
    );
    metadata.insert("title_weight".into(), json!(config.segmenting.title_weight));
    metadata.insert(
        "embedding_provider".into(),
        json!(config.provider.as_str()),
    );
    metadata.insert("embedding_model".into(), json!(config.model));
    metadata
}

/// Mask secret-bearing CLI values before they are stored on the job row.
pub fn mask_secret_args(args: &[String]) -> String {
    const SECRET_FLAGS: [&str; 3] = ["--openai-api-key", "--gemini-api-key", "--api-key"];
    let mut masked = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            masked.push("***".to_string());
            mask_next = false;
            continue;
        }
        if let Some((flag, _value)) = arg.split_once('=')
            && SECRET_FLAGS.contains(&flag)
        {
            masked.push(format!("{flag}=***"));
            continue;
        }
        if SECRET_FLAGS.contains(&arg.as_str()) {
            mask_next = true;
        }
        masked.push(arg.clone());
    }
    json!(masked).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_flag_values_are_masked() {
        let args: Vec<String> = [
            "export-pages",
            "--collection",
            "book_pages",
            "--openai-api-key",
            "sk-verysecret",
            "--api-key=token123",
        ]
        .map(str::to_string)
        .to_vec();

        let masked = mask_secret_args(&args);
        assert!(!masked.contains("sk-verysecret"));
        assert!(!masked.contains("token123"));
        assert!(masked.contains("***"));
        assert!(masked.contains("book_pages"));
    }

    #[test]
    fn collection_metadata_records_chunker_and_model_identity() {
        let config = ExportConfig {
            sql_path: "books.sql".into(),
            collection: "book_pages".into(),
            batch_size: 48,
            segmenting: SegmentConfig::default(),
            reset: false,
            provider: EmbeddingProvider::OpenAI,
            model: "text-embedding-3-small".into(),
            command_line_args: None,
        };
        let metadata = collection_metadata(&config);
        assert_eq!(metadata["source"], json!("book_pages_sql_export"));
        assert_eq!(metadata["max_length"], json!(200));
        assert_eq!(metadata["context_length"], json!(100));
        assert_eq!(metadata["embedding_provider"], json!("openai"));
        assert_eq!(metadata["embedding_model"], json!("text-embedding-3-small"));
    }
}
