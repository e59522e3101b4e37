//! Offline export pipeline: SQL dump in, embedded segments out.
//!
//! Stages mirror the data flow: [`sql`] parses `INSERT` lines into page records, [`html`]
//! strips markup, [`paragraphs`] extracts and merges paragraph blocks, [`chunker`] windows
//! them into segments, [`segments`] attaches metadata, and [`exporter`] drives batching,
//! embedding, collection writes, and job tracking. [`srt`] is the subtitle I/O contract
//! used by the auxiliary tooling around the corpus.

pub mod chunker;
pub mod exporter;
pub mod html;
pub mod paragraphs;
pub mod segments;
pub mod sql;
pub mod srt;

use thiserror::Error;

/// Errors raised by the export pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The dump file could not be read.
    #[error("Failed to read SQL dump: {0}")]
    Io(#[from] std::io::Error),
    /// An `INSERT` line could not be parsed into a page record.
    #[error("Failed to parse INSERT line: {0}")]
    Parse(String),
    /// Embedding generation failed for a batch.
    #[error(transparent)]
    Embedding(#[from] crate::embedding::EmbeddingError),
    /// Vector store write or lookup failed.
    #[error(transparent)]
    Chroma(#[from] crate::chroma::ChromaError),
    /// Job bookkeeping failed.
    #[error(transparent)]
    Db(#[from] crate::db::DbError),
    /// A blocking stage of the pipeline was cancelled or panicked.
    #[error("Export task failed: {0}")]
    Task(String),
}
