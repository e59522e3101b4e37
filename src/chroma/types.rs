//! Shared types used by the Chroma client and helpers.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors returned while interacting with Chroma.
#[derive(Debug, Error)]
pub enum ChromaError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Chroma URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Chroma responded with an unexpected status code.
    #[error("Unexpected Chroma response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Chroma.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// The requested collection does not exist on the server.
    #[error("Chroma collection '{name}' not found. Available collections: {available}")]
    CollectionNotFound {
        /// Collection name that was requested.
        name: String,
        /// Comma-separated listing of collections present on the server.
        available: String,
    },
    /// `CHROMA_PERSIST_DIR` was configured; only the HTTP wire contract is supported.
    #[error(
        "Embedded persistent mode is not supported; unset CHROMA_PERSIST_DIR and run a Chroma server"
    )]
    PersistentModeUnsupported,
}

impl ChromaError {
    /// Whether the failure indicates a request the server considered invalid.
    ///
    /// Used by the orchestrator to decide that a text-query attempt should fall back to
    /// explicit embeddings rather than surface as an upstream failure.
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedStatus { status, .. }
                if matches!(
                    *status,
                    StatusCode::BAD_REQUEST
                        | StatusCode::NOT_FOUND
                        | StatusCode::UNPROCESSABLE_ENTITY
                )
        )
    }
}

/// Resolved collection reference carrying the server-assigned id and creation metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionHandle {
    /// Identifier assigned by the Chroma server.
    pub id: String,
    /// Human-readable collection name.
    pub name: String,
    /// Metadata attached at creation time (chunker parameters, embedding identity).
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl CollectionHandle {
    /// Read a string metadata value by key.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|meta| meta.get(key))
            .and_then(Value::as_str)
    }
}

/// Batch of documents prepared for an `add` call.
#[derive(Debug, Clone, Default)]
pub struct AddBatch {
    /// Document identifiers; must be unique within the collection.
    pub ids: Vec<String>,
    /// Raw segment texts.
    pub documents: Vec<String>,
    /// Scalar metadata maps, one per document.
    pub metadatas: Vec<Map<String, Value>>,
    /// Precomputed vectors; omitted when the collection owns an embedding function.
    pub embeddings: Option<Vec<Vec<f32>>>,
}

/// Query payload variants accepted by the store.
#[derive(Debug, Clone)]
pub enum QueryInput {
    /// Let the store embed the raw query text (requires a collection-side embedding function).
    Texts(Vec<String>),
    /// Query with caller-supplied vectors.
    Embeddings(Vec<Vec<f32>>),
}

/// Flattened result set for a single-query nearest-neighbour request.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Document identifiers ordered by ascending distance.
    pub ids: Vec<String>,
    /// Cosine distances reported by the store.
    pub distances: Vec<f64>,
    /// Stored document texts.
    pub documents: Vec<Option<String>>,
    /// Stored metadata maps.
    pub metadatas: Vec<Map<String, Value>>,
}

/// Flattened result set for a metadata-filtered `get` request.
#[derive(Debug, Clone, Default)]
pub struct GetResult {
    /// Document identifiers in server order.
    pub ids: Vec<String>,
    /// Stored document texts.
    pub documents: Vec<Option<String>>,
    /// Stored metadata maps.
    pub metadatas: Vec<Map<String, Value>>,
}

#[derive(Deserialize)]
pub(crate) struct RawQueryResponse {
    pub(crate) ids: Vec<Vec<Value>>,
    #[serde(default)]
    pub(crate) distances: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub(crate) documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    pub(crate) metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
}

#[derive(Deserialize)]
pub(crate) struct RawGetResponse {
    pub(crate) ids: Vec<Value>,
    #[serde(default)]
    pub(crate) documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub(crate) metadatas: Option<Vec<Option<Map<String, Value>>>>,
}

pub(crate) fn stringify_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
