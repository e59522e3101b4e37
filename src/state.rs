//! Process-wide shared state.
//!
//! Built once at startup after the prechecks pass and shared through an `Arc` by every
//! handler. Holds the long-lived clients (vector store, cache, default embedder) plus the
//! resolved default collection and the database handle.

use crate::cache::CacheClient;
use crate::chroma::{ChromaClient, CollectionHandle};
use crate::config::Settings;
use crate::db::Database;
use crate::embedding::Embedder;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    /// Immutable settings snapshot taken at startup.
    pub settings: Settings,
    /// Vector store client.
    pub chroma: Arc<ChromaClient>,
    /// Default collection resolved during startup validation.
    pub collection: CollectionHandle,
    /// Default embedder matching the configured provider/model.
    pub embedder: Arc<Embedder>,
    /// Optional response cache; absent when Redis is unreachable.
    pub cache: Option<CacheClient>,
    /// Embedded SQL store.
    pub db: Database,
}

/// Convenience alias used by the router and handlers.
pub type SharedState = Arc<AppState>;
