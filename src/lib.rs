#![deny(missing_docs)]

//! Core library for the Ketab semantic search service.

/// Redis-backed response cache and key schemes.
pub mod cache;
/// Chroma vector store integration.
pub mod chroma;
/// Environment-driven configuration management.
pub mod config;
/// Embedded SQLite persistence.
pub mod db;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// HTTP error kinds and status mapping.
pub mod error;
/// HTTP routing, middleware, and REST handlers.
pub mod http;
/// Export pipeline from SQL dumps into the vector store.
pub mod ingest;
/// Structured logging and tracing setup.
pub mod logging;
/// Search orchestration and DTOs.
pub mod search;
/// Startup prechecks and shared state construction.
pub mod startup;
/// Process-wide shared state.
pub mod state;
