//! Chroma vector store integration.

mod client;
mod types;

pub use client::ChromaClient;
pub use types::{
    AddBatch, ChromaError, CollectionHandle, GetResult, QueryInput, QueryResult,
};
