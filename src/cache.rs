//! Redis-backed response cache with TTL.
//!
//! Values are JSON-encoded response DTOs keyed by the schemes below; reads tolerate decode
//! failures by treating the entry as a miss, and writes never fail the enclosing request.
//!
//! Key schemes:
//!
//! - single model: `search:<sha256(query)>:<provider>:<model>:<collection>:k{top_k}:p{page}:ps{page_size}:{ctx|seg}`
//! - multi model: `multi-search:<sha256(query)>:<sorted-ids-csv>:k{top_k}`
//!
//! The hashed query is normalized first: trimmed, internal whitespace collapsed, lowercased.

use redis::AsyncCommands;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised while talking to the cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Connection or command failure reported by the Redis client.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Thin wrapper over a multiplexed Redis connection.
#[derive(Clone)]
pub struct CacheClient {
    manager: redis::aio::ConnectionManager,
}

impl CacheClient {
    /// Open a managed connection to the given DSN.
    pub async fn connect(dsn: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(dsn)?;
        let manager = client.get_connection_manager().await?;
        tracing::debug!(dsn, "Connected to Redis");
        Ok(Self { manager })
    }

    /// Round-trip a PING to verify the connection.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    /// Fetch and decode a cached value. Decode failures count as misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = match conn.get(key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, error = %err, "Cache read failed");
                return None;
            }
        };
        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "Cached value failed to decode; treating as miss");
                None
            }
        }
    }

    /// Serialize and store a value with an expiry. Failures are logged and swallowed.
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(key, error = %err, "Failed to serialize cache value");
                return;
            }
        };
        let mut conn = self.manager.clone();
        if let Err(err) = conn.set_ex::<_, _, ()>(key, payload, ttl_seconds).await {
            tracing::warn!(key, error = %err, "Cache write failed");
        }
    }
}

/// Normalize a query for hashing: trim, collapse internal whitespace, lowercase.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn query_hash(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(query).as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache key for a single-model search response.
#[allow(clippy::too_many_arguments)]
pub fn search_cache_key(
    query: &str,
    provider: &str,
    model: &str,
    collection: &str,
    top_k: usize,
    page: usize,
    page_size: usize,
    include_full_context: bool,
) -> String {
    let context = if include_full_context { "ctx" } else { "seg" };
    format!(
        "search:{}:{provider}:{model}:{collection}:k{top_k}:p{page}:ps{page_size}:{context}",
        query_hash(query)
    )
}

/// Cache key for a multi-model search response; model ids are sorted so submission order
/// does not fragment the cache.
pub fn multi_search_cache_key(query: &str, model_ids: &[i64], top_k: usize) -> String {
    let mut sorted = model_ids.to_vec();
    sorted.sort_unstable();
    let ids = sorted
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("multi-search:{}:{ids}:k{top_k}", query_hash(query))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_whitespace_and_case() {
        assert_eq!(normalize_query("  سلام   دنیا  "), "سلام دنیا");
        assert_eq!(normalize_query("Hello\t WORLD"), "hello world");
    }

    #[test]
    fn equivalent_queries_share_a_key() {
        let a = search_cache_key("  چیست؟ ", "openai", "m", "c", 10, 1, 20, false);
        let b = search_cache_key("چیست؟", "openai", "m", "c", 10, 1, 20, false);
        assert_eq!(a, b);
        assert!(a.starts_with("search:"));
        assert!(a.ends_with(":k10:p1:ps20:seg"));
    }

    #[test]
    fn context_flag_changes_the_key() {
        let seg = search_cache_key("q", "openai", "m", "c", 10, 1, 20, false);
        let ctx = search_cache_key("q", "openai", "m", "c", 10, 1, 20, true);
        assert_ne!(seg, ctx);
    }

    #[test]
    fn multi_key_is_order_insensitive() {
        let a = multi_search_cache_key("q", &[3, 1, 2], 10);
        let b = multi_search_cache_key("q", &[1, 2, 3], 10);
        assert_eq!(a, b);
        assert!(a.contains(":1,2,3:"));
    }
}
