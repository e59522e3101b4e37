//! Request and response DTOs for the search endpoints.
//!
//! Responses are also the cache values, so everything here is both `Serialize` and
//! `Deserialize` and stays stable under a JSON round trip.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_top_k() -> usize {
    10
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

/// Body of `POST /search`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    /// Free-text query.
    pub query: String,
    /// Maximum number of results to return.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Page number, 1-indexed.
    #[serde(default = "default_page")]
    pub page: usize,
    /// Results per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Persist the search to history.
    #[serde(default)]
    pub save: bool,
    /// Consult and fill the response cache; defaults to the configured value.
    #[serde(default)]
    pub use_cache: Option<bool>,
    /// Replace segment texts with their full paragraph context.
    #[serde(default)]
    pub include_full_context: bool,
    /// Search a specific exported model instead of the process default.
    #[serde(default)]
    pub model_id: Option<i64>,
}

impl SearchRequest {
    /// Bounds checks shared by the handler and the orchestrator.
    pub fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("query must not be empty".into());
        }
        if !(1..=50).contains(&self.top_k) {
            return Err("top_k must be between 1 and 50".into());
        }
        if self.page < 1 {
            return Err("page must be at least 1".into());
        }
        if !(1..=100).contains(&self.page_size) {
            return Err("page_size must be between 1 and 100".into());
        }
        Ok(())
    }
}

/// Body of `POST /search/multi`.
#[derive(Debug, Clone, Deserialize)]
pub struct MultiSearchRequest {
    /// Free-text query.
    pub query: String,
    /// Models to fan out to, in submission order.
    pub model_ids: Vec<i64>,
    /// Maximum number of results per model fetch.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Persist one history row per successful model.
    #[serde(default)]
    pub save: bool,
}

impl MultiSearchRequest {
    /// Bounds checks plus order-preserving deduplication of the submitted ids.
    pub fn validate(&self) -> Result<Vec<i64>, String> {
        if self.query.trim().is_empty() {
            return Err("query must not be empty".into());
        }
        if !(1..=50).contains(&self.top_k) {
            return Err("top_k must be between 1 and 50".into());
        }
        let mut unique = Vec::new();
        for id in &self.model_ids {
            if !unique.contains(id) {
                unique.push(*id);
            }
        }
        if unique.is_empty() || unique.len() > 3 {
            return Err("model_ids must contain between 1 and 3 unique ids".into());
        }
        Ok(unique)
    }
}

/// One hit in a single-model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Stored document identifier.
    pub id: String,
    /// Cosine distance reported by the store.
    pub distance: Option<f64>,
    /// Convenience similarity (`1 - distance`).
    pub score: Option<f64>,
    /// Document text, possibly replaced by paragraph context.
    pub document: Option<String>,
    /// Stored metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Pagination block attached to paginated responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationInfo {
    /// Current page number.
    pub page: usize,
    /// Results per page.
    pub page_size: usize,
    /// Whether a further page is available within the fetched window.
    pub has_next_page: bool,
    /// Whether a previous page exists.
    pub has_previous_page: bool,
    /// Exact count as a string, or `"1000+"` when the fetch hit the cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_total_results: Option<String>,
}

/// Body of a `POST /search` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Query as submitted.
    pub query: String,
    /// Requested result budget.
    pub top_k: usize,
    /// Number of results in `results`.
    pub returned: usize,
    /// Provider that embedded the query.
    pub provider: String,
    /// Model that embedded the query.
    pub model: String,
    /// Collection searched.
    pub collection: String,
    /// Result list.
    pub results: Vec<SearchResult>,
    /// Wall-clock duration in milliseconds.
    pub took_ms: f64,
    /// UTC timestamp of the response.
    pub timestamp: String,
    /// Collection document count when enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_documents: Option<u64>,
    /// Pagination block when pagination is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationInfo>,
    /// `"cache"` or `"realtime"`.
    pub cache_source: String,
}

/// One hit in a multi-model response, tagged with its originating model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiSearchResult {
    /// Stored document identifier.
    pub id: String,
    /// Cosine distance reported by the store.
    pub distance: Option<f64>,
    /// Convenience similarity (`1 - distance`).
    pub score: Option<f64>,
    /// Document text.
    pub document: Option<String>,
    /// Stored metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Registry id of the model that produced the hit.
    pub model_id: i64,
    /// Provider of that model.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Display color assigned to the model.
    pub color: String,
}

/// Per-model failure attached to partial multi-model responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSearchError {
    /// Registry id of the failing model.
    pub model_id: i64,
    /// Collection the model routes to.
    pub collection: String,
    /// Model identifier.
    pub model: String,
    /// Failure message.
    pub error: String,
}

/// Body of a `POST /search/multi` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiSearchResponse {
    /// Query as submitted.
    pub query: String,
    /// Requested per-model result budget.
    pub top_k: usize,
    /// Number of merged results.
    pub returned: usize,
    /// Merged, deduplicated result list.
    pub results: Vec<MultiSearchResult>,
    /// Wall-clock duration in milliseconds.
    pub took_ms: f64,
    /// UTC timestamp of the response.
    pub timestamp: String,
    /// Per-model failures, present when at least one model failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ModelSearchError>>,
    /// `"cache"` or `"realtime"`.
    pub cache_source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(top_k: usize, page: usize, page_size: usize) -> SearchRequest {
        SearchRequest {
            query: "پرسش".into(),
            top_k,
            page,
            page_size,
            save: false,
            use_cache: None,
            include_full_context: false,
            model_id: None,
        }
    }

    #[test]
    fn top_k_bounds_are_inclusive() {
        assert!(request(1, 1, 20).validate().is_ok());
        assert!(request(50, 1, 20).validate().is_ok());
        assert!(request(0, 1, 20).validate().is_err());
        assert!(request(51, 1, 20).validate().is_err());
    }

    #[test]
    fn page_size_bounds_are_enforced() {
        assert!(request(10, 1, 100).validate().is_ok());
        assert!(request(10, 1, 101).validate().is_err());
        assert!(request(10, 0, 20).validate().is_err());
    }

    #[test]
    fn empty_query_is_rejected() {
        let mut r = request(10, 1, 20);
        r.query = "   ".into();
        assert!(r.validate().is_err());
    }

    #[test]
    fn multi_request_dedupes_preserving_order() {
        let request = MultiSearchRequest {
            query: "پرسش".into(),
            model_ids: vec![3, 1, 3, 2, 1],
            top_k: 10,
            save: false,
        };
        assert_eq!(request.validate().expect("ids"), vec![3, 1, 2]);
    }

    #[test]
    fn multi_request_rejects_too_many_models() {
        let request = MultiSearchRequest {
            query: "پرسش".into(),
            model_ids: vec![1, 2, 3, 4],
            top_k: 10,
            save: false,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn search_response_round_trips_through_json() {
        let response = SearchResponse {
            query: "آموزش عقاید چیست؟".into(),
            top_k: 3,
            returned: 1,
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            collection: "book_pages".into(),
            results: vec![SearchResult {
                id: "3-7-0-0-abcdef12".into(),
                distance: Some(0.2),
                score: Some(0.8),
                document: Some("متن".into()),
                metadata: Map::new(),
            }],
            took_ms: 12.0,
            timestamp: "2024-05-01T00:00:00Z".into(),
            total_documents: Some(500),
            pagination: None,
            cache_source: "realtime".into(),
        };
        let encoded = serde_json::to_string(&response).expect("encode");
        let decoded: SearchResponse = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded.query, response.query);
        assert_eq!(decoded.results[0].id, response.results[0].id);
        assert_eq!(decoded.total_documents, Some(500));
    }
}
