//! Search orchestration: request DTOs, the single-model pipeline, and the multi-model
//! fan-out with round-robin merging.

pub mod merge;
pub mod multi;
pub mod orchestrator;
pub mod types;

pub use merge::round_robin_merge;
pub use multi::multi_search;
pub use orchestrator::single_search;
pub use types::{
    ModelSearchError, MultiSearchRequest, MultiSearchResponse, MultiSearchResult, PaginationInfo,
    SearchRequest, SearchResponse, SearchResult,
};
