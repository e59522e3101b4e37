//! Single-model search pipeline.
//!
//! Order of operations: resolve collection and embedder, consult the cache, run the
//! nearest-neighbour query (native text path first when the process embedder owns no
//! vectors for the request), slice the requested page, expand context, then persist and
//! cache best-effort.

use crate::cache::search_cache_key;
use crate::chroma::{ChromaError, CollectionHandle, QueryInput, QueryResult};
use crate::config::EmbeddingProvider;
use crate::db::EmbeddingModelRow;
use crate::embedding::{Embedder, create_embedder_for_model};
use crate::error::ApiError;
use crate::search::types::{PaginationInfo, SearchRequest, SearchResponse, SearchResult};
use crate::state::AppState;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;

/// Execute `POST /search`.
pub async fn single_search(
    state: &AppState,
    request: SearchRequest,
) -> Result<SearchResponse, ApiError> {
    request.validate().map_err(ApiError::Validation)?;
    let started = Instant::now();

    let target = resolve_target(state, request.model_id).await?;
    let use_cache = request.use_cache.unwrap_or(state.settings.default_use_cache);
    let cache_key = search_cache_key(
        &request.query,
        &target.provider_name,
        &target.model_name,
        &target.collection.name,
        request.top_k,
        request.page,
        request.page_size,
        request.include_full_context,
    );

    if use_cache
        && let Some(cache) = &state.cache
        && let Some(mut cached) = cache.get_json::<SearchResponse>(&cache_key).await
    {
        tracing::debug!(query = %request.query, "Search served from cache");
        cached.cache_source = "cache".into();
        return Ok(cached);
    }

    warn_on_collection_mismatch(&target);

    let n_results = if state.settings.enable_pagination {
        (request.page * request.page_size)
            .clamp(request.page_size, state.settings.max_estimated_results)
    } else {
        request.top_k
    };

    let force_embeddings = request.model_id.is_some();
    let query_result = execute_query(
        state,
        &target,
        request.query.clone(),
        n_results,
        force_embeddings,
    )
    .await?;

    let fetched_total = query_result.ids.len();
    let mut results = if state.settings.enable_pagination {
        slice_page(query_result, request.page, request.page_size)
    } else {
        into_results(query_result)
    };
    // `top_k` bounds the returned list even when the page window is wider.
    results.truncate(request.top_k);

    if request.include_full_context {
        for item in &mut results {
            expand_context(state, &target.collection, item).await?;
        }
    }

    let total_documents = if state.settings.enable_total_documents {
        match state.chroma.count(&target.collection).await {
            Ok(count) => Some(count),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to count collection documents");
                None
            }
        }
    } else {
        None
    };

    let pagination = state.settings.enable_pagination.then(|| PaginationInfo {
        page: request.page,
        page_size: request.page_size,
        has_next_page: fetched_total > request.page * request.page_size,
        has_previous_page: request.page > 1,
        estimated_total_results: state.settings.enable_estimated_results.then(|| {
            if fetched_total >= state.settings.max_estimated_results {
                format!("{}+", state.settings.max_estimated_results)
            } else {
                fetched_total.to_string()
            }
        }),
    });

    let took_ms = started.elapsed().as_secs_f64() * 1000.0;
    let response = SearchResponse {
        query: request.query.clone(),
        top_k: request.top_k,
        returned: results.len(),
        provider: target.provider_name.clone(),
        model: target.model_name.clone(),
        collection: target.collection.name.clone(),
        results,
        took_ms,
        timestamp: chrono::Utc::now().to_rfc3339(),
        total_documents,
        pagination,
        cache_source: "realtime".into(),
    };

    tracing::info!(
        query = %request.query,
        top_k = request.top_k,
        returned = response.returned,
        took_ms,
        "Search completed"
    );

    if request.save {
        persist_search(state, &response).await;
    }

    if use_cache
        && !response.results.is_empty()
        && let Some(cache) = &state.cache
    {
        cache
            .put_json(&cache_key, &response, state.settings.search_cache_ttl)
            .await;
    }

    Ok(response)
}

/// Resolved routing for one search: collection, embedder, and display identity.
pub(crate) struct SearchTarget {
    pub(crate) collection: CollectionHandle,
    pub(crate) embedder: Arc<Embedder>,
    pub(crate) provider_name: String,
    pub(crate) model_name: String,
}

async fn resolve_target(state: &AppState, model_id: Option<i64>) -> Result<SearchTarget, ApiError> {
    let Some(model_id) = model_id else {
        return Ok(SearchTarget {
            collection: state.collection.clone(),
            embedder: Arc::clone(&state.embedder),
            provider_name: state.settings.embedding_provider.as_str().to_string(),
            model_name: state.settings.embedding_model.clone(),
        });
    };

    let row = state
        .db
        .call(move |conn| crate::db::get_embedding_model(conn, model_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("مدل با شناسه {model_id} یافت نشد")))?;
    if !row.is_active {
        return Err(ApiError::Validation(format!(
            "مدل «{}» غیرفعال است و قابل استفاده نیست",
            row.embedding_model
        )));
    }

    let collection = get_collection_checked(state, &row.collection).await?;
    let embedder = build_model_embedder(state, &row).await?;
    Ok(SearchTarget {
        collection,
        embedder,
        provider_name: row.embedding_provider,
        model_name: row.embedding_model,
    })
}

pub(crate) async fn get_collection_checked(
    state: &AppState,
    name: &str,
) -> Result<CollectionHandle, ApiError> {
    match state.chroma.get_collection(name).await {
        Ok(collection) => Ok(collection),
        Err(err @ ChromaError::CollectionNotFound { .. }) => {
            Err(ApiError::NotFound(err.to_string()))
        }
        Err(err) => Err(err.into()),
    }
}

pub(crate) async fn build_model_embedder(
    state: &AppState,
    row: &EmbeddingModelRow,
) -> Result<Arc<Embedder>, ApiError> {
    let provider: EmbeddingProvider = row.embedding_provider.parse().map_err(|()| {
        ApiError::Validation(format!(
            "unsupported embedding provider '{}'",
            row.embedding_provider
        ))
    })?;
    let settings = state.settings.clone();
    let model = row.embedding_model.clone();
    let embedder =
        tokio::task::spawn_blocking(move || create_embedder_for_model(provider, &model, &settings))
            .await
            .map_err(|err| ApiError::internal(anyhow::anyhow!("embedder task failed: {err}")))??;
    Ok(Arc::new(embedder))
}

pub(crate) fn warn_on_collection_mismatch(target: &SearchTarget) {
    let exported_provider = target.collection.metadata_str("embedding_provider");
    let exported_model = target.collection.metadata_str("embedding_model");
    let mismatch = exported_provider.is_some_and(|p| p != target.provider_name)
        || exported_model.is_some_and(|m| m != target.model_name);
    if mismatch {
        tracing::warn!(
            collection = %target.collection.name,
            exported_provider = ?exported_provider,
            exported_model = ?exported_model,
            active_provider = %target.provider_name,
            active_model = %target.model_name,
            "Collection was exported with a different embedding identity"
        );
    }
}

/// Embed a single query on the blocking pool.
pub(crate) async fn embed_query(
    embedder: Arc<Embedder>,
    query: String,
) -> Result<Vec<f32>, ApiError> {
    let vectors = tokio::task::spawn_blocking(move || embedder.embed(&[query]))
        .await
        .map_err(|err| ApiError::internal(anyhow::anyhow!("embedding task failed: {err}")))??;
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Upstream("Failed to generate embeddings for query".into()))
}

async fn execute_query(
    state: &AppState,
    target: &SearchTarget,
    query: String,
    n_results: usize,
    force_embeddings: bool,
) -> Result<QueryResult, ApiError> {
    if force_embeddings {
        let vector = embed_query(Arc::clone(&target.embedder), query).await?;
        return Ok(state
            .chroma
            .query(&target.collection, QueryInput::Embeddings(vec![vector]), n_results)
            .await?);
    }

    match state
        .chroma
        .query(
            &target.collection,
            QueryInput::Texts(vec![query.clone()]),
            n_results,
        )
        .await
    {
        Ok(result) => {
            tracing::debug!("Query served by the store's text path");
            Ok(result)
        }
        Err(err) if err.is_invalid_request() && target.embedder.produces_vectors() => {
            tracing::debug!(error = %err, "Text query rejected; retrying with explicit embeddings");
            let vector = embed_query(Arc::clone(&target.embedder), query).await?;
            Ok(state
                .chroma
                .query(&target.collection, QueryInput::Embeddings(vec![vector]), n_results)
                .await?)
        }
        Err(err) => Err(err.into()),
    }
}

fn into_results(result: QueryResult) -> Vec<SearchResult> {
    let QueryResult {
        ids,
        distances,
        documents,
        metadatas,
    } = result;
    ids.into_iter()
        .enumerate()
        .map(|(index, id)| {
            let distance = distances.get(index).copied();
            SearchResult {
                id,
                distance,
                score: distance.map(|d| 1.0 - d),
                document: documents.get(index).cloned().flatten(),
                metadata: metadatas.get(index).cloned().unwrap_or_default(),
            }
        })
        .collect()
}

fn slice_page(result: QueryResult, page: usize, page_size: usize) -> Vec<SearchResult> {
    let start = (page - 1) * page_size;
    let end = page * page_size;
    into_results(result)
        .into_iter()
        .skip(start)
        .take(end - start)
        .collect()
}

/// Replace a segment's text with its full paragraph. Page-level documents are skipped;
/// stored `paragraph_full_text` wins over a store round trip.
async fn expand_context(
    state: &AppState,
    collection: &CollectionHandle,
    item: &mut SearchResult,
) -> Result<(), ApiError> {
    if item.metadata.get("page_level") == Some(&json!(true)) {
        return Ok(());
    }
    if let Some(full_text) = item
        .metadata
        .get("paragraph_full_text")
        .and_then(Value::as_str)
    {
        item.document = Some(full_text.to_string());
        return Ok(());
    }

    let (Some(book_id), Some(page_id), Some(paragraph_index)) = (
        item.metadata.get("book_id").and_then(Value::as_i64),
        item.metadata.get("page_id").and_then(Value::as_i64),
        item.metadata.get("paragraph_index").and_then(Value::as_i64),
    ) else {
        return Ok(());
    };

    let filter = json!({
        "$and": [
            { "book_id": { "$eq": book_id } },
            { "page_id": { "$eq": page_id } },
            { "paragraph_index": { "$eq": paragraph_index } },
        ]
    });
    let siblings = state.chroma.get_where(collection, filter).await?;

    let mut ordered: Vec<(i64, String)> = siblings
        .documents
        .iter()
        .zip(siblings.metadatas.iter())
        .filter_map(|(document, metadata)| {
            let text = document.clone()?;
            let index = metadata.get("segment_index").and_then(Value::as_i64)?;
            Some((index, text))
        })
        .collect();
    if ordered.is_empty() {
        return Ok(());
    }
    ordered.sort_by_key(|(index, _)| *index);
    item.document = Some(
        ordered
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join(" "),
    );
    Ok(())
}

/// Best-effort persistence: history row plus the approval counter. Never fails the request.
async fn persist_search(state: &AppState, response: &SearchResponse) {
    let saved = crate::db::SavedSearch {
        query: response.query.clone(),
        result_count: response.returned as i64,
        took_ms: response.took_ms,
        collection: response.collection.clone(),
        provider: response.provider.clone(),
        model: response.model.clone(),
        results_json: serde_json::to_string(&response.results).ok(),
    };
    let query = response.query.clone();
    let outcome = state
        .db
        .call(move |conn| {
            crate::db::save_search(conn, &saved)?;
            crate::db::update_query_search_count(conn, &query)
        })
        .await;
    if let Err(err) = outcome {
        tracing::warn!(error = %err, "Failed to save search to database");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn query_result(count: usize) -> QueryResult {
        QueryResult {
            ids: (0..count).map(|i| format!("doc-{i}")).collect(),
            distances: (0..count).map(|i| i as f64 / 100.0).collect(),
            documents: (0..count).map(|i| Some(format!("متن {i}"))).collect(),
            metadatas: (0..count).map(|_| Map::new()).collect(),
        }
    }

    #[test]
    fn first_page_takes_the_head_of_the_window() {
        let results = slice_page(query_result(45), 1, 20);
        assert_eq!(results.len(), 20);
        assert_eq!(results[0].id, "doc-0");
        assert_eq!(results[19].id, "doc-19");
    }

    #[test]
    fn later_pages_shift_the_window() {
        let results = slice_page(query_result(45), 3, 20);
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].id, "doc-40");
    }

    #[test]
    fn page_beyond_fetched_window_is_empty() {
        let results = slice_page(query_result(10), 4, 20);
        assert!(results.is_empty());
    }

    #[test]
    fn scores_complement_distances() {
        let results = into_results(query_result(2));
        assert_eq!(results[1].distance, Some(0.01));
        assert!((results[1].score.unwrap() - 0.99).abs() < f64::EPSILON);
    }
}
