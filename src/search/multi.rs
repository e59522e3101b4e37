//! Multi-model search: per-model fan-out with partial-failure tolerance and a
//! deterministic round-robin merge.

use crate::cache::multi_search_cache_key;
use crate::chroma::QueryInput;
use crate::db::EmbeddingModelRow;
use crate::error::ApiError;
use crate::search::merge::round_robin_merge;
use crate::search::orchestrator::{
    SearchTarget, build_model_embedder, embed_query, get_collection_checked,
    warn_on_collection_mismatch,
};
use crate::search::types::{
    ModelSearchError, MultiSearchRequest, MultiSearchResponse, MultiSearchResult,
};
use crate::state::AppState;
use std::sync::Arc;
use std::time::Instant;

/// Merged responses stay cached for a day; model sets change rarely.
const MULTI_SEARCH_CACHE_TTL: u64 = 86_400;

/// The merged list never exceeds this many results regardless of model count.
const OVERALL_RESULT_CAP: usize = 20;

/// Execute `POST /search/multi`.
pub async fn multi_search(
    state: &AppState,
    request: MultiSearchRequest,
) -> Result<MultiSearchResponse, ApiError> {
    let model_ids = request.validate().map_err(ApiError::Validation)?;
    let started = Instant::now();

    let rows = load_models(state, &model_ids).await?;

    let cache_key = multi_search_cache_key(&request.query, &model_ids, request.top_k);
    if let Some(cache) = &state.cache
        && let Some(mut cached) = cache.get_json::<MultiSearchResponse>(&cache_key).await
    {
        tracing::debug!(query = %request.query, "Multi-model search served from cache");
        cached.cache_source = "cache".into();
        return Ok(cached);
    }

    let model_count = model_ids.len();
    let per_model_limit = if model_count > 1 {
        OVERALL_RESULT_CAP.div_ceil(model_count)
    } else {
        request.top_k
    };
    let fetch_n = per_model_limit
        .max(request.top_k)
        .min(state.settings.max_estimated_results);

    let mut per_model: Vec<(i64, Vec<MultiSearchResult>)> = Vec::new();
    let mut errors: Vec<ModelSearchError> = Vec::new();
    for row in &rows {
        match fetch_for_model(state, row, &request.query, fetch_n).await {
            Ok(results) => per_model.push((row.id, results)),
            Err(err) => {
                tracing::warn!(
                    model_id = row.id,
                    collection = %row.collection,
                    error = %err,
                    "Model search failed; continuing with the remaining models"
                );
                errors.push(ModelSearchError {
                    model_id: row.id,
                    collection: row.collection.clone(),
                    model: row.embedding_model.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    if per_model.is_empty() {
        let first = errors
            .first()
            .map(|e| e.error.clone())
            .unwrap_or_else(|| "all model searches failed".into());
        return Err(ApiError::Upstream(first));
    }

    let overall_limit = (per_model_limit * model_count).min(OVERALL_RESULT_CAP);
    let merged = round_robin_merge(&per_model, per_model_limit, overall_limit);

    let took_ms = started.elapsed().as_secs_f64() * 1000.0;
    let response = MultiSearchResponse {
        query: request.query.clone(),
        top_k: request.top_k,
        returned: merged.len(),
        results: merged,
        took_ms,
        timestamp: chrono::Utc::now().to_rfc3339(),
        errors: (!errors.is_empty()).then_some(errors),
        cache_source: "realtime".into(),
    };

    tracing::info!(
        query = %request.query,
        models = model_count,
        succeeded = per_model.len(),
        returned = response.returned,
        took_ms,
        "Multi-model search completed"
    );

    if request.save {
        persist_multi_search(state, &response, &rows, &per_model).await;
    }

    if let Some(cache) = &state.cache {
        cache
            .put_json(&cache_key, &response, MULTI_SEARCH_CACHE_TTL)
            .await;
    }

    Ok(response)
}

/// Load and gate every submitted model: `404` on a missing id, `400` on an inactive one.
async fn load_models(
    state: &AppState,
    model_ids: &[i64],
) -> Result<Vec<EmbeddingModelRow>, ApiError> {
    let mut rows = Vec::with_capacity(model_ids.len());
    for &model_id in model_ids {
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
        rows.push(row);
    }
    Ok(rows)
}

async fn fetch_for_model(
    state: &AppState,
    row: &EmbeddingModelRow,
    query: &str,
    fetch_n: usize,
) -> Result<Vec<MultiSearchResult>, ApiError> {
    let collection = get_collection_checked(state, &row.collection).await?;
    let embedder = build_model_embedder(state, row).await?;
    let target = SearchTarget {
        collection,
        embedder,
        provider_name: row.embedding_provider.clone(),
        model_name: row.embedding_model.clone(),
    };
    warn_on_collection_mismatch(&target);

    let result = if target.embedder.produces_vectors() {
        let vector = embed_query(Arc::clone(&target.embedder), query.to_string()).await?;
        state
            .chroma
            .query(&target.collection, QueryInput::Embeddings(vec![vector]), fetch_n)
            .await?
    } else {
        state
            .chroma
            .query(
                &target.collection,
                QueryInput::Texts(vec![query.to_string()]),
                fetch_n,
            )
            .await?
    };

    Ok(result
        .ids
        .into_iter()
        .enumerate()
        .map(|(index, id)| {
            let distance = result.distances.get(index).copied();
            MultiSearchResult {
                id,
                distance,
                score: distance.map(|d| 1.0 - d),
                document: result.documents.get(index).cloned().flatten(),
                metadata: result.metadatas.get(index).cloned().unwrap_or_default(),
                model_id: row.id,
                provider: row.embedding_provider.clone(),
                model: row.embedding_model.clone(),
                color: row.color.clone(),
            }
        })
        .collect())
}

/// One history row per successful model, plus one approval counter bump. Best-effort.
async fn persist_multi_search(
    state: &AppState,
    response: &MultiSearchResponse,
    rows: &[EmbeddingModelRow],
    per_model: &[(i64, Vec<MultiSearchResult>)],
) {
    for (model_id, results) in per_model {
        let Some(row) = rows.iter().find(|row| row.id == *model_id) else {
            continue;
        };
        let saved = crate::db::SavedSearch {
            query: response.query.clone(),
            result_count: results.len() as i64,
            took_ms: response.took_ms,
            collection: row.collection.clone(),
            provider: row.embedding_provider.clone(),
            model: row.embedding_model.clone(),
            results_json: serde_json::to_string(results).ok(),
        };
        if let Err(err) = state
            .db
            .call(move |conn| crate::db::save_search(conn, &saved))
            .await
        {
            tracing::warn!(model_id, error = %err, "Failed to save model search to history");
        }
    }

    let query = response.query.clone();
    if let Err(err) = state
        .db
        .call(move |conn| crate::db::update_query_search_count(conn, &query))
        .await
    {
        tracing::warn!(error = %err, "Failed to bump query approval counter");
    }
}
