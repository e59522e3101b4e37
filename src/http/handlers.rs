//! Public REST handlers: search, votes, history, approved queries, models, health.

use crate::db;
use crate::error::ApiError;
use crate::search::{
    MultiSearchRequest, MultiSearchResponse, SearchRequest, SearchResponse, multi_search,
    single_search,
};
use crate::state::SharedState;
use axum::{
    Json,
    extract::{Path, Query, State},
    response::{Html, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Instant;

/// `POST /search`
pub async fn search(
    State(state): State<SharedState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    tracing::info!(query = %request.query, top_k = request.top_k, "Received search request");
    Ok(Json(single_search(&state, request).await?))
}

/// `POST /search/multi`
pub async fn search_multi(
    State(state): State<SharedState>,
    Json(request): Json<MultiSearchRequest>,
) -> Result<Json<MultiSearchResponse>, ApiError> {
    tracing::info!(
        query = %request.query,
        models = request.model_ids.len(),
        "Received multi-model search request"
    );
    Ok(Json(multi_search(&state, request).await?))
}

/// Body of `POST /search/vote`.
#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    /// Anonymous guest identifier, at least 8 characters.
    pub guest_user_id: String,
    /// Query the vote refers to.
    pub query: String,
    /// `like` or `dislike`.
    pub vote_type: String,
    /// Optional model scope.
    #[serde(default)]
    pub model_id: Option<i64>,
    /// Optional result document scope.
    #[serde(default)]
    pub result_id: Option<String>,
}

/// `POST /search/vote`
pub async fn search_vote(
    State(state): State<SharedState>,
    Json(request): Json<VoteRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.guest_user_id.trim().chars().count() < 8 {
        return Err(ApiError::Validation(
            "guest_user_id must be at least 8 characters".into(),
        ));
    }
    if request.query.trim().is_empty() {
        return Err(ApiError::Validation("query must not be empty".into()));
    }
    if !matches!(request.vote_type.as_str(), "like" | "dislike") {
        return Err(ApiError::Validation(format!(
            "unknown vote type '{}'",
            request.vote_type
        )));
    }
    if let Some(model_id) = request.model_id {
        state
            .db
            .call(move |conn| db::get_embedding_model(conn, model_id))
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("مدل با شناسه {model_id} یافت نشد")))?;
    }

    let VoteRequest {
        guest_user_id,
        query,
        vote_type,
        model_id,
        result_id,
    } = request;
    let stats_query = query.clone();
    let stats = state
        .db
        .call(move |conn| {
            db::save_search_vote(
                conn,
                &guest_user_id,
                &query,
                &vote_type,
                model_id,
                result_id.as_deref(),
            )?;
            db::get_vote_stats(conn, &stats_query, model_id)
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "likes": stats.likes,
        "dislikes": stats.dislikes,
    })))
}

fn default_history_limit() -> i64 {
    20
}

fn default_top_limit() -> i64 {
    10
}

fn default_min_count() -> i64 {
    1
}

/// Query string of `GET /history`.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    /// Maximum number of rows to return (1..=100).
    #[serde(default = "default_history_limit")]
    pub limit: i64,
    /// Pagination offset.
    #[serde(default)]
    pub offset: i64,
    /// Fetch a single search by id instead of a page.
    #[serde(default)]
    pub search_id: Option<i64>,
}

/// Body of `GET /history` responses.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Page of history rows.
    pub searches: Vec<db::HistoryItem>,
    /// Total rows in the table.
    pub total: i64,
    /// Echo of the applied limit.
    pub limit: i64,
    /// Echo of the applied offset.
    pub offset: i64,
}

/// `GET /history`
pub async fn get_history(
    State(state): State<SharedState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    if !(1..=100).contains(&params.limit) {
        return Err(ApiError::Validation("limit must be between 1 and 100".into()));
    }
    if params.offset < 0 {
        return Err(ApiError::Validation("offset must not be negative".into()));
    }

    let HistoryParams {
        limit,
        offset,
        search_id,
    } = params;
    let (searches, total) = state
        .db
        .call(move |conn| db::get_search_history(conn, limit, offset, search_id))
        .await?;
    Ok(Json(HistoryResponse {
        searches,
        total,
        limit,
        offset,
    }))
}

/// Query string of `GET /history/top`.
#[derive(Debug, Deserialize)]
pub struct TopQueriesParams {
    /// Maximum number of queries to return (1..=100).
    #[serde(default = "default_top_limit")]
    pub limit: i64,
    /// Minimum number of searches a query needs to appear.
    #[serde(default = "default_min_count")]
    pub min_count: i64,
}

/// `GET /history/top`
pub async fn get_history_top(
    State(state): State<SharedState>,
    Query(params): Query<TopQueriesParams>,
) -> Result<Json<Value>, ApiError> {
    if !(1..=100).contains(&params.limit) {
        return Err(ApiError::Validation("limit must be between 1 and 100".into()));
    }
    if params.min_count < 1 {
        return Err(ApiError::Validation("min_count must be at least 1".into()));
    }

    let TopQueriesParams { limit, min_count } = params;
    let queries = state
        .db
        .call(move |conn| db::get_top_queries(conn, limit, min_count))
        .await?;
    Ok(Json(json!({ "queries": queries })))
}

/// `GET /history/{id}`
pub async fn get_history_item(
    State(state): State<SharedState>,
    Path(search_id): Path<i64>,
) -> Result<Json<db::HistoryDetail>, ApiError> {
    let detail = state
        .db
        .call(move |conn| db::get_search_results(conn, search_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Search with ID {search_id} not found")))?;
    Ok(Json(detail))
}

/// `GET /approved-queries`. Returns an empty list when publication is disabled.
pub async fn get_approved_queries(
    State(state): State<SharedState>,
) -> Result<Json<Value>, ApiError> {
    if !state.settings.show_approved_queries {
        return Ok(Json(json!({ "queries": [] })));
    }
    let min_count = state.settings.approved_queries_min_count;
    let limit = state.settings.approved_queries_limit;
    let queries = state
        .db
        .call(move |conn| db::list_approved_public(conn, min_count, limit))
        .await?;
    Ok(Json(json!({ "queries": queries })))
}

/// `GET /models/active`. Syncs the registry from completed jobs, then lists active rows.
pub async fn get_active_models(
    State(state): State<SharedState>,
) -> Result<Json<Value>, ApiError> {
    let models = state
        .db
        .call(|conn| {
            db::sync_embedding_models_from_jobs(conn, 50)?;
            db::list_embedding_models(conn, true, 50)
        })
        .await?;
    Ok(Json(json!({ "models": models })))
}

#[derive(Debug, Serialize)]
struct HealthComponent {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<f64>,
    extras: Value,
}

impl HealthComponent {
    fn ok(latency_ms: f64, extras: Value) -> Self {
        Self {
            status: "ok",
            detail: None,
            latency_ms: Some(latency_ms),
            extras,
        }
    }

    fn error(detail: String) -> Self {
        Self {
            status: "error",
            detail: Some(detail),
            latency_ms: None,
            extras: json!({}),
        }
    }
}

/// `GET /health`. Every probe is best-effort; failures degrade the overall status but
/// never fail the endpoint.
pub async fn healthcheck(State(state): State<SharedState>) -> Json<Value> {
    let mut overall = "ok";

    let started = Instant::now();
    let chroma = match state.chroma.heartbeat().await {
        Ok(beat) => HealthComponent::ok(
            started.elapsed().as_secs_f64() * 1000.0,
            json!({ "heartbeat": beat }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "Chroma heartbeat failed");
            overall = "degraded";
            HealthComponent::error(err.to_string())
        }
    };

    let started = Instant::now();
    let collection = match state.chroma.count(&state.collection).await {
        Ok(count) => HealthComponent::ok(
            started.elapsed().as_secs_f64() * 1000.0,
            json!({ "collection": state.collection.name, "documents": count }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "Collection stats probe failed");
            overall = "degraded";
            HealthComponent::error(err.to_string())
        }
    };

    let started = Instant::now();
    let redis = match &state.cache {
        Some(cache) => match cache.ping().await {
            Ok(()) => HealthComponent::ok(
                started.elapsed().as_secs_f64() * 1000.0,
                json!({ "ping": true, "url": state.settings.redis_dsn() }),
            ),
            Err(err) => {
                tracing::warn!(error = %err, "Redis ping failed");
                overall = "degraded";
                HealthComponent::error(err.to_string())
            }
        },
        None => {
            overall = "degraded";
            HealthComponent::error("cache client not connected".into())
        }
    };

    Json(json!({
        "status": overall,
        "chroma": chroma,
        "collection": collection,
        "redis": redis,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// `GET /commands`. Machine-readable catalog for hosts and tools.
pub async fn get_commands() -> Json<Value> {
    Json(json!({
        "commands": [
            {
                "name": "search",
                "method": "POST",
                "path": "/search",
                "description": "Semantic search over the default collection. Supports pagination, caching, and full-paragraph context expansion.",
                "request_example": {
                    "query": "آموزش عقاید چیست؟",
                    "top_k": 10,
                    "page": 1,
                    "page_size": 20,
                    "save": true,
                    "include_full_context": true
                }
            },
            {
                "name": "search_multi",
                "method": "POST",
                "path": "/search/multi",
                "description": "Fan a query out to up to three exported models and merge results round-robin with document-id deduplication.",
                "request_example": { "query": "توحید چیست؟", "model_ids": [1, 2], "top_k": 10 }
            },
            {
                "name": "search_vote",
                "method": "POST",
                "path": "/search/vote",
                "description": "Record a like/dislike for a query, model, or result. The latest vote per guest wins.",
                "request_example": {
                    "guest_user_id": "guest-12345678",
                    "query": "توحید چیست؟",
                    "vote_type": "like"
                }
            },
            {
                "name": "history",
                "method": "GET",
                "path": "/history",
                "description": "Paginated search history with per-search result payloads at /history/{id}."
            },
            {
                "name": "active_models",
                "method": "GET",
                "path": "/models/active",
                "description": "Models available for multi-model search, synced from completed export jobs."
            }
        ]
    }))
}

/// `GET /`. Serves the UI when static assets are present, else a JSON pointer body.
pub async fn serve_root() -> Response {
    serve_static_page("static/index.html").await
}

/// `GET /admin`. Serves the admin UI when present, else a JSON pointer body.
pub async fn serve_admin() -> Response {
    serve_static_page("static/admin.html").await
}

async fn serve_static_page(path: &str) -> Response {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Html(contents).into_response(),
        Err(_) => Json(json!({
            "message": "Ketab Search API",
            "health": "/health",
            "commands": "/commands",
        }))
        .into_response(),
    }
}
