//! Admin API under `/admin/api`: jobs, models, query approvals, votes, users, tokens,
//! and diagnostics.

use crate::db;
use crate::error::ApiError;
use crate::state::SharedState;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
};
use chrono::{Days, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

/// Routes mounted under `/admin/api`.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job).delete(delete_job))
        .route("/jobs/:id/command", get(job_command))
        .route("/models", get(list_models))
        .route("/models/:id/active", put(set_model_active))
        .route("/models/:id/color", put(set_model_color))
        .route("/queries", get(list_queries))
        .route("/queries/:id/approve", post(approve_query))
        .route("/queries/:id/reject", post(reject_query))
        .route("/queries/:id", delete(delete_query))
        .route("/votes", get(list_votes))
        .route("/votes/summary", get(vote_summary))
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id/active", put(set_user_active))
        .route("/users/:id", delete(delete_user))
        .route("/users/:id/tokens", get(list_user_tokens))
        .route("/tokens", post(create_token))
        .route("/tokens/:id/active", put(set_token_active))
        .route("/tokens/:id", delete(delete_token))
        .route("/tokens/:id/usage", get(token_usage))
        .route("/segments/:document_id", get(inspect_segment))
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    #[serde(default = "default_limit")]
    limit: i64,
}

async fn list_jobs(
    State(state): State<SharedState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Value>, ApiError> {
    let jobs = state
        .db
        .call(move |conn| db::list_export_jobs(conn, params.limit))
        .await?;
    Ok(Json(json!({ "jobs": jobs })))
}

async fn get_job(
    State(state): State<SharedState>,
    Path(job_id): Path<i64>,
) -> Result<Json<db::ExportJob>, ApiError> {
    let job = state
        .db
        .call(move |conn| db::get_export_job(conn, job_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Export job {job_id} not found")))?;
    Ok(Json(job))
}

async fn delete_job(
    State(state): State<SharedState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state
        .db
        .call(move |conn| db::delete_export_job(conn, job_id))
        .await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Export job {job_id} not found")));
    }
    Ok(Json(json!({ "success": true })))
}

/// Regenerate the CLI invocation that reproduces a job. Secrets never appear; keys are
/// taken from the environment at run time.
async fn job_command(
    State(state): State<SharedState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let job = state
        .db
        .call(move |conn| db::get_export_job(conn, job_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Export job {job_id} not found")))?;

    let mut command = format!(
        "export-pages --sql-path {} --collection {} --batch-size {} --max-length {} \
         --context {} --host {} --port {} --embedding-provider {} --embedding-model {}",
        job.sql_path,
        job.collection,
        job.batch_size,
        job.max_length,
        job.context_length,
        job.host,
        job.port,
        job.embedding_provider,
        job.embedding_model,
    );
    if job.ssl {
        command.push_str(" --ssl");
    }
    if job.reset {
        command.push_str(" --reset");
    }

    Ok(Json(json!({
        "job_id": job.id,
        "command": command,
        "note": "API keys are read from OPENAI_API_KEY / GEMINI_API_KEY at run time.",
        "recorded_args": job.command_line_args,
    })))
}

#[derive(Debug, Deserialize)]
struct ModelListParams {
    #[serde(default)]
    only_active: bool,
    #[serde(default = "default_limit")]
    limit: i64,
}

async fn list_models(
    State(state): State<SharedState>,
    Query(params): Query<ModelListParams>,
) -> Result<Json<Value>, ApiError> {
    let models = state
        .db
        .call(move |conn| {
            db::sync_embedding_models_from_jobs(conn, params.limit)?;
            db::list_embedding_models(conn, params.only_active, params.limit)
        })
        .await?;
    Ok(Json(json!({ "models": models })))
}

#[derive(Debug, Deserialize)]
struct ActiveBody {
    is_active: bool,
}

async fn set_model_active(
    State(state): State<SharedState>,
    Path(model_id): Path<i64>,
    Json(body): Json<ActiveBody>,
) -> Result<Json<Value>, ApiError> {
    let updated = state
        .db
        .call(move |conn| db::set_embedding_model_active(conn, model_id, body.is_active))
        .await?;
    if !updated {
        return Err(ApiError::NotFound(format!("مدل با شناسه {model_id} یافت نشد")));
    }
    Ok(Json(json!({ "success": true, "is_active": body.is_active })))
}

#[derive(Debug, Deserialize)]
struct ColorBody {
    color: String,
}

async fn set_model_color(
    State(state): State<SharedState>,
    Path(model_id): Path<i64>,
    Json(body): Json<ColorBody>,
) -> Result<Json<Value>, ApiError> {
    let color = body.color.clone();
    let updated = state
        .db
        .call(move |conn| db::update_embedding_model_color(conn, model_id, &color))
        .await?;
    if !updated {
        return Err(ApiError::NotFound(format!("مدل با شناسه {model_id} یافت نشد")));
    }
    Ok(Json(json!({ "success": true, "color": body.color })))
}

#[derive(Debug, Deserialize)]
struct QueryListParams {
    #[serde(default)]
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

async fn list_queries(
    State(state): State<SharedState>,
    Query(params): Query<QueryListParams>,
) -> Result<Json<Value>, ApiError> {
    let queries = state
        .db
        .call(move |conn| {
            db::list_query_approvals(conn, params.status.as_deref(), params.limit, params.offset)
        })
        .await?;
    Ok(Json(json!({ "queries": queries })))
}

#[derive(Debug, Default, Deserialize)]
struct NotesBody {
    #[serde(default)]
    notes: Option<String>,
}

async fn approve_query(
    State(state): State<SharedState>,
    Path(approval_id): Path<i64>,
    body: Option<Json<NotesBody>>,
) -> Result<Json<Value>, ApiError> {
    let notes = body.and_then(|Json(body)| body.notes);
    let updated = state
        .db
        .call(move |conn| db::approve_query(conn, approval_id, notes.as_deref()))
        .await?;
    if !updated {
        return Err(ApiError::NotFound(format!("Query {approval_id} not found")));
    }
    Ok(Json(json!({ "success": true, "status": "approved" })))
}

async fn reject_query(
    State(state): State<SharedState>,
    Path(approval_id): Path<i64>,
    body: Option<Json<NotesBody>>,
) -> Result<Json<Value>, ApiError> {
    let notes = body.and_then(|Json(body)| body.notes);
    let updated = state
        .db
        .call(move |conn| db::reject_query(conn, approval_id, notes.as_deref()))
        .await?;
    if !updated {
        return Err(ApiError::NotFound(format!("Query {approval_id} not found")));
    }
    Ok(Json(json!({ "success": true, "status": "rejected" })))
}

async fn delete_query(
    State(state): State<SharedState>,
    Path(approval_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state
        .db
        .call(move |conn| db::delete_query(conn, approval_id))
        .await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Query {approval_id} not found")));
    }
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct VoteListParams {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    model_id: Option<i64>,
    #[serde(default = "default_limit")]
    limit: i64,
}

async fn list_votes(
    State(state): State<SharedState>,
    Query(params): Query<VoteListParams>,
) -> Result<Json<Value>, ApiError> {
    let votes = state
        .db
        .call(move |conn| {
            db::get_search_votes(conn, params.limit, params.query.as_deref(), params.model_id)
        })
        .await?;
    Ok(Json(json!({ "votes": votes })))
}

async fn vote_summary(
    State(state): State<SharedState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Value>, ApiError> {
    let summary = state
        .db
        .call(move |conn| db::get_vote_summary(conn, params.limit))
        .await?;
    Ok(Json(json!({ "summary": summary })))
}

async fn list_users(
    State(state): State<SharedState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Value>, ApiError> {
    let users = state
        .db
        .call(move |conn| db::list_api_users(conn, params.limit))
        .await?;
    Ok(Json(json!({ "users": users })))
}

#[derive(Debug, Deserialize)]
struct CreateUserBody {
    username: String,
    #[serde(default)]
    email: Option<String>,
}

async fn create_user(
    State(state): State<SharedState>,
    Json(body): Json<CreateUserBody>,
) -> Result<Json<db::ApiUser>, ApiError> {
    if body.username.trim().is_empty() {
        return Err(ApiError::Validation("username must not be empty".into()));
    }
    let user = state
        .db
        .call(move |conn| db::create_api_user(conn, body.username.trim(), body.email.as_deref()))
        .await?;
    Ok(Json(user))
}

async fn set_user_active(
    State(state): State<SharedState>,
    Path(user_id): Path<i64>,
    Json(body): Json<ActiveBody>,
) -> Result<Json<Value>, ApiError> {
    let updated = state
        .db
        .call(move |conn| db::set_user_active(conn, user_id, body.is_active))
        .await?;
    if !updated {
        return Err(ApiError::NotFound(format!("User {user_id} not found")));
    }
    Ok(Json(json!({ "success": true, "is_active": body.is_active })))
}

async fn delete_user(
    State(state): State<SharedState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state
        .db
        .call(move |conn| db::delete_api_user(conn, user_id))
        .await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("User {user_id} not found")));
    }
    Ok(Json(json!({ "success": true })))
}

async fn list_user_tokens(
    State(state): State<SharedState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state
        .db
        .call(move |conn| db::get_api_user(conn, user_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {user_id} not found")))?;
    let tokens = state
        .db
        .call(move |conn| db::list_tokens_for_user(conn, user_id))
        .await?;
    Ok(Json(json!({ "tokens": tokens })))
}

#[derive(Debug, Deserialize)]
struct CreateTokenBody {
    user_id: i64,
    name: String,
    #[serde(default)]
    rate_limit_per_day: Option<i64>,
    #[serde(default)]
    expires_in_days: Option<u64>,
}

async fn create_token(
    State(state): State<SharedState>,
    Json(body): Json<CreateTokenBody>,
) -> Result<Json<Value>, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::Validation("token name must not be empty".into()));
    }
    let rate_limit = body
        .rate_limit_per_day
        .unwrap_or(state.settings.default_rate_limit_per_day);
    if rate_limit < 1 {
        return Err(ApiError::Validation(
            "rate_limit_per_day must be at least 1".into(),
        ));
    }
    let expires_at = body.expires_in_days.map(|days| {
        Utc::now()
            .checked_add_days(Days::new(days))
            .unwrap_or_else(Utc::now)
            .to_rfc3339()
    });

    let user_id = body.user_id;
    state
        .db
        .call(move |conn| db::get_api_user(conn, user_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {user_id} not found")))?;

    let name = body.name.trim().to_string();
    let (token, plaintext) = state
        .db
        .call(move |conn| {
            db::create_api_token(conn, user_id, &name, rate_limit, expires_at.as_deref())
        })
        .await?;

    // The plaintext is shown exactly once; only the hash is stored.
    Ok(Json(json!({ "token": token, "plaintext": plaintext })))
}

async fn set_token_active(
    State(state): State<SharedState>,
    Path(token_id): Path<i64>,
    Json(body): Json<ActiveBody>,
) -> Result<Json<Value>, ApiError> {
    let updated = state
        .db
        .call(move |conn| db::set_token_active(conn, token_id, body.is_active))
        .await?;
    if !updated {
        return Err(ApiError::NotFound(format!("Token {token_id} not found")));
    }
    Ok(Json(json!({ "success": true, "is_active": body.is_active })))
}

async fn delete_token(
    State(state): State<SharedState>,
    Path(token_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state
        .db
        .call(move |conn| db::delete_api_token(conn, token_id))
        .await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Token {token_id} not found")));
    }
    Ok(Json(json!({ "success": true })))
}

async fn token_usage(
    State(state): State<SharedState>,
    Path(token_id): Path<i64>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Value>, ApiError> {
    state
        .db
        .call(move |conn| db::get_api_token(conn, token_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Token {token_id} not found")))?;
    let usage = state
        .db
        .call(move |conn| db::get_token_usage(conn, token_id, params.limit))
        .await?;
    Ok(Json(json!({ "token_id": token_id, "usage": usage })))
}

#[derive(Debug, Deserialize)]
struct SegmentParams {
    /// Collection override; defaults to the configured collection.
    #[serde(default)]
    collection: Option<String>,
}

/// Fetch one stored document with its metadata, for export debugging.
async fn inspect_segment(
    State(state): State<SharedState>,
    Path(document_id): Path<String>,
    Query(params): Query<SegmentParams>,
) -> Result<Json<Value>, ApiError> {
    let collection = match params.collection {
        Some(name) => {
            crate::search::orchestrator::get_collection_checked(&state, &name).await?
        }
        None => state.collection.clone(),
    };

    let result = state
        .chroma
        .get_by_ids(&collection, &[document_id.clone()])
        .await?;
    if result.ids.is_empty() {
        return Err(ApiError::NotFound(format!(
            "Document '{document_id}' not found in collection '{}'",
            collection.name
        )));
    }

    Ok(Json(json!({
        "id": result.ids[0],
        "collection": collection.name,
        "document": result.documents.first().cloned().flatten(),
        "metadata": result.metadatas.first().cloned().unwrap_or_default(),
    })))
}
