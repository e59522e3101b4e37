//! Request logging and the auth/rate-limit gate.

use crate::db;
use crate::error::ApiError;
use crate::state::SharedState;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Days, Utc};

/// Paths reachable without a bearer token. `/admin` is the UI page only; the admin API
/// under `/admin/api` stays gated.
const PUBLIC_PATHS: [&str; 7] = [
    "/",
    "/health",
    "/docs",
    "/redoc",
    "/openapi.json",
    "/approved-queries",
    "/admin",
];

/// Structured request log line around every handler.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    tracing::debug!(%method, %path, "Handling request");
    let response = next.run(request).await;
    tracing::debug!(%method, %path, status = %response.status(), "Request finished");
    response
}

/// Bearer-token authentication plus the per-token daily rate limit.
///
/// Disabled entirely by `ENABLE_API_AUTH=false`. On success the response carries the
/// `X-RateLimit-Limit/Remaining/Reset` headers; at the limit the request is answered with
/// `429` and `Retry-After: 86400` before reaching the handler.
pub async fn auth_rate_limit(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.settings.enable_api_auth || is_public_path(request.uri().path()) {
        return next.run(request).await;
    }

    let token = match authenticate(&state, request.headers()).await {
        Ok(token) => token,
        Err(err) => return err.into_response(),
    };

    let limit = token.rate_limit_per_day;
    let token_id = token.token_id;
    let used = match state
        .db
        .call(move |conn| db::token_usage_today(conn, token_id))
        .await
    {
        Ok(used) => used,
        Err(err) => return ApiError::from(err).into_response(),
    };
    if used >= limit {
        tracing::warn!(token_id, used, limit, "Daily rate limit reached");
        return ApiError::RateLimited { limit }.into_response();
    }

    let new_count = match state
        .db
        .call(move |conn| db::increment_token_usage(conn, token_id))
        .await
    {
        Ok(count) => count,
        Err(err) => return ApiError::from(err).into_response(),
    };

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", limit.into());
    headers.insert("x-ratelimit-remaining", (limit - new_count).max(0).into());
    headers.insert("x-ratelimit-reset", next_utc_midnight_epoch().into());
    response
}

fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path) || path.starts_with("/static/")
}

async fn authenticate(
    state: &SharedState,
    headers: &HeaderMap,
) -> Result<db::AuthenticatedToken, ApiError> {
    let header = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Auth("Missing Authorization header".into()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Auth("Authorization header must use the Bearer scheme".into()))?
        .trim();
    if token.is_empty() {
        return Err(ApiError::Auth("Empty bearer token".into()));
    }

    let token_hash = db::hash_token(token);
    let row = state
        .db
        .call(move |conn| db::find_token_by_hash(conn, &token_hash))
        .await?
        .ok_or_else(|| ApiError::Auth("Unknown API token".into()))?;

    if !row.token_active {
        return Err(ApiError::Auth("API token is deactivated".into()));
    }
    if !row.user_active {
        return Err(ApiError::Auth("API user is deactivated".into()));
    }
    if let Some(expires_at) = &row.expires_at
        && let Ok(expiry) = chrono::DateTime::parse_from_rfc3339(expires_at)
        && expiry < Utc::now()
    {
        return Err(ApiError::Auth("API token has expired".into()));
    }

    Ok(row)
}

/// Epoch seconds of the next UTC midnight, used as the rate-limit reset marker.
pub fn next_utc_midnight_epoch() -> i64 {
    let tomorrow = Utc::now()
        .date_naive()
        .checked_add_days(Days::new(1))
        .expect("tomorrow exists");
    tomorrow
        .and_hms_opt(0, 0, 0)
        .expect("midnight exists")
        .and_utc()
        .timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_paths_cover_the_ui_but_not_the_admin_api() {
        assert!(is_public_path("/"));
        assert!(is_public_path("/health"));
        assert!(is_public_path("/admin"));
        assert!(is_public_path("/static/app.js"));
        assert!(is_public_path("/approved-queries"));
        assert!(!is_public_path("/search"));
        assert!(!is_public_path("/admin/api/jobs"));
        assert!(!is_public_path("/history"));
    }

    #[test]
    fn reset_marker_is_in_the_future_and_at_midnight() {
        let reset = next_utc_midnight_epoch();
        let now = Utc::now().timestamp();
        assert!(reset > now);
        assert!(reset - now <= 86_400);
        assert_eq!(reset % 86_400, 0);
    }
}
