//! HTTP surface: router assembly, middleware, and REST handlers.

mod admin;
mod handlers;
pub mod middleware;

use crate::state::SharedState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

/// Build the service router with middleware attached.
///
/// The auth/rate-limit middleware wraps every route; the public-path allowlist inside it
/// keeps `/`, `/health`, `/static/*`, `/approved-queries`, and the admin UI page open.
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/search", post(handlers::search))
        .route("/search/multi", post(handlers::search_multi))
        .route("/search/vote", post(handlers::search_vote))
        .route("/history", get(handlers::get_history))
        .route("/history/top", get(handlers::get_history_top))
        .route("/history/:id", get(handlers::get_history_item))
        .route("/approved-queries", get(handlers::get_approved_queries))
        .route("/models/active", get(handlers::get_active_models))
        .route("/health", get(handlers::healthcheck))
        .route("/commands", get(handlers::get_commands))
        .nest("/admin/api", admin::router())
        .route("/", get(handlers::serve_root))
        .route("/admin", get(handlers::serve_admin))
        .nest_service("/static", ServeDir::new("static"))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_rate_limit,
        ))
        .layer(axum::middleware::from_fn(middleware::log_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
