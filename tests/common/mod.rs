//! Shared fixtures for the integration tests.

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use ketabsearch::chroma::{ChromaClient, CollectionHandle};
use ketabsearch::config::{EmbeddingProvider, Settings};
use ketabsearch::db::Database;
use ketabsearch::embedding::Embedder;
use ketabsearch::state::{AppState, SharedState};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// Settings wired for tests: `none` provider, no cache, pagination on.
pub fn test_settings(enable_api_auth: bool) -> Settings {
    Settings {
        app_host: "127.0.0.1".into(),
        app_port: 0,
        log_level: "info".into(),
        chroma_host: "localhost".into(),
        chroma_port: 8000,
        chroma_ssl: false,
        chroma_api_key: None,
        chroma_collection: "book_pages".into(),
        chroma_persist_directory: None,
        chroma_anonymized_telemetry: false,
        embedding_provider: EmbeddingProvider::None,
        embedding_model: "test-model".into(),
        embedding_device: None,
        openai_api_key: None,
        gemini_api_key: None,
        redis_url: None,
        redis_host: "localhost".into(),
        redis_port: 6379,
        redis_db: 0,
        redis_password: None,
        enable_total_documents: true,
        enable_estimated_results: true,
        enable_pagination: true,
        max_estimated_results: 1000,
        show_approved_queries: true,
        approved_queries_min_count: 1,
        approved_queries_limit: 50,
        enable_api_auth,
        default_rate_limit_per_day: 1000,
        default_use_cache: false,
        search_cache_ttl: 3600,
    }
}

/// Build shared state against a mock Chroma server and a scratch database.
pub fn build_state(
    chroma_url: &str,
    enable_api_auth: bool,
) -> (tempfile::TempDir, SharedState) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::new(dir.path().join("search_history.db"));
    db.init_schema().expect("schema");

    let state = Arc::new(AppState {
        settings: test_settings(enable_api_auth),
        chroma: Arc::new(ChromaClient::new(chroma_url, None).expect("chroma client")),
        collection: CollectionHandle {
            id: "col-default".into(),
            name: "book_pages".into(),
            metadata: None,
        },
        embedder: Arc::new(Embedder::None),
        cache: None,
        db,
    });
    (dir, state)
}

/// Fire one request at a router clone and decode the JSON body.
pub async fn send_request(
    app: &axum::Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    bearer: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}
