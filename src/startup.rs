//! Startup prechecks and shared state construction.
//!
//! Every dependency is probed before the server binds: Chroma must answer its heartbeat
//! and hold the configured collection, the embedding provider must have its credentials,
//! and the schema must exist. Redis is the one soft dependency; an unreachable cache logs
//! a warning and the service runs uncached. Failures are collected and reported together
//! so one restart fixes every problem at once.

use crate::cache::CacheClient;
use crate::chroma::ChromaClient;
use crate::config::Settings;
use crate::db::Database;
use crate::embedding::{Embedder, validate_embedder_config};
use crate::state::{AppState, SharedState};
use anyhow::{Context, bail};
use std::sync::Arc;

/// Run all prechecks and assemble the shared state.
pub async fn build_state(settings: Settings) -> anyhow::Result<SharedState> {
    let mut errors: Vec<String> = Vec::new();

    if let Err(err) = validate_embedder_config(&settings) {
        errors.push(format!("Embedder: {err}"));
    }

    let chroma = match ChromaClient::from_settings(&settings) {
        Ok(client) => Some(Arc::new(client)),
        Err(err) => {
            errors.push(format!("ChromaDB: {err}"));
            None
        }
    };

    let mut collection = None;
    if let Some(chroma) = &chroma {
        match chroma.heartbeat().await {
            Ok(beat) => {
                tracing::info!(heartbeat = beat, "ChromaDB heartbeat successful");
                match chroma.get_collection(&settings.chroma_collection).await {
                    Ok(handle) => {
                        tracing::info!(
                            collection = %handle.name,
                            "Connected to Chroma collection"
                        );
                        collection = Some(handle);
                    }
                    Err(err) => errors.push(format!("ChromaDB: {err}")),
                }
            }
            Err(err) => errors.push(format!(
                "ChromaDB: server is not responding at {}: {err}",
                settings.chroma_base_url()
            )),
        }
    }

    let cache = match CacheClient::connect(&settings.redis_dsn()).await {
        Ok(client) => match client.ping().await {
            Ok(()) => {
                tracing::info!("Redis connection successful");
                Some(client)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Redis ping failed; running without cache");
                None
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "Redis unavailable; running without cache");
            None
        }
    };

    if !errors.is_empty() {
        let summary = errors
            .iter()
            .map(|err| format!("  - {err}"))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Service startup failed due to configuration errors:\n{summary}");
    }

    let db = Database::default_path();
    db.init_schema().context("failed to initialize database")?;

    let embedder_settings = settings.clone();
    let embedder = tokio::task::spawn_blocking(move || Embedder::from_settings(&embedder_settings))
        .await
        .context("embedder construction task failed")?
        .context("failed to construct embedder")?;

    Ok(Arc::new(AppState {
        collection: collection.expect("collection resolved when no errors were recorded"),
        chroma: chroma.expect("chroma client present when no errors were recorded"),
        embedder: Arc::new(embedder),
        cache,
        db,
        settings,
    }))
}
