//! Embedded SQLite store for history, jobs, models, approvals, votes, and API auth.
//!
//! Connections are short-lived: every operation opens its own handle, runs inside an
//! implicit transaction, and closes on return. Schema creation is idempotent
//! (`IF NOT EXISTS` everywhere) so concurrent startups are safe. Handlers reach the store
//! through [`Database::call`], which moves the closure onto the blocking pool so the async
//! event loop never touches SQLite directly.

mod approvals;
mod auth;
mod history;
mod jobs;
mod models;
mod votes;

pub use approvals::{
    ApprovedQuery, QueryApproval, approve_query, delete_query, get_approval_by_query,
    list_approved_public, list_query_approvals, reject_query, update_query_search_count,
};
pub use auth::{
    ApiToken, ApiUser, AuthenticatedToken, TokenUsage, create_api_token, create_api_user,
    delete_api_token, delete_api_user, find_token_by_hash, get_api_token, get_api_user,
    get_token_usage, hash_token, increment_token_usage, list_api_users, list_tokens_for_user,
    set_token_active, set_user_active, token_usage_today,
};
pub use history::{
    HistoryDetail, HistoryItem, SavedSearch, TopQuery, get_search_history, get_search_results,
    get_top_queries, save_search,
};
pub use jobs::{
    ExportJob, NewExportJob, complete_export_job, create_export_job, delete_export_job,
    fail_export_job, get_export_job, get_latest_completed_model_jobs, list_export_jobs,
};
pub use models::{
    EmbeddingModelRow, get_embedding_model, list_embedding_models, set_embedding_model_active,
    sync_embedding_models_from_jobs, update_embedding_model_color,
};
pub use votes::{
    SearchVote, VoteStats, VoteSummaryRow, get_search_votes, get_vote_stats, get_vote_summary,
    save_search_vote,
};

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Default database file name, kept next to the process working directory.
pub const DB_FILE_NAME: &str = "search_history.db";

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQLite failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Caller supplied a value the schema refuses (bad color, unknown status).
    #[error("{0}")]
    InvalidInput(String),
    /// The blocking task running the operation was cancelled or panicked.
    #[error("Database task failed: {0}")]
    TaskFailed(String),
}

/// Handle to the SQLite file; cheap to clone, opens a connection per operation.
#[derive(Clone)]
pub struct Database {
    path: Arc<PathBuf>,
}

impl Database {
    /// Create a handle for the given file path.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Arc::new(path.as_ref().to_path_buf()),
        }
    }

    /// Create a handle for the default `search_history.db` in the working directory.
    pub fn default_path() -> Self {
        Self::new(DB_FILE_NAME)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh connection with the standard pragmas applied.
    pub fn open(&self) -> Result<Connection, DbError> {
        let conn = Connection::open(self.path.as_ref())?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    /// Create the schema when missing. Safe to call on every startup.
    pub fn init_schema(&self) -> Result<(), DbError> {
        let conn = self.open()?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::info!(path = %self.path.display(), "Database initialized");
        Ok(())
    }

    /// Run a store operation on the blocking pool.
    pub async fn call<F, T>(&self, operation: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DbError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.open()?;
            operation(&mut conn)
        })
        .await
        .map_err(|err| DbError::TaskFailed(err.to_string()))?
    }
}

/// Current UTC instant rendered the way every table stores timestamps.
pub(crate) fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS search_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query TEXT NOT NULL,
    result_count INTEGER NOT NULL,
    took_ms REAL NOT NULL,
    timestamp DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    collection TEXT NOT NULL,
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    results_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_timestamp ON search_history(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_query ON search_history(query);

CREATE TABLE IF NOT EXISTS export_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status TEXT NOT NULL CHECK(status IN ('pending', 'running', 'completed', 'failed')),
    started_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    completed_at DATETIME,
    duration_seconds REAL,
    sql_path TEXT NOT NULL,
    collection TEXT NOT NULL,
    batch_size INTEGER NOT NULL,
    max_length INTEGER NOT NULL,
    context_length INTEGER NOT NULL,
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    ssl BOOLEAN NOT NULL DEFAULT 0,
    embedding_provider TEXT NOT NULL,
    embedding_model TEXT NOT NULL,
    reset BOOLEAN NOT NULL DEFAULT 0,
    total_records INTEGER,
    total_books INTEGER,
    total_segments INTEGER,
    total_documents_in_collection INTEGER,
    error_message TEXT,
    command_line_args TEXT
);
CREATE INDEX IF NOT EXISTS idx_export_jobs_started_at ON export_jobs(started_at DESC);
CREATE INDEX IF NOT EXISTS idx_export_jobs_status ON export_jobs(status);

CREATE TABLE IF NOT EXISTS query_approvals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'approved' CHECK(status IN ('approved', 'rejected', 'pending')),
    approved_at DATETIME,
    rejected_at DATETIME,
    notes TEXT,
    search_count INTEGER NOT NULL DEFAULT 0,
    last_searched_at DATETIME
);
CREATE INDEX IF NOT EXISTS idx_query_approvals_status ON query_approvals(status);

CREATE TABLE IF NOT EXISTS embedding_models (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    embedding_provider TEXT NOT NULL,
    embedding_model TEXT NOT NULL,
    collection TEXT NOT NULL,
    job_id INTEGER NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    color TEXT NOT NULL DEFAULT '#3B82F6',
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    last_completed_job_at DATETIME,
    FOREIGN KEY(job_id) REFERENCES export_jobs(id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_embedding_models_unique
    ON embedding_models(embedding_provider, embedding_model, collection);
CREATE INDEX IF NOT EXISTS idx_embedding_models_active ON embedding_models(is_active);

CREATE TABLE IF NOT EXISTS search_votes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    guest_user_id TEXT NOT NULL,
    query TEXT NOT NULL,
    model_id INTEGER,
    result_id TEXT,
    vote_type TEXT NOT NULL CHECK(vote_type IN ('like', 'dislike')),
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY(model_id) REFERENCES embedding_models(id)
);
CREATE INDEX IF NOT EXISTS idx_search_votes_guest_user ON search_votes(guest_user_id);
CREATE INDEX IF NOT EXISTS idx_search_votes_query ON search_votes(query);
CREATE UNIQUE INDEX IF NOT EXISTS idx_search_votes_unique
    ON search_votes(guest_user_id, query, COALESCE(model_id, -1), COALESCE(result_id, ''));

CREATE TABLE IF NOT EXISTS api_users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    is_active BOOLEAN NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_api_users_username ON api_users(username);

CREATE TABLE IF NOT EXISTS api_tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    token TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    rate_limit_per_day INTEGER NOT NULL DEFAULT 1000,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    expires_at DATETIME,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    last_used_at DATETIME,
    FOREIGN KEY (user_id) REFERENCES api_users(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_api_tokens_token ON api_tokens(token);
CREATE INDEX IF NOT EXISTS idx_api_tokens_user_id ON api_tokens(user_id);

CREATE TABLE IF NOT EXISTS api_token_usage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    token_id INTEGER NOT NULL,
    date DATE NOT NULL,
    request_count INTEGER NOT NULL DEFAULT 0,
    last_request_at DATETIME,
    FOREIGN KEY (token_id) REFERENCES api_tokens(id) ON DELETE CASCADE,
    UNIQUE(token_id, date)
);
CREATE INDEX IF NOT EXISTS idx_api_token_usage_token_date ON api_token_usage(token_id, date DESC);
"#;

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Open a schema-initialized store backed by a scratch file.
    pub(crate) fn temp_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(dir.path().join("test_search_history.db"));
        db.init_schema().expect("schema");
        (dir, db)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::temp_db;

    #[test]
    fn schema_init_is_idempotent() {
        let (_dir, db) = temp_db();
        db.init_schema().expect("second init");
        let conn = db.open().expect("conn");
        let table_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .expect("count");
        assert!(table_count >= 7);
    }
}
