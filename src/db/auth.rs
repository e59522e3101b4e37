//! API users, bearer tokens, and daily usage counters.
//!
//! Tokens are stored as SHA-256 hashes; the plaintext is shown exactly once at creation.
//! Usage rows are upserted per `(token_id, UTC date)` so the daily counter is atomic and
//! resets implicitly at midnight.

use super::{DbError, now_utc};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// API user row.
#[derive(Debug, Clone, Serialize)]
pub struct ApiUser {
    /// Row identifier.
    pub id: i64,
    /// Unique login-less username.
    pub username: String,
    /// Optional contact address.
    pub email: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Whether the user's tokens may authenticate.
    pub is_active: bool,
}

/// API token row (hash never leaves the store).
#[derive(Debug, Clone, Serialize)]
pub struct ApiToken {
    /// Row identifier.
    pub id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Operator-facing label.
    pub name: String,
    /// Daily request allowance.
    pub rate_limit_per_day: i64,
    /// Creation timestamp.
    pub created_at: String,
    /// Optional expiry timestamp.
    pub expires_at: Option<String>,
    /// Whether the token may authenticate.
    pub is_active: bool,
    /// Timestamp of the last authenticated request.
    pub last_used_at: Option<String>,
}

/// Join of token and user state needed by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthenticatedToken {
    /// Token row identifier.
    pub token_id: i64,
    /// Owning user identifier.
    pub user_id: i64,
    /// Daily request allowance.
    pub rate_limit_per_day: i64,
    /// Token activation flag.
    pub token_active: bool,
    /// User activation flag.
    pub user_active: bool,
    /// Optional expiry timestamp.
    pub expires_at: Option<String>,
}

/// One day of usage for a token.
#[derive(Debug, Clone, Serialize)]
pub struct TokenUsage {
    /// UTC date of the bucket (`YYYY-MM-DD`).
    pub date: String,
    /// Requests counted within the day.
    pub request_count: i64,
    /// Timestamp of the last request in the bucket.
    pub last_request_at: Option<String>,
}

/// SHA-256 hash of a bearer token, hex encoded, as stored in the `token` column.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Create a user. Fails on duplicate usernames.
pub fn create_api_user(
    conn: &Connection,
    username: &str,
    email: Option<&str>,
) -> Result<ApiUser, DbError> {
    conn.execute(
        "INSERT INTO api_users (username, email, created_at, is_active) VALUES (?1, ?2, ?3, 1)",
        params![username, email, now_utc()],
    )?;
    let id = conn.last_insert_rowid();
    get_api_user(conn, id)?.ok_or_else(|| DbError::InvalidInput("user vanished".into()))
}

/// Fetch one user.
pub fn get_api_user(conn: &Connection, user_id: i64) -> Result<Option<ApiUser>, DbError> {
    Ok(conn
        .query_row(
            "SELECT id, username, email, created_at, is_active FROM api_users WHERE id = ?1",
            [user_id],
            map_user,
        )
        .optional()?)
}

/// List users, newest first.
pub fn list_api_users(conn: &Connection, limit: i64) -> Result<Vec<ApiUser>, DbError> {
    let mut statement = conn.prepare(
        "SELECT id, username, email, created_at, is_active FROM api_users
         ORDER BY created_at DESC LIMIT ?1",
    )?;
    let rows = statement
        .query_map([limit], map_user)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Toggle a user's activation flag.
pub fn set_user_active(conn: &Connection, user_id: i64, is_active: bool) -> Result<bool, DbError> {
    let affected = conn.execute(
        "UPDATE api_users SET is_active = ?1 WHERE id = ?2",
        params![is_active, user_id],
    )?;
    Ok(affected > 0)
}

/// Delete a user and (via cascade) their tokens and usage.
pub fn delete_api_user(conn: &Connection, user_id: i64) -> Result<bool, DbError> {
    let affected = conn.execute("DELETE FROM api_users WHERE id = ?1", [user_id])?;
    Ok(affected > 0)
}

/// Create a token for a user; returns the row plus the plaintext secret (shown once).
pub fn create_api_token(
    conn: &Connection,
    user_id: i64,
    name: &str,
    rate_limit_per_day: i64,
    expires_at: Option<&str>,
) -> Result<(ApiToken, String), DbError> {
    let plaintext = format!(
        "ks_{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    );
    conn.execute(
        "INSERT INTO api_tokens
         (user_id, token, name, rate_limit_per_day, created_at, expires_at, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
        params![
            user_id,
            hash_token(&plaintext),
            name,
            rate_limit_per_day,
            now_utc(),
            expires_at
        ],
    )?;
    let id = conn.last_insert_rowid();
    let token = get_api_token(conn, id)?
        .ok_or_else(|| DbError::InvalidInput("token vanished".into()))?;
    tracing::info!(token_id = id, user_id, "API token created");
    Ok((token, plaintext))
}

/// Fetch one token row.
pub fn get_api_token(conn: &Connection, token_id: i64) -> Result<Option<ApiToken>, DbError> {
    Ok(conn
        .query_row(
            &format!("SELECT {TOKEN_COLUMNS} FROM api_tokens WHERE id = ?1"),
            [token_id],
            map_token,
        )
        .optional()?)
}

/// List tokens belonging to one user.
pub fn list_tokens_for_user(conn: &Connection, user_id: i64) -> Result<Vec<ApiToken>, DbError> {
    let mut statement = conn.prepare(&format!(
        "SELECT {TOKEN_COLUMNS} FROM api_tokens WHERE user_id = ?1 ORDER BY created_at DESC"
    ))?;
    let rows = statement
        .query_map([user_id], map_token)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Toggle a token's activation flag.
pub fn set_token_active(
    conn: &Connection,
    token_id: i64,
    is_active: bool,
) -> Result<bool, DbError> {
    let affected = conn.execute(
        "UPDATE api_tokens SET is_active = ?1 WHERE id = ?2",
        params![is_active, token_id],
    )?;
    Ok(affected > 0)
}

/// Delete a token and its usage rows.
pub fn delete_api_token(conn: &Connection, token_id: i64) -> Result<bool, DbError> {
    let affected = conn.execute("DELETE FROM api_tokens WHERE id = ?1", [token_id])?;
    Ok(affected > 0)
}

/// Resolve the auth state for a hashed bearer token, stamping `last_used_at`.
pub fn find_token_by_hash(
    conn: &Connection,
    token_hash: &str,
) -> Result<Option<AuthenticatedToken>, DbError> {
    let row = conn
        .query_row(
            "SELECT t.id, t.user_id, t.rate_limit_per_day, t.is_active, u.is_active, t.expires_at
             FROM api_tokens t JOIN api_users u ON u.id = t.user_id
             WHERE t.token = ?1",
            [token_hash],
            |row| {
                Ok(AuthenticatedToken {
                    token_id: row.get(0)?,
                    user_id: row.get(1)?,
                    rate_limit_per_day: row.get(2)?,
                    token_active: row.get(3)?,
                    user_active: row.get(4)?,
                    expires_at: row.get(5)?,
                })
            },
        )
        .optional()?;
    if let Some(token) = &row {
        conn.execute(
            "UPDATE api_tokens SET last_used_at = ?1 WHERE id = ?2",
            params![now_utc(), token.token_id],
        )?;
    }
    Ok(row)
}

/// Atomically bump today's counter for a token and return the new count.
pub fn increment_token_usage(conn: &Connection, token_id: i64) -> Result<i64, DbError> {
    let today = Utc::now().date_naive().to_string();
    conn.execute(
        "INSERT INTO api_token_usage (token_id, date, request_count, last_request_at)
         VALUES (?1, ?2, 1, ?3)
         ON CONFLICT(token_id, date) DO UPDATE SET
             request_count = request_count + 1,
             last_request_at = excluded.last_request_at",
        params![token_id, today, now_utc()],
    )?;
    token_usage_today(conn, token_id)
}

/// Today's request count for a token (0 when no bucket exists yet).
pub fn token_usage_today(conn: &Connection, token_id: i64) -> Result<i64, DbError> {
    let today = Utc::now().date_naive().to_string();
    let count: Option<i64> = conn
        .query_row(
            "SELECT request_count FROM api_token_usage WHERE token_id = ?1 AND date = ?2",
            params![token_id, today],
            |row| row.get(0),
        )
        .optional()?;
    Ok(count.unwrap_or(0))
}

/// Recent usage buckets for a token, newest first.
pub fn get_token_usage(
    conn: &Connection,
    token_id: i64,
    limit: i64,
) -> Result<Vec<TokenUsage>, DbError> {
    let mut statement = conn.prepare(
        "SELECT date, request_count, last_request_at FROM api_token_usage
         WHERE token_id = ?1 ORDER BY date DESC LIMIT ?2",
    )?;
    let rows = statement
        .query_map(params![token_id, limit], |row| {
            Ok(TokenUsage {
                date: row.get(0)?,
                request_count: row.get(1)?,
                last_request_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

const TOKEN_COLUMNS: &str =
    "id, user_id, name, rate_limit_per_day, created_at, expires_at, is_active, last_used_at";

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApiUser> {
    Ok(ApiUser {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        created_at: row.get(3)?,
        is_active: row.get(4)?,
    })
}

fn map_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApiToken> {
    Ok(ApiToken {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        rate_limit_per_day: row.get(3)?,
        created_at: row.get(4)?,
        expires_at: row.get(5)?,
        is_active: row.get(6)?,
        last_used_at: row.get(7)?,
    })
}
