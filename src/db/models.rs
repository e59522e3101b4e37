//! Embedding model registry.
//!
//! Rows are synthesized from completed export jobs: one per unique
//! `(provider, model, collection)` triple, refreshed on demand and toggled or re-colored
//! by operators. Colors come from a fixed palette assigned by insertion position.

use super::{DbError, now_utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

/// Display palette cycled through as models are first registered.
const MODEL_COLOR_PALETTE: [&str; 8] = [
    "#3B82F6", "#10B981", "#F59E0B", "#EF4444", "#8B5CF6", "#EC4899", "#06B6D4", "#84CC16",
];

/// Registry row for one exported model.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingModelRow {
    /// Row identifier used by `model_id` request fields.
    pub id: i64,
    /// Embedding provider name.
    pub embedding_provider: String,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Collection the model's segments live in.
    pub collection: String,
    /// Export job the row was last synced from.
    pub job_id: i64,
    /// Whether the model is selectable for searches.
    pub is_active: bool,
    /// Display color (`#RRGGBB`).
    pub color: String,
    /// Row creation timestamp.
    pub created_at: String,
    /// Last modification timestamp.
    pub updated_at: String,
    /// Completion time of the most recent job for the triple.
    pub last_completed_job_at: Option<String>,
}

/// Upsert registry rows from the latest completed jobs.
///
/// Existing rows keep their activation flag and color; new rows receive the next palette
/// color by insertion position. Returns the number of triples examined.
pub fn sync_embedding_models_from_jobs(conn: &mut Connection, limit: i64) -> Result<usize, DbError> {
    let jobs = super::jobs::get_latest_completed_model_jobs(conn, limit)?;
    let tx = conn.transaction()?;
    let mut synced = 0usize;

    for job in &jobs {
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM embedding_models
                 WHERE embedding_provider = ?1 AND embedding_model = ?2 AND collection = ?3",
                params![job.embedding_provider, job.embedding_model, job.collection],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE embedding_models
                     SET job_id = ?1, updated_at = ?2, last_completed_job_at = ?3
                     WHERE id = ?4",
                    params![job.id, now_utc(), job.completed_at, id],
                )?;
            }
            None => {
                let position: i64 =
                    tx.query_row("SELECT COUNT(*) FROM embedding_models", [], |row| row.get(0))?;
                let color = MODEL_COLOR_PALETTE
                    [(position as usize) % MODEL_COLOR_PALETTE.len()];
                tx.execute(
                    "INSERT INTO embedding_models
                     (embedding_provider, embedding_model, collection, job_id, is_active, color,
                      created_at, updated_at, last_completed_job_at)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6, ?7)",
                    params![
                        job.embedding_provider,
                        job.embedding_model,
                        job.collection,
                        job.id,
                        color,
                        now_utc(),
                        job.completed_at,
                    ],
                )?;
            }
        }
        synced += 1;
    }

    tx.commit()?;
    tracing::debug!(synced, "Embedding models synced from jobs");
    Ok(synced)
}

/// Fetch one registry row.
pub fn get_embedding_model(
    conn: &Connection,
    model_id: i64,
) -> Result<Option<EmbeddingModelRow>, DbError> {
    Ok(conn
        .query_row(
            &format!("SELECT {MODEL_COLUMNS} FROM embedding_models WHERE id = ?1"),
            [model_id],
            map_model_row,
        )
        .optional()?)
}

/// List registry rows, optionally restricted to active ones.
pub fn list_embedding_models(
    conn: &Connection,
    only_active: bool,
    limit: i64,
) -> Result<Vec<EmbeddingModelRow>, DbError> {
    let sql = if only_active {
        format!(
            "SELECT {MODEL_COLUMNS} FROM embedding_models WHERE is_active = 1
             ORDER BY id LIMIT ?1"
        )
    } else {
        format!("SELECT {MODEL_COLUMNS} FROM embedding_models ORDER BY id LIMIT ?1")
    };
    let mut statement = conn.prepare(&sql)?;
    let rows = statement
        .query_map([limit], map_model_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Toggle a model's availability for search. Returns `false` when the row is missing.
pub fn set_embedding_model_active(
    conn: &Connection,
    model_id: i64,
    is_active: bool,
) -> Result<bool, DbError> {
    let affected = conn.execute(
        "UPDATE embedding_models SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
        params![is_active, now_utc(), model_id],
    )?;
    Ok(affected > 0)
}

/// Change a model's display color; rejects anything but `#RRGGBB`.
pub fn update_embedding_model_color(
    conn: &Connection,
    model_id: i64,
    color: &str,
) -> Result<bool, DbError> {
    if !is_valid_hex_color(color) {
        return Err(DbError::InvalidInput(format!(
            "invalid HEX color '{color}'; expected #RRGGBB"
        )));
    }
    let affected = conn.execute(
        "UPDATE embedding_models SET color = ?1, updated_at = ?2 WHERE id = ?3",
        params![color, now_utc(), model_id],
    )?;
    Ok(affected > 0)
}

fn is_valid_hex_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}

const MODEL_COLUMNS: &str = "id, embedding_provider, embedding_model, collection, job_id, \
                             is_active, color, created_at, updated_at, last_completed_job_at";

fn map_model_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EmbeddingModelRow> {
    Ok(EmbeddingModelRow {
        id: row.get(0)?,
        embedding_provider: row.get(1)?,
        embedding_model: row.get(2)?,
        collection: row.get(3)?,
        job_id: row.get(4)?,
        is_active: row.get(5)?,
        color: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        last_completed_job_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::jobs::test_support::completed_job;
    use crate::db::test_support::temp_db;

    #[test]
    fn sync_then_toggle_and_recolor() {
        let (_dir, db) = temp_db();
        let mut conn = db.open().expect("conn");
        completed_job(&conn, "book_pages", "openai", "text-embedding-3-small");
        sync_embedding_models_from_jobs(&mut conn, 5).expect("sync");

        let models = list_embedding_models(&conn, false, 5).expect("list");
        assert_eq!(models.len(), 1);
        let model_id = models[0].id;
        assert_eq!(models[0].color, "#3B82F6");

        assert!(set_embedding_model_active(&conn, model_id, false).expect("toggle"));
        let model = get_embedding_model(&conn, model_id)
            .expect("get")
            .expect("row");
        assert!(!model.is_active);

        assert!(update_embedding_model_color(&conn, model_id, "#123456").expect("recolor"));
        let model = get_embedding_model(&conn, model_id)
            .expect("get")
            .expect("row");
        assert_eq!(model.color, "#123456");
    }

    #[test]
    fn sync_is_idempotent_per_triple() {
        let (_dir, db) = temp_db();
        let mut conn = db.open().expect("conn");
        completed_job(&conn, "col", "openai", "m1");
        sync_embedding_models_from_jobs(&mut conn, 5).expect("first sync");
        let newer_job = completed_job(&conn, "col", "openai", "m1");
        sync_embedding_models_from_jobs(&mut conn, 5).expect("second sync");

        let models = list_embedding_models(&conn, false, 5).expect("list");
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].job_id, newer_job);
    }

    #[test]
    fn palette_colors_follow_insertion_order() {
        let (_dir, db) = temp_db();
        let mut conn = db.open().expect("conn");
        completed_job(&conn, "col_a", "openai", "m1");
        completed_job(&conn, "col_b", "gemini", "m2");
        sync_embedding_models_from_jobs(&mut conn, 5).expect("sync");

        let models = list_embedding_models(&conn, false, 5).expect("list");
        assert_eq!(models.len(), 2);
        let colors: Vec<&str> = models.iter().map(|m| m.color.as_str()).collect();
        assert!(colors.contains(&"#3B82F6"));
        assert!(colors.contains(&"#10B981"));
    }

    #[test]
    fn invalid_hex_color_is_rejected() {
        let (_dir, db) = temp_db();
        let conn = db.open().expect("conn");
        let error = update_embedding_model_color(&conn, 1, "blue").unwrap_err();
        assert!(matches!(error, DbError::InvalidInput(_)));
        let error = update_embedding_model_color(&conn, 1, "#12345").unwrap_err();
        assert!(matches!(error, DbError::InvalidInput(_)));
    }

    #[test]
    fn only_active_filter_hides_disabled_models() {
        let (_dir, db) = temp_db();
        let mut conn = db.open().expect("conn");
        completed_job(&conn, "col_a", "openai", "m1");
        completed_job(&conn, "col_b", "openai", "m2");
        sync_embedding_models_from_jobs(&mut conn, 5).expect("sync");

        let all = list_embedding_models(&conn, false, 10).expect("list");
        set_embedding_model_active(&conn, all[0].id, false).expect("toggle");

        let active = list_embedding_models(&conn, true, 10).expect("active");
        assert_eq!(active.len(), 1);
        assert_ne!(active[0].id, all[0].id);
    }
}
