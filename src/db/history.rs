//! Search history persistence.

use super::{DbError, now_utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

/// Row ready to be appended to the history table.
#[derive(Debug, Clone)]
pub struct SavedSearch {
    /// Free-text query as submitted.
    pub query: String,
    /// Number of results returned to the client.
    pub result_count: i64,
    /// Wall-clock duration of the search in milliseconds.
    pub took_ms: f64,
    /// Collection the search ran against.
    pub collection: String,
    /// Embedding provider used for the query.
    pub provider: String,
    /// Embedding model used for the query.
    pub model: String,
    /// Serialized result list stored for later inspection.
    pub results_json: Option<String>,
}

/// History list entry (results omitted).
#[derive(Debug, Clone, Serialize)]
pub struct HistoryItem {
    /// Row identifier.
    pub id: i64,
    /// Free-text query.
    pub query: String,
    /// Number of results returned.
    pub result_count: i64,
    /// Search duration in milliseconds.
    pub took_ms: f64,
    /// UTC timestamp of the search.
    pub timestamp: String,
    /// Collection searched.
    pub collection: String,
    /// Embedding provider.
    pub provider: String,
    /// Embedding model.
    pub model: String,
}

/// Full history entry including the stored results.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryDetail {
    /// Summary fields shared with the list view.
    #[serde(flatten)]
    pub item: HistoryItem,
    /// Stored results, decoded from JSON when present.
    pub results: Option<serde_json::Value>,
}

/// Aggregated row for the most-searched-queries view.
#[derive(Debug, Clone, Serialize)]
pub struct TopQuery {
    /// Query text.
    pub query: String,
    /// Number of history rows recorded for the query.
    pub search_count: i64,
    /// Timestamp of the most recent search.
    pub last_searched_at: String,
}

/// Append one search to the history. Returns the new row id.
pub fn save_search(conn: &Connection, search: &SavedSearch) -> Result<i64, DbError> {
    conn.execute(
        "INSERT INTO search_history
         (query, result_count, took_ms, timestamp, collection, provider, model, results_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            search.query,
            search.result_count,
            search.took_ms,
            now_utc(),
            search.collection,
            search.provider,
            search.model,
            search.results_json,
        ],
    )?;
    let id = conn.last_insert_rowid();
    tracing::debug!(id, query = %search.query, results = search.result_count, "Saved search");
    Ok(id)
}

/// Fetch a page of history rows, or a single row when `search_id` is given.
/// Returns the rows together with the total row count.
pub fn get_search_history(
    conn: &Connection,
    limit: i64,
    offset: i64,
    search_id: Option<i64>,
) -> Result<(Vec<HistoryItem>, i64), DbError> {
    if let Some(id) = search_id {
        let row = conn
            .query_row(
                "SELECT id, query, result_count, took_ms, timestamp, collection, provider, model
                 FROM search_history WHERE id = ?1",
                [id],
                map_history_item,
            )
            .optional()?;
        let total = i64::from(row.is_some());
        return Ok((row.into_iter().collect(), total));
    }

    let total: i64 = conn.query_row("SELECT COUNT(*) FROM search_history", [], |row| row.get(0))?;
    let mut statement = conn.prepare(
        "SELECT id, query, result_count, took_ms, timestamp, collection, provider, model
         FROM search_history ORDER BY timestamp DESC LIMIT ?1 OFFSET ?2",
    )?;
    let rows = statement
        .query_map(params![limit, offset], map_history_item)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((rows, total))
}

/// Fetch one history row including its stored results.
pub fn get_search_results(
    conn: &Connection,
    search_id: i64,
) -> Result<Option<HistoryDetail>, DbError> {
    let row = conn
        .query_row(
            "SELECT id, query, result_count, took_ms, timestamp, collection, provider, model,
                    results_json
             FROM search_history WHERE id = ?1",
            [search_id],
            |row| {
                let item = map_history_item(row)?;
                let results_json: Option<String> = row.get(8)?;
                Ok((item, results_json))
            },
        )
        .optional()?;

    Ok(row.map(|(item, results_json)| HistoryDetail {
        item,
        results: results_json.and_then(|raw| serde_json::from_str(&raw).ok()),
    }))
}

/// Most frequent queries with at least `min_count` occurrences.
pub fn get_top_queries(
    conn: &Connection,
    limit: i64,
    min_count: i64,
) -> Result<Vec<TopQuery>, DbError> {
    let mut statement = conn.prepare(
        "SELECT query, COUNT(*) AS search_count, MAX(timestamp) AS last_searched_at
         FROM search_history
         GROUP BY query
         HAVING COUNT(*) >= ?1
         ORDER BY search_count DESC, last_searched_at DESC
         LIMIT ?2",
    )?;
    let rows = statement
        .query_map(params![min_count, limit], |row| {
            Ok(TopQuery {
                query: row.get(0)?,
                search_count: row.get(1)?,
                last_searched_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_history_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryItem> {
    Ok(HistoryItem {
        id: row.get(0)?,
        query: row.get(1)?,
        result_count: row.get(2)?,
        took_ms: row.get(3)?,
        timestamp: row.get(4)?,
        collection: row.get(5)?,
        provider: row.get(6)?,
        model: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_db;

    fn sample(query: &str) -> SavedSearch {
        SavedSearch {
            query: query.into(),
            result_count: 3,
            took_ms: 12.5,
            collection: "book_pages".into(),
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            results_json: Some(r#"[{"id":"doc-1"}]"#.into()),
        }
    }

    #[test]
    fn save_then_fetch_round_trips() {
        let (_dir, db) = temp_db();
        let conn = db.open().expect("conn");
        let id = save_search(&conn, &sample("آموزش عقاید چیست؟")).expect("save");

        let (rows, total) = get_search_history(&conn, 10, 0, None).expect("history");
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].query, "آموزش عقاید چیست؟");

        let detail = get_search_results(&conn, id).expect("detail").expect("row");
        assert_eq!(detail.results.unwrap()[0]["id"], "doc-1");
    }

    #[test]
    fn missing_history_row_yields_none() {
        let (_dir, db) = temp_db();
        let conn = db.open().expect("conn");
        assert!(get_search_results(&conn, 42).expect("query").is_none());
        let (rows, total) = get_search_history(&conn, 10, 0, Some(42)).expect("history");
        assert!(rows.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn top_queries_respect_min_count() {
        let (_dir, db) = temp_db();
        let conn = db.open().expect("conn");
        for _ in 0..3 {
            save_search(&conn, &sample("پرتکرار")).expect("save");
        }
        save_search(&conn, &sample("تک")).expect("save");

        let top = get_top_queries(&conn, 10, 2).expect("top");
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].query, "پرتکرار");
        assert_eq!(top[0].search_count, 3);
    }
}
