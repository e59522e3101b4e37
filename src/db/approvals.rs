//! Query approval bookkeeping.
//!
//! Every search bumps the counter for its query; operators approve or reject queries and
//! the approved set (past a minimum count) is surfaced on the public endpoint.

use super::{DbError, now_utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

/// Full approval row for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct QueryApproval {
    /// Row identifier.
    pub id: i64,
    /// The query text (unique).
    pub query: String,
    /// `approved`, `rejected`, or `pending`.
    pub status: String,
    /// When the query was approved, if ever.
    pub approved_at: Option<String>,
    /// When the query was rejected, if ever.
    pub rejected_at: Option<String>,
    /// Operator notes.
    pub notes: Option<String>,
    /// Number of searches recorded for the query.
    pub search_count: i64,
    /// Timestamp of the latest search.
    pub last_searched_at: Option<String>,
}

/// Public projection of an approved query.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovedQuery {
    /// The query text.
    pub query: String,
    /// Number of searches recorded for the query.
    pub search_count: i64,
}

/// Bump the search counter for a query, creating the row on first sight.
pub fn update_query_search_count(conn: &Connection, query: &str) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO query_approvals (query, search_count, last_searched_at)
         VALUES (?1, 1, ?2)
         ON CONFLICT(query) DO UPDATE SET
             search_count = search_count + 1,
             last_searched_at = excluded.last_searched_at",
        params![query, now_utc()],
    )?;
    Ok(())
}

/// Approve a query. Idempotent: repeated calls refresh `approved_at` and notes.
pub fn approve_query(
    conn: &Connection,
    approval_id: i64,
    notes: Option<&str>,
) -> Result<bool, DbError> {
    let affected = conn.execute(
        "UPDATE query_approvals
         SET status = 'approved', approved_at = ?1, rejected_at = NULL, notes = COALESCE(?2, notes)
         WHERE id = ?3",
        params![now_utc(), notes, approval_id],
    )?;
    Ok(affected > 0)
}

/// Reject a query so it is hidden from the public listing.
pub fn reject_query(
    conn: &Connection,
    approval_id: i64,
    notes: Option<&str>,
) -> Result<bool, DbError> {
    let affected = conn.execute(
        "UPDATE query_approvals
         SET status = 'rejected', rejected_at = ?1, approved_at = NULL, notes = COALESCE(?2, notes)
         WHERE id = ?3",
        params![now_utc(), notes, approval_id],
    )?;
    Ok(affected > 0)
}

/// Remove a query's approval row entirely.
pub fn delete_query(conn: &Connection, approval_id: i64) -> Result<bool, DbError> {
    let affected = conn.execute("DELETE FROM query_approvals WHERE id = ?1", [approval_id])?;
    Ok(affected > 0)
}

/// List approval rows for the admin surface, optionally filtered by status.
pub fn list_query_approvals(
    conn: &Connection,
    status: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<QueryApproval>, DbError> {
    if let Some(status) = status
        && !matches!(status, "approved" | "rejected" | "pending")
    {
        return Err(DbError::InvalidInput(format!(
            "unknown approval status '{status}'"
        )));
    }

    let (sql, rows) = match status {
        Some(status) => {
            let mut statement = conn.prepare(
                "SELECT id, query, status, approved_at, rejected_at, notes, search_count,
                        last_searched_at
                 FROM query_approvals WHERE status = ?1
                 ORDER BY search_count DESC, id
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = statement
                .query_map(params![status, limit, offset], map_approval)?
                .collect::<Result<Vec<_>, _>>()?;
            ("filtered", rows)
        }
        None => {
            let mut statement = conn.prepare(
                "SELECT id, query, status, approved_at, rejected_at, notes, search_count,
                        last_searched_at
                 FROM query_approvals
                 ORDER BY search_count DESC, id
                 LIMIT ?1 OFFSET ?2",
            )?;
            let rows = statement
                .query_map(params![limit, offset], map_approval)?
                .collect::<Result<Vec<_>, _>>()?;
            ("all", rows)
        }
    };
    tracing::trace!(mode = sql, count = rows.len(), "Listed query approvals");
    Ok(rows)
}

/// Approved queries eligible for public display.
pub fn list_approved_public(
    conn: &Connection,
    min_count: i64,
    limit: i64,
) -> Result<Vec<ApprovedQuery>, DbError> {
    let mut statement = conn.prepare(
        "SELECT query, search_count FROM query_approvals
         WHERE status = 'approved' AND search_count >= ?1
         ORDER BY search_count DESC, last_searched_at DESC
         LIMIT ?2",
    )?;
    let rows = statement
        .query_map(params![min_count, limit], |row| {
            Ok(ApprovedQuery {
                query: row.get(0)?,
                search_count: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Fetch an approval row by its query text.
pub fn get_approval_by_query(
    conn: &Connection,
    query: &str,
) -> Result<Option<QueryApproval>, DbError> {
    Ok(conn
        .query_row(
            "SELECT id, query, status, approved_at, rejected_at, notes, search_count,
                    last_searched_at
             FROM query_approvals WHERE query = ?1",
            [query],
            map_approval,
        )
        .optional()?)
}

fn map_approval(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueryApproval> {
    Ok(QueryApproval {
        id: row.get(0)?,
        query: row.get(1)?,
        status: row.get(2)?,
        approved_at: row.get(3)?,
        rejected_at: row.get(4)?,
        notes: row.get(5)?,
        search_count: row.get(6)?,
        last_searched_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_db;

    #[test]
    fn counter_increments_across_searches() {
        let (_dir, db) = temp_db();
        let conn = db.open().expect("conn");
        update_query_search_count(&conn, "توحید چیست؟").expect("first");
        update_query_search_count(&conn, "توحید چیست؟").expect("second");

        let row = get_approval_by_query(&conn, "توحید چیست؟")
            .expect("get")
            .expect("row");
        assert_eq!(row.search_count, 2);
        assert_eq!(row.status, "approved");
        assert!(row.last_searched_at.is_some());
    }

    #[test]
    fn reject_hides_from_public_listing() {
        let (_dir, db) = temp_db();
        let conn = db.open().expect("conn");
        update_query_search_count(&conn, "سوال الف").expect("count");
        update_query_search_count(&conn, "سوال ب").expect("count");

        let rows = list_query_approvals(&conn, None, 10, 0).expect("list");
        let target = rows.iter().find(|r| r.query == "سوال الف").expect("row");
        assert!(reject_query(&conn, target.id, Some("نامرتبط")).expect("reject"));

        let public = list_approved_public(&conn, 1, 10).expect("public");
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].query, "سوال ب");
    }

    #[test]
    fn approve_is_idempotent() {
        let (_dir, db) = temp_db();
        let conn = db.open().expect("conn");
        update_query_search_count(&conn, "سوال").expect("count");
        let row = get_approval_by_query(&conn, "سوال").expect("get").expect("row");
        assert!(reject_query(&conn, row.id, None).expect("reject"));
        assert!(approve_query(&conn, row.id, None).expect("approve"));
        assert!(approve_query(&conn, row.id, None).expect("approve again"));

        let row = get_approval_by_query(&conn, "سوال").expect("get").expect("row");
        assert_eq!(row.status, "approved");
        assert!(row.approved_at.is_some());
        assert!(row.rejected_at.is_none());
    }

    #[test]
    fn unknown_status_filter_is_invalid() {
        let (_dir, db) = temp_db();
        let conn = db.open().expect("conn");
        let error = list_query_approvals(&conn, Some("archived"), 10, 0).unwrap_err();
        assert!(matches!(error, DbError::InvalidInput(_)));
    }

    #[test]
    fn public_listing_respects_min_count() {
        let (_dir, db) = temp_db();
        let conn = db.open().expect("conn");
        for _ in 0..3 {
            update_query_search_count(&conn, "پرتکرار").expect("count");
        }
        update_query_search_count(&conn, "کم").expect("count");

        let public = list_approved_public(&conn, 2, 10).expect("public");
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].search_count, 3);
    }
}
