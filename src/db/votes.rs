//! Guest vote persistence.
//!
//! One vote per `(guest_user_id, query, model_id, result_id)` tuple; re-voting replaces the
//! previous row (delete-then-insert), so the latest vote always wins.

use super::{DbError, now_utc};
use rusqlite::{Connection, params};
use serde::Serialize;

/// Stored vote row.
#[derive(Debug, Clone, Serialize)]
pub struct SearchVote {
    /// Row identifier.
    pub id: i64,
    /// Anonymous guest identifier.
    pub guest_user_id: String,
    /// Query the vote refers to.
    pub query: String,
    /// Optional model scope.
    pub model_id: Option<i64>,
    /// Optional result document scope.
    pub result_id: Option<String>,
    /// `like` or `dislike`.
    pub vote_type: String,
    /// Vote timestamp.
    pub created_at: String,
}

/// Like/dislike counters for a `(query, model)` scope.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VoteStats {
    /// Number of like votes.
    pub likes: i64,
    /// Number of dislike votes.
    pub dislikes: i64,
}

/// Aggregated per-query summary row for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct VoteSummaryRow {
    /// Query text.
    pub query: String,
    /// Model the votes are scoped to, when any.
    pub model_id: Option<i64>,
    /// Number of like votes.
    pub likes: i64,
    /// Number of dislike votes.
    pub dislikes: i64,
    /// Timestamp of the most recent vote.
    pub last_vote_at: String,
}

/// Record a vote, replacing any previous vote for the same tuple.
pub fn save_search_vote(
    conn: &mut Connection,
    guest_user_id: &str,
    query: &str,
    vote_type: &str,
    model_id: Option<i64>,
    result_id: Option<&str>,
) -> Result<(), DbError> {
    if !matches!(vote_type, "like" | "dislike") {
        return Err(DbError::InvalidInput(format!(
            "unknown vote type '{vote_type}'"
        )));
    }

    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM search_votes
         WHERE guest_user_id = ?1 AND query = ?2
           AND COALESCE(model_id, -1) = COALESCE(?3, -1)
           AND COALESCE(result_id, '') = COALESCE(?4, '')",
        params![guest_user_id, query, model_id, result_id],
    )?;
    tx.execute(
        "INSERT INTO search_votes (guest_user_id, query, model_id, result_id, vote_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![guest_user_id, query, model_id, result_id, vote_type, now_utc()],
    )?;
    tx.commit()?;
    tracing::debug!(query, vote_type, "Vote recorded");
    Ok(())
}

/// Count likes and dislikes for a query, optionally scoped to a model.
pub fn get_vote_stats(
    conn: &Connection,
    query: &str,
    model_id: Option<i64>,
) -> Result<VoteStats, DbError> {
    let (likes, dislikes) = conn.query_row(
        "SELECT
             COALESCE(SUM(CASE WHEN vote_type = 'like' THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN vote_type = 'dislike' THEN 1 ELSE 0 END), 0)
         FROM search_votes
         WHERE query = ?1 AND COALESCE(model_id, -1) = COALESCE(?2, -1)",
        params![query, model_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(VoteStats { likes, dislikes })
}

/// List raw votes, optionally filtered by query and model scope.
pub fn get_search_votes(
    conn: &Connection,
    limit: i64,
    query: Option<&str>,
    model_id: Option<i64>,
) -> Result<Vec<SearchVote>, DbError> {
    let mut statement = conn.prepare(
        "SELECT id, guest_user_id, query, model_id, result_id, vote_type, created_at
         FROM search_votes
         WHERE (?1 IS NULL OR query = ?1)
           AND (?2 IS NULL OR COALESCE(model_id, -1) = ?2)
         ORDER BY created_at DESC
         LIMIT ?3",
    )?;
    let rows = statement
        .query_map(params![query, model_id, limit], |row| {
            Ok(SearchVote {
                id: row.get(0)?,
                guest_user_id: row.get(1)?,
                query: row.get(2)?,
                model_id: row.get(3)?,
                result_id: row.get(4)?,
                vote_type: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Aggregate votes per `(query, model)` for the admin overview, busiest first.
pub fn get_vote_summary(conn: &Connection, limit: i64) -> Result<Vec<VoteSummaryRow>, DbError> {
    let mut statement = conn.prepare(
        "SELECT query, model_id,
                COALESCE(SUM(CASE WHEN vote_type = 'like' THEN 1 ELSE 0 END), 0) AS likes,
                COALESCE(SUM(CASE WHEN vote_type = 'dislike' THEN 1 ELSE 0 END), 0) AS dislikes,
                MAX(created_at) AS last_vote_at
         FROM search_votes
         GROUP BY query, model_id
         ORDER BY likes + dislikes DESC, last_vote_at DESC
         LIMIT ?1",
    )?;
    let rows = statement
        .query_map([limit], |row| {
            Ok(VoteSummaryRow {
                query: row.get(0)?,
                model_id: row.get(1)?,
                likes: row.get(2)?,
                dislikes: row.get(3)?,
                last_vote_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_db;

    #[test]
    fn latest_vote_wins() {
        let (_dir, db) = temp_db();
        let mut conn = db.open().expect("conn");
        save_search_vote(&mut conn, "guest-123", "تست رای", "like", None, Some("doc-1"))
            .expect("like");
        let stats = get_vote_stats(&conn, "تست رای", None).expect("stats");
        assert_eq!(stats.likes, 1);
        assert_eq!(stats.dislikes, 0);

        save_search_vote(&mut conn, "guest-123", "تست رای", "dislike", None, Some("doc-1"))
            .expect("dislike");
        let stats = get_vote_stats(&conn, "تست رای", None).expect("stats");
        assert_eq!(stats.likes, 0);
        assert_eq!(stats.dislikes, 1);

        let votes = get_search_votes(&conn, 10, Some("تست رای"), None).expect("votes");
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].vote_type, "dislike");

        let summary = get_vote_summary(&conn, 10).expect("summary");
        assert_eq!(summary[0].dislikes, 1);
    }

    #[test]
    fn votes_are_scoped_by_model_and_result() {
        let (_dir, db) = temp_db();
        let mut conn = db.open().expect("conn");
        save_search_vote(&mut conn, "guest-123", "سوال", "like", None, Some("doc-1"))
            .expect("vote");
        save_search_vote(&mut conn, "guest-123", "سوال", "like", None, Some("doc-2"))
            .expect("vote");

        let stats = get_vote_stats(&conn, "سوال", None).expect("stats");
        assert_eq!(stats.likes, 2);
    }

    #[test]
    fn unknown_vote_type_is_rejected() {
        let (_dir, db) = temp_db();
        let mut conn = db.open().expect("conn");
        let error =
            save_search_vote(&mut conn, "guest-123", "سوال", "meh", None, None).unwrap_err();
        assert!(matches!(error, DbError::InvalidInput(_)));
    }
}
