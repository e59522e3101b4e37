//! Export job tracking.
//!
//! One row per ingest run. Jobs are created `running`, transition to `completed` or
//! `failed` exactly once, and carry the sizing configuration plus the (secret-masked)
//! command line that launched them.

use super::{DbError, now_utc};
use chrono::DateTime;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

/// Parameters captured when an export run starts.
#[derive(Debug, Clone)]
pub struct NewExportJob {
    /// Path of the SQL dump being ingested.
    pub sql_path: String,
    /// Target collection name.
    pub collection: String,
    /// Segments per upsert batch.
    pub batch_size: i64,
    /// Maximum characters per segment.
    pub max_length: i64,
    /// Overlap characters between segments.
    pub context_length: i64,
    /// Chroma host the run writes to.
    pub host: String,
    /// Chroma port the run writes to.
    pub port: i64,
    /// Whether the run used HTTPS.
    pub ssl: bool,
    /// Embedding provider used for the run.
    pub embedding_provider: String,
    /// Embedding model used for the run.
    pub embedding_model: String,
    /// Whether the collection was dropped before writing.
    pub reset: bool,
    /// Masked command-line arguments for later reproduction.
    pub command_line_args: Option<String>,
}

/// Full export job row.
#[derive(Debug, Clone, Serialize)]
pub struct ExportJob {
    /// Row identifier.
    pub id: i64,
    /// Lifecycle status: `pending`, `running`, `completed`, or `failed`.
    pub status: String,
    /// UTC start timestamp.
    pub started_at: String,
    /// UTC completion timestamp on terminal states.
    pub completed_at: Option<String>,
    /// `completed_at - started_at` in seconds on terminal states.
    pub duration_seconds: Option<f64>,
    /// Path of the ingested SQL dump.
    pub sql_path: String,
    /// Collection written to.
    pub collection: String,
    /// Segments per upsert batch.
    pub batch_size: i64,
    /// Maximum characters per segment.
    pub max_length: i64,
    /// Overlap characters between segments.
    pub context_length: i64,
    /// Chroma host.
    pub host: String,
    /// Chroma port.
    pub port: i64,
    /// Whether HTTPS was used.
    pub ssl: bool,
    /// Embedding provider.
    pub embedding_provider: String,
    /// Embedding model.
    pub embedding_model: String,
    /// Whether the collection was reset first.
    pub reset: bool,
    /// Records parsed from the dump.
    pub total_records: Option<i64>,
    /// Distinct books seen.
    pub total_books: Option<i64>,
    /// Segments produced.
    pub total_segments: Option<i64>,
    /// Documents in the collection after the run.
    pub total_documents_in_collection: Option<i64>,
    /// Failure message on `failed` jobs.
    pub error_message: Option<String>,
    /// Masked command-line arguments.
    pub command_line_args: Option<String>,
}

/// Insert a `running` job row. Returns the job id.
pub fn create_export_job(conn: &Connection, job: &NewExportJob) -> Result<i64, DbError> {
    conn.execute(
        "INSERT INTO export_jobs
         (status, started_at, sql_path, collection, batch_size, max_length, context_length,
          host, port, ssl, embedding_provider, embedding_model, reset, command_line_args)
         VALUES ('running', ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            now_utc(),
            job.sql_path,
            job.collection,
            job.batch_size,
            job.max_length,
            job.context_length,
            job.host,
            job.port,
            job.ssl,
            job.embedding_provider,
            job.embedding_model,
            job.reset,
            job.command_line_args,
        ],
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(job_id = id, collection = %job.collection, "Export job started");
    Ok(id)
}

/// Mark a job completed with its final counters.
pub fn complete_export_job(
    conn: &Connection,
    job_id: i64,
    total_records: i64,
    total_books: i64,
    total_segments: i64,
    total_documents_in_collection: Option<i64>,
) -> Result<(), DbError> {
    finish_job(
        conn,
        job_id,
        "completed",
        Some((
            total_records,
            total_books,
            total_segments,
            total_documents_in_collection,
        )),
        None,
    )
}

/// Mark a job failed, recording the error message.
pub fn fail_export_job(conn: &Connection, job_id: i64, error: &str) -> Result<(), DbError> {
    finish_job(conn, job_id, "failed", None, Some(error))
}

fn finish_job(
    conn: &Connection,
    job_id: i64,
    status: &str,
    totals: Option<(i64, i64, i64, Option<i64>)>,
    error: Option<&str>,
) -> Result<(), DbError> {
    let started_at: Option<String> = conn
        .query_row(
            "SELECT started_at FROM export_jobs WHERE id = ?1 AND status = 'running'",
            [job_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(started_at) = started_at else {
        return Err(DbError::InvalidInput(format!(
            "export job {job_id} is not running"
        )));
    };

    let completed_at = now_utc();
    let duration = duration_seconds(&started_at, &completed_at);

    match totals {
        Some((records, books, segments, in_collection)) => {
            conn.execute(
                "UPDATE export_jobs
                 SET status = ?1, completed_at = ?2, duration_seconds = ?3,
                     total_records = ?4, total_books = ?5, total_segments = ?6,
                     total_documents_in_collection = ?7
                 WHERE id = ?8",
                params![
                    status,
                    completed_at,
                    duration,
                    records,
                    books,
                    segments,
                    in_collection,
                    job_id
                ],
            )?;
        }
        None => {
            conn.execute(
                "UPDATE export_jobs
                 SET status = ?1, completed_at = ?2, duration_seconds = ?3, error_message = ?4
                 WHERE id = ?5",
                params![status, completed_at, duration, error, job_id],
            )?;
        }
    }
    tracing::info!(job_id, status, "Export job finished");
    Ok(())
}

fn duration_seconds(started_at: &str, completed_at: &str) -> Option<f64> {
    let start = DateTime::parse_from_rfc3339(started_at).ok()?;
    let end = DateTime::parse_from_rfc3339(completed_at).ok()?;
    Some((end - start).num_microseconds()? as f64 / 1_000_000.0)
}

/// Fetch one job by id.
pub fn get_export_job(conn: &Connection, job_id: i64) -> Result<Option<ExportJob>, DbError> {
    Ok(conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM export_jobs WHERE id = ?1"),
            [job_id],
            map_export_job,
        )
        .optional()?)
}

/// Most recent jobs, newest first.
pub fn list_export_jobs(conn: &Connection, limit: i64) -> Result<Vec<ExportJob>, DbError> {
    let mut statement = conn.prepare(&format!(
        "SELECT {JOB_COLUMNS} FROM export_jobs ORDER BY started_at DESC LIMIT ?1"
    ))?;
    let rows = statement
        .query_map([limit], map_export_job)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete a job row; model rows referencing it keep their copy of the metadata.
pub fn delete_export_job(conn: &Connection, job_id: i64) -> Result<bool, DbError> {
    let affected = conn.execute("DELETE FROM export_jobs WHERE id = ?1", [job_id])?;
    Ok(affected > 0)
}

/// Latest completed job per unique `(provider, model, collection)` triple.
pub fn get_latest_completed_model_jobs(
    conn: &Connection,
    limit: i64,
) -> Result<Vec<ExportJob>, DbError> {
    let mut statement = conn.prepare(&format!(
        "SELECT {JOB_COLUMNS_QUALIFIED} FROM export_jobs j
         JOIN (
             SELECT embedding_provider, embedding_model, collection AS sub_collection,
                    MAX(completed_at) AS max_completed_at
             FROM export_jobs
             WHERE status = 'completed'
             GROUP BY embedding_provider, embedding_model, collection
         ) latest
         ON j.embedding_provider = latest.embedding_provider
            AND j.embedding_model = latest.embedding_model
            AND j.collection = latest.sub_collection
            AND j.completed_at = latest.max_completed_at
         WHERE j.status = 'completed'
         ORDER BY j.completed_at DESC
         LIMIT ?1"
    ))?;
    let rows = statement
        .query_map([limit], map_export_job)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

const JOB_COLUMNS: &str = "id, status, started_at, completed_at, duration_seconds, sql_path, \
                           collection, batch_size, max_length, context_length, host, port, ssl, \
                           embedding_provider, embedding_model, reset, total_records, total_books, \
                           total_segments, total_documents_in_collection, error_message, \
                           command_line_args";

const JOB_COLUMNS_QUALIFIED: &str =
    "j.id, j.status, j.started_at, j.completed_at, j.duration_seconds, j.sql_path, \
     j.collection, j.batch_size, j.max_length, j.context_length, j.host, j.port, j.ssl, \
     j.embedding_provider, j.embedding_model, j.reset, j.total_records, j.total_books, \
     j.total_segments, j.total_documents_in_collection, j.error_message, \
     j.command_line_args";

fn map_export_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExportJob> {
    Ok(ExportJob {
        id: row.get(0)?,
        status: row.get(1)?,
        started_at: row.get(2)?,
        completed_at: row.get(3)?,
        duration_seconds: row.get(4)?,
        sql_path: row.get(5)?,
        collection: row.get(6)?,
        batch_size: row.get(7)?,
        max_length: row.get(8)?,
        context_length: row.get(9)?,
        host: row.get(10)?,
        port: row.get(11)?,
        ssl: row.get(12)?,
        embedding_provider: row.get(13)?,
        embedding_model: row.get(14)?,
        reset: row.get(15)?,
        total_records: row.get(16)?,
        total_books: row.get(17)?,
        total_segments: row.get(18)?,
        total_documents_in_collection: row.get(19)?,
        error_message: row.get(20)?,
        command_line_args: row.get(21)?,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Insert and immediately complete a job for the given model triple.
    pub(crate) fn completed_job(
        conn: &Connection,
        collection: &str,
        provider: &str,
        model: &str,
    ) -> i64 {
        let id = create_export_job(
            conn,
            &NewExportJob {
                sql_path: "test.sql".into(),
                collection: collection.into(),
                batch_size: 32,
                max_length: 256,
                context_length: 128,
                host: "localhost".into(),
                port: 8000,
                ssl: false,
                embedding_provider: provider.into(),
                embedding_model: model.into(),
                reset: false,
                command_line_args: Some(r#"{"test":true}"#.into()),
            },
        )
        .expect("create job");
        complete_export_job(conn, id, 100, 10, 500, Some(500)).expect("complete job");
        id
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::completed_job;
    use super::*;
    use crate::db::test_support::temp_db;

    #[test]
    fn completed_job_duration_matches_timestamps() {
        let (_dir, db) = temp_db();
        let conn = db.open().expect("conn");
        let id = completed_job(&conn, "book_pages", "openai", "text-embedding-3-small");

        let job = get_export_job(&conn, id).expect("get").expect("job");
        assert_eq!(job.status, "completed");
        let started = DateTime::parse_from_rfc3339(&job.started_at).expect("start");
        let completed =
            DateTime::parse_from_rfc3339(job.completed_at.as_deref().expect("completed_at"))
                .expect("end");
        let elapsed = (completed - started).num_microseconds().unwrap() as f64 / 1_000_000.0;
        let recorded = job.duration_seconds.expect("duration");
        assert!((elapsed - recorded).abs() < 0.001);
        assert_eq!(job.total_segments, Some(500));
    }

    #[test]
    fn jobs_cannot_finish_twice() {
        let (_dir, db) = temp_db();
        let conn = db.open().expect("conn");
        let id = completed_job(&conn, "book_pages", "openai", "m1");
        let error = fail_export_job(&conn, id, "boom").unwrap_err();
        assert!(matches!(error, DbError::InvalidInput(_)));
    }

    #[test]
    fn latest_completed_jobs_collapse_to_unique_triples() {
        let (_dir, db) = temp_db();
        let conn = db.open().expect("conn");
        completed_job(&conn, "col_a", "openai", "m1");
        completed_job(&conn, "col_a", "openai", "m1");
        completed_job(&conn, "col_b", "gemini", "m2");

        let latest = get_latest_completed_model_jobs(&conn, 10).expect("latest");
        assert_eq!(latest.len(), 2);
    }

    #[test]
    fn failed_jobs_record_the_error() {
        let (_dir, db) = temp_db();
        let conn = db.open().expect("conn");
        let id = create_export_job(
            &conn,
            &NewExportJob {
                sql_path: "broken.sql".into(),
                collection: "c".into(),
                batch_size: 8,
                max_length: 200,
                context_length: 100,
                host: "localhost".into(),
                port: 8000,
                ssl: false,
                embedding_provider: "none".into(),
                embedding_model: "-".into(),
                reset: false,
                command_line_args: None,
            },
        )
        .expect("create");
        fail_export_job(&conn, id, "embedding provider unavailable").expect("fail");

        let job = get_export_job(&conn, id).expect("get").expect("job");
        assert_eq!(job.status, "failed");
        assert_eq!(
            job.error_message.as_deref(),
            Some("embedding provider unavailable")
        );
        assert!(job.duration_seconds.is_some());
    }
}
