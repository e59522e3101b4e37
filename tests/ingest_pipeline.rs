//! End-to-end export test: mini SQL dump in, published segments and a completed job out.

mod common;

use httpmock::{Method::DELETE, Method::GET, Method::POST, MockServer};
use ketabsearch::chroma::ChromaClient;
use ketabsearch::config::EmbeddingProvider;
use ketabsearch::db::{self, Database};
use ketabsearch::embedding::Embedder;
use ketabsearch::ingest::exporter::{ExportConfig, mask_secret_args, run_export};
use ketabsearch::ingest::segments::SegmentConfig;
use serde_json::json;
use std::sync::Arc;

const MINI_DUMP: &str = concat!(
    "-- MySQL dump fragment\n",
    "INSERT INTO `books` VALUES (1,'ignored');\n",
    "INSERT INTO `book_pages` VALUES (1,3,'آموزش عقاید',1,'درس اول',7,",
    "'<h2>درس اول</h2><p>انسان کمال جو است و باید با عقل رفتار کند.\\n",
    "پرسش اصلی این است که چرا باید دین را جست\\u200cوجو کرد و ",
    "چه شرطی برای انسان زیستن لازم است.</p>','https://example.org/7','');\n",
    "INSERT INTO `book_pages` VALUES (2,3,'آموزش عقاید',1,'درس اول',8,",
    "'<p>مقدمه کوتاه درباره ضرورت پی\\u200cجویی دین و ادامه بحث در صفحه بعد ",
    "با توضیح کامل درباره شرط انسان زیستن.</p>','https://example.org/8','');\n",
);

fn write_dump(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("books_mini.sql");
    std::fs::write(&path, MINI_DUMP).expect("write dump");
    path
}

fn export_config(sql_path: std::path::PathBuf, collection: &str, reset: bool) -> ExportConfig {
    ExportConfig {
        sql_path,
        collection: collection.into(),
        batch_size: 4,
        segmenting: SegmentConfig {
            max_length: 80,
            context_length: 20,
            min_paragraph_lines: 2,
            include_page_level: true,
            ..SegmentConfig::default()
        },
        reset,
        provider: EmbeddingProvider::None,
        model: "collection-side".into(),
        command_line_args: Some(mask_secret_args(
            &[
                "export-pages".to_string(),
                "--collection".to_string(),
                collection.to_string(),
                "--api-key".to_string(),
                "chroma-secret".to_string(),
            ],
        )),
    }
}

#[tokio::test]
async fn export_publishes_segments_and_completes_the_job() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/api/v1/collections/books_test");
        then.status(404).body("not found");
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/v1/collections");
        then.status(200).json_body(json!([]));
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/v1/collections");
        then.status(200)
            .json_body(json!({ "id": "c-books", "name": "books_test" }));
    });
    let add_mock = server.mock(|when, then| {
        when.method(POST).path("/api/v1/collections/c-books/add");
        then.status(200).json_body(json!(true));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/v1/collections/c-books/count");
        then.status(200).json_body(json!(9));
    });

    let dir = tempfile::tempdir().expect("tempdir");
    let sql_path = write_dump(&dir);
    let db = Database::new(dir.path().join("search_history.db"));
    db.init_schema().expect("schema");
    let chroma = ChromaClient::new(&server.base_url(), None).expect("chroma");
    let settings = common::test_settings(false);

    let outcome = run_export(
        &settings,
        export_config(sql_path, "books_test", false),
        &db,
        &chroma,
        Arc::new(Embedder::None),
    )
    .await
    .expect("export");

    assert_eq!(outcome.total_records, 2);
    assert_eq!(outcome.total_books, 1);
    assert!(outcome.total_segments > 0);
    assert_eq!(outcome.total_documents_in_collection, Some(9));
    assert!(add_mock.hits() >= 1);

    let conn = db.open().expect("conn");
    let job = db::get_export_job(&conn, outcome.job_id)
        .expect("job query")
        .expect("job row");
    assert_eq!(job.status, "completed");
    assert_eq!(job.total_records, Some(2));
    assert_eq!(job.total_segments, Some(outcome.total_segments));
    assert!(job.duration_seconds.is_some());
    let recorded_args = job.command_line_args.expect("args");
    assert!(!recorded_args.contains("chroma-secret"));
    assert!(recorded_args.contains("***"));

    // A completed job makes the model triple available to the registry.
    drop(conn);
    let mut conn = db.open().expect("conn");
    db::sync_embedding_models_from_jobs(&mut conn, 10).expect("sync");
    let models = db::list_embedding_models(&conn, true, 10).expect("models");
    assert!(
        models
            .iter()
            .any(|m| m.collection == "books_test" && m.embedding_provider == "none")
    );
}

#[tokio::test]
async fn existing_collection_diverts_to_timestamped_variant() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/api/v1/collections/books_live");
        then.status(200)
            .json_body(json!({ "id": "c-live", "name": "books_live" }));
    });
    let create_mock = server.mock(|when, then| {
        when.method(POST).path("/api/v1/collections");
        then.status(200)
            .json_body(json!({ "id": "c-suffixed", "name": "books_live_20240101_000000" }));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/collections/c-suffixed/add");
        then.status(200).json_body(json!(true));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/collections/c-suffixed/count");
        then.status(200).json_body(json!(5));
    });

    let dir = tempfile::tempdir().expect("tempdir");
    let sql_path = write_dump(&dir);
    let db = Database::new(dir.path().join("search_history.db"));
    db.init_schema().expect("schema");
    let chroma = ChromaClient::new(&server.base_url(), None).expect("chroma");
    let settings = common::test_settings(false);

    let outcome = run_export(
        &settings,
        export_config(sql_path, "books_live", false),
        &db,
        &chroma,
        Arc::new(Embedder::None),
    )
    .await
    .expect("export");

    create_mock.assert();
    assert!(outcome.collection.starts_with("books_live_"));
    assert_ne!(outcome.collection, "books_live");
}

#[tokio::test]
async fn reset_drops_the_collection_before_writing() {
    let server = MockServer::start_async().await;
    let delete_mock = server.mock(|when, then| {
        when.method(DELETE).path("/api/v1/collections/books_reset");
        then.status(200).json_body(json!(true));
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/v1/collections");
        then.status(200)
            .json_body(json!({ "id": "c-reset", "name": "books_reset" }));
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/v1/collections/c-reset/add");
        then.status(200).json_body(json!(true));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/v1/collections/c-reset/count");
        then.status(200).json_body(json!(5));
    });

    let dir = tempfile::tempdir().expect("tempdir");
    let sql_path = write_dump(&dir);
    let db = Database::new(dir.path().join("search_history.db"));
    db.init_schema().expect("schema");
    let chroma = ChromaClient::new(&server.base_url(), None).expect("chroma");
    let settings = common::test_settings(false);

    run_export(
        &settings,
        export_config(sql_path, "books_reset", true),
        &db,
        &chroma,
        Arc::new(Embedder::None),
    )
    .await
    .expect("export");

    delete_mock.assert();
}

#[tokio::test]
async fn failed_batches_mark_the_job_failed() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/api/v1/collections/books_fail");
        then.status(404).body("not found");
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/v1/collections");
        then.status(200).json_body(json!([]));
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/v1/collections");
        then.status(200)
            .json_body(json!({ "id": "c-fail", "name": "books_fail" }));
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/v1/collections/c-fail/add");
        then.status(503).body("store unavailable");
    });

    let dir = tempfile::tempdir().expect("tempdir");
    let sql_path = write_dump(&dir);
    let db = Database::new(dir.path().join("search_history.db"));
    db.init_schema().expect("schema");
    let chroma = ChromaClient::new(&server.base_url(), None).expect("chroma");
    let settings = common::test_settings(false);

    let error = run_export(
        &settings,
        export_config(sql_path, "books_fail", false),
        &db,
        &chroma,
        Arc::new(Embedder::None),
    )
    .await
    .expect_err("export must fail");
    assert!(error.to_string().contains("503"));

    let conn = db.open().expect("conn");
    let jobs = db::list_export_jobs(&conn, 10).expect("jobs");
    assert_eq!(jobs[0].status, "failed");
    assert!(
        jobs[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("store unavailable")
    );
}
