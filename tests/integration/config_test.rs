//! Config-driven runs against a SQLite fixture file.

use db_tally::config::Config;
use db_tally::db::BackendKind;
use db_tally::template::params;
use pretty_assertions::assert_eq;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::io::Write;

use super::common::TEMPLATELINKS_FIXTURE;

async fn write_fixture_db(path: &std::path::Path) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::raw_sql(TEMPLATELINKS_FIXTURE)
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;
}

#[tokio::test]
async fn test_run_template_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("commonswiki.db");
    write_fixture_db(&db_path).await;

    let config_path = dir.path().join("config.toml");
    let mut file = std::fs::File::create(&config_path).unwrap();
    write!(
        file,
        r#"
[backends.row_store]
engine = "sqlite"
url = "sqlite://{}"
pre_statements = ["PRAGMA query_only = 1"]

[[templates]]
name = "template_count_query"
description = "Files transcluding a template"
text = """
SELECT COUNT(DISTINCT tl_from) AS num_files
FROM templatelinks JOIN linktarget ON tl_target_id = lt_id
WHERE lt_namespace = 10 AND lt_title = '{{template_title}}'
"""
"#,
        db_path.display()
    )
    .unwrap();
    drop(file);

    let config = Config::load_from_file(&config_path).unwrap();
    let runner = config.build_runner().unwrap();
    let backends = config.connect_backend(BackendKind::RowStore).await.unwrap();

    let template = runner.template("template_count_query").unwrap();
    assert_eq!(template.backend(), BackendKind::RowStore);
    assert_eq!(template.description(), Some("Files transcluding a template"));

    let query = runner
        .bind("template_count_query", &params([("template_title", "Artwork")]))
        .unwrap();
    let result = runner
        .run(&query, &backends, config.pre_statements(BackendKind::RowStore))
        .await
        .unwrap();
    assert_eq!(result.scalar_count("num_files").unwrap(), 1);

    backends.close().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_template_in_config() {
    let config = Config::parse_toml(
        r#"
[[templates]]
name = "counts"
text = "SELECT 1"

[[templates]]
name = "counts"
text = "SELECT 2"
"#,
        std::path::Path::new("inline.toml"),
    )
    .unwrap();

    let err = config.build_runner().unwrap_err();
    assert!(matches!(
        err,
        db_tally::error::TallyError::DuplicateTemplate(ref name) if name == "counts"
    ));
}

#[tokio::test]
async fn test_missing_sqlite_file_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::parse_toml(
        &format!(
            "[backends.row_store]\nengine = \"sqlite\"\nurl = \"sqlite://{}\"\n",
            dir.path().join("absent.db").display()
        ),
        std::path::Path::new("inline.toml"),
    )
    .unwrap();

    let err = config.connect_backend(BackendKind::RowStore).await.err().unwrap();
    assert!(matches!(err, db_tally::error::TallyError::BackendUnavailable(_)));
}

#[tokio::test]
async fn test_batch_run_ignores_unreachable_row_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::parse_toml(
        &format!(
            r#"
[backends.row_store]
engine = "sqlite"
url = "sqlite://{}"

[backends.batch_store]
engine = "mock"

[[templates]]
name = "caption_edits"
backend = "batch_store"
text = "SELECT COUNT(*) AS edits FROM mediawiki_history WHERE snapshot = '{{snapshot}}'"
"#,
            dir.path().join("absent.db").display()
        ),
        std::path::Path::new("inline.toml"),
    )
    .unwrap();
    let runner = config.build_runner().unwrap();

    let kind = runner.template("caption_edits").unwrap().backend();
    assert_eq!(kind, BackendKind::BatchStore);
    let backends = config.connect_backend(kind).await.unwrap();

    let query = runner
        .bind("caption_edits", &params([("snapshot", "2019-11")]))
        .unwrap();
    let result = runner.run(&query, &backends, &[]).await.unwrap();
    assert_eq!(result.row_count(), 1);

    // The row store itself is still unusable.
    let err = config
        .connect_backend(BackendKind::RowStore)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, db_tally::error::TallyError::BackendUnavailable(_)));
}

#[tokio::test]
async fn test_unconfigured_backend_is_reported_at_run() {
    let config = Config::parse_toml(
        r#"
[[templates]]
name = "counts"
text = "SELECT 1 AS n"
"#,
        std::path::Path::new("inline.toml"),
    )
    .unwrap();
    let runner = config.build_runner().unwrap();
    let backends = config.connect_backend(BackendKind::RowStore).await.unwrap();

    let query = runner.bind("counts", &db_tally::template::Params::new()).unwrap();
    let err = runner.run(&query, &backends, &[]).await.unwrap_err();
    assert!(matches!(err, db_tally::error::TallyError::BackendUnavailable(_)));
}
