//! Runner integration tests against SQLite fixtures.

use db_tally::aggregate::{overlap, SetCount};
use db_tally::db::{BackendKind, Backends, Value};
use db_tally::error::TallyError;
use db_tally::periods::monthly_windows;
use db_tally::runner::{QueryTemplateRunner, RunOptions};
use db_tally::template::{params, Params, QueryTemplate};
use pretty_assertions::assert_eq;

use super::common::{sqlite_fixture, TEMPLATELINKS_FIXTURE, TEMPLATE_COUNT_SQL};

fn runner_with(templates: Vec<QueryTemplate>) -> QueryTemplateRunner {
    let mut runner = QueryTemplateRunner::new();
    for template in templates {
        runner.register(template).unwrap();
    }
    runner
}

async fn row_store() -> Backends {
    Backends::new().with(Box::new(
        sqlite_fixture(BackendKind::RowStore, TEMPLATELINKS_FIXTURE).await,
    ))
}

#[tokio::test]
async fn test_template_count_counts_distinct_files() {
    let runner = runner_with(vec![QueryTemplate::new(
        "template_count_query",
        TEMPLATE_COUNT_SQL,
        BackendKind::RowStore,
    )
    .unwrap()]);
    let backends = row_store().await;

    let query = runner
        .bind(
            "template_count_query",
            &params([("template_title", "Information")]),
        )
        .unwrap();
    let result = runner.run(&query, &backends, &[]).await.unwrap();

    assert_eq!(result.column_names(), vec!["num_files"]);
    assert_eq!(result.row_count(), 1);
    assert_eq!(result.scalar_count("num_files").unwrap(), 3);
}

#[tokio::test]
async fn test_quoted_title_is_not_injection() {
    let runner = runner_with(vec![QueryTemplate::new(
        "template_count_query",
        TEMPLATE_COUNT_SQL,
        BackendKind::RowStore,
    )
    .unwrap()]);
    let backends = row_store().await;

    let query = runner
        .bind(
            "template_count_query",
            &params([("template_title", "Information' OR '1'='1")]),
        )
        .unwrap();
    let result = runner.run(&query, &backends, &[]).await.unwrap();

    assert_eq!(result.scalar_count("num_files").unwrap(), 0);
}

#[tokio::test]
async fn test_empty_result_keeps_columns() {
    let runner = runner_with(vec![QueryTemplate::new(
        "files_by_title",
        "SELECT tl_from AS file_id FROM templatelinks JOIN linktarget ON tl_target_id = lt_id \
         WHERE lt_title = '{template_title}'",
        BackendKind::RowStore,
    )
    .unwrap()]);
    let backends = row_store().await;

    let query = runner
        .bind("files_by_title", &params([("template_title", "Nonexistent")]))
        .unwrap();
    let result = runner.run(&query, &backends, &[]).await.unwrap();

    assert!(result.is_empty());
    assert_eq!(result.column_names(), vec!["file_id"]);

    let err = result.scalar_count("file_id").unwrap_err();
    assert!(matches!(err, TallyError::NoResultRow(_)));
}

#[tokio::test]
async fn test_pre_statements_run_on_the_query_session() {
    let runner = runner_with(vec![QueryTemplate::new(
        "cache_size",
        "SELECT cache_size FROM pragma_cache_size()",
        BackendKind::RowStore,
    )
    .unwrap()]);
    let backends = row_store().await;
    let query = runner.bind("cache_size", &Params::new()).unwrap();

    let result = runner
        .run(&query, &backends, &["PRAGMA cache_size = 1234".to_string()])
        .await
        .unwrap();

    assert_eq!(result.value(0, "cache_size"), Some(&Value::Int(1234)));
}

#[tokio::test]
async fn test_mutating_template_is_refused() {
    let runner = runner_with(vec![QueryTemplate::new(
        "cleanup",
        "DELETE FROM templatelinks WHERE tl_from = {file_id}",
        BackendKind::RowStore,
    )
    .unwrap()]);
    let backends = row_store().await;

    let query = runner.bind("cleanup", &params([("file_id", 100_i64)])).unwrap();
    let err = runner.run(&query, &backends, &[]).await.unwrap_err();
    assert!(matches!(err, TallyError::QueryExecution(_)));
    assert!(err.to_string().contains("template 'cleanup'"));

    // The fixture is untouched.
    let count_runner = runner_with(vec![QueryTemplate::new(
        "template_count_query",
        TEMPLATE_COUNT_SQL,
        BackendKind::RowStore,
    )
    .unwrap()]);
    let query = count_runner
        .bind(
            "template_count_query",
            &params([("template_title", "Information")]),
        )
        .unwrap();
    let result = count_runner.run(&query, &backends, &[]).await.unwrap();
    assert_eq!(result.scalar_count("num_files").unwrap(), 3);
}

#[tokio::test]
async fn test_sql_error_names_the_template() {
    let runner = runner_with(vec![QueryTemplate::new(
        "broken",
        "SELECT missing_column FROM templatelinks WHERE tl_from = {file_id}",
        BackendKind::RowStore,
    )
    .unwrap()]);
    let backends = row_store().await;

    let query = runner.bind("broken", &params([("file_id", 100_i64)])).unwrap();
    let err = runner.run(&query, &backends, &[]).await.unwrap_err();

    assert!(matches!(err, TallyError::QueryExecution(_)));
    let message = err.to_string();
    assert!(message.contains("template 'broken'"), "{message}");
    assert!(message.contains("file_id=100"), "{message}");
}

#[tokio::test]
async fn test_batch_store_template_without_batch_store() {
    let runner = runner_with(vec![QueryTemplate::new(
        "caption_edits",
        "SELECT COUNT(*) AS edits FROM mediawiki_history WHERE snapshot = '{snapshot}'",
        BackendKind::BatchStore,
    )
    .unwrap()]);
    let backends = row_store().await;

    let query = runner
        .bind("caption_edits", &params([("snapshot", "2019-11")]))
        .unwrap();
    let err = runner.run(&query, &backends, &[]).await.unwrap_err();
    assert!(matches!(err, TallyError::BackendUnavailable(_)));
}

const EDITS_FIXTURE: &str = "
    CREATE TABLE mediawiki_history (snapshot TEXT, event_timestamp TEXT, page_id INTEGER);
    INSERT INTO mediawiki_history VALUES
        ('2019-11', '2019-01-03 10:00:00', 1),
        ('2019-11', '2019-01-31 23:59:59', 2),
        ('2019-11', '2019-02-01 00:00:00', 3),
        ('2019-11', '2019-03-15 08:30:00', 4),
        ('2019-10', '2019-01-10 12:00:00', 5);
";

#[tokio::test]
async fn test_monthly_series_uses_half_open_windows() {
    let runner = runner_with(vec![QueryTemplate::new(
        "caption_edits",
        "SELECT COUNT(*) AS edits FROM mediawiki_history \
         WHERE snapshot = '{snapshot}' \
         AND event_timestamp >= '{start_date}' AND event_timestamp < '{end_date}'",
        BackendKind::BatchStore,
    )
    .unwrap()]);
    let backends =
        Backends::new().with(Box::new(sqlite_fixture(BackendKind::BatchStore, EDITS_FIXTURE).await));

    let windows = monthly_windows(
        chrono::NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
        chrono::NaiveDate::from_ymd_opt(2019, 4, 1).unwrap(),
    )
    .unwrap();
    let series = runner
        .run_series(
            "caption_edits",
            &params([("snapshot", "2019-11")]),
            &windows,
            &backends,
            &[],
            RunOptions::default(),
        )
        .await
        .unwrap();

    let counts: Vec<(String, u64)> = series
        .iter()
        .map(|(window, result)| {
            (window.label(), result.scalar_count("edits").unwrap())
        })
        .collect();
    assert_eq!(
        counts,
        vec![
            ("2019-01".to_string(), 2),
            ("2019-02".to_string(), 1),
            ("2019-03".to_string(), 1),
        ]
    );
}

const CAPTIONS_FIXTURE: &str = "
    CREATE TABLE captions (snapshot TEXT, file_id INTEGER, lang TEXT);
    INSERT INTO captions VALUES
        ('2019-11', 1, 'en'), ('2019-11', 1, 'de'),
        ('2019-11', 2, 'en'),
        ('2019-11', 3, 'fr'), ('2019-11', 3, 'es'),
        ('2019-11', 4, 'en'), ('2019-11', 4, 'ja'),
        ('2019-10', 5, 'de');
";

#[tokio::test]
async fn test_overlap_from_measured_counts() {
    let runner = runner_with(vec![
        QueryTemplate::new(
            "english_captions",
            "SELECT COUNT(DISTINCT file_id) AS n FROM captions \
             WHERE snapshot = '{snapshot}' AND lang = 'en'",
            BackendKind::RowStore,
        )
        .unwrap(),
        QueryTemplate::new(
            "other_captions",
            "SELECT COUNT(DISTINCT file_id) AS n FROM captions \
             WHERE snapshot = '{snapshot}' AND lang <> 'en'",
            BackendKind::RowStore,
        )
        .unwrap(),
        QueryTemplate::new(
            "any_caption",
            "SELECT COUNT(DISTINCT file_id) AS n FROM captions WHERE snapshot = '{snapshot}'",
            BackendKind::RowStore,
        )
        .unwrap(),
    ]);
    let backends =
        Backends::new().with(Box::new(sqlite_fixture(BackendKind::RowStore, CAPTIONS_FIXTURE).await));
    let scope = params([("snapshot", "2019-11")]);

    let mut counts = Vec::new();
    for name in ["english_captions", "other_captions", "any_caption"] {
        let query = runner.bind(name, &scope).unwrap();
        let result = runner.run(&query, &backends, &[]).await.unwrap();
        counts.push(SetCount::from_result(&query, &result, "n", &["snapshot"]).unwrap());
    }

    // Files 1 and 4 have both an English and a non-English caption.
    assert_eq!(overlap(&counts[0], &counts[1], &counts[2]).unwrap(), 2);
}

#[tokio::test]
async fn test_rerun_yields_identical_result() {
    let runner = runner_with(vec![QueryTemplate::new(
        "files_by_title",
        "SELECT DISTINCT tl_from AS file_id FROM templatelinks \
         JOIN linktarget ON tl_target_id = lt_id \
         WHERE lt_title = '{template_title}' ORDER BY file_id",
        BackendKind::RowStore,
    )
    .unwrap()]);
    let backends = row_store().await;
    let query = runner
        .bind("files_by_title", &params([("template_title", "Information")]))
        .unwrap();

    let first = runner.run(&query, &backends, &[]).await.unwrap();
    let second = runner.run(&query, &backends, &[]).await.unwrap();

    assert_eq!(first.columns, second.columns);
    assert_eq!(first.rows, second.rows);
    assert_eq!(first.row_count(), 4);
}
