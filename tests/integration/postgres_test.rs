//! PostgreSQL integration tests.
//!
//! Skipped unless DATABASE_URL points at a database the tests may create
//! temporary tables in.

use db_tally::config::BackendConfig;
use db_tally::db::{Backend, BackendKind, Backends, Engine, PostgresClient, Value};
use db_tally::error::TallyError;
use db_tally::runner::QueryTemplateRunner;
use db_tally::template::{params, Params, QueryTemplate};
use pretty_assertions::assert_eq;

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Helper to create a test client.
async fn get_test_client() -> Option<PostgresClient> {
    let url = get_test_database_url()?;
    let config = BackendConfig::from_url(Engine::Postgres, &url).ok()?;
    PostgresClient::connect(BackendKind::RowStore, &config).await.ok()
}

#[tokio::test]
async fn test_count_query_returns_bigint() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = client
        .execute_query("SELECT COUNT(*) AS n FROM generate_series(1, 42)")
        .await
        .unwrap();
    assert_eq!(result.column_names(), vec!["n"]);
    assert_eq!(result.scalar_count("n").unwrap(), 42);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_session_directive_applies_to_query() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let backends = Backends::new().with(Box::new(client));

    let mut runner = QueryTemplateRunner::new();
    runner
        .register(
            QueryTemplate::new(
                "work_mem",
                "SELECT current_setting('work_mem') AS work_mem",
                BackendKind::RowStore,
            )
            .unwrap(),
        )
        .unwrap();

    let query = runner.bind("work_mem", &Params::new()).unwrap();
    let result = runner
        .run(&query, &backends, &["SET work_mem = '7MB'".to_string()])
        .await
        .unwrap();
    assert_eq!(
        result.value(0, "work_mem"),
        Some(&Value::String("7MB".to_string()))
    );

    backends.close().await.unwrap();
}

#[tokio::test]
async fn test_numeric_and_date_columns_keep_their_values() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = client
        .execute_query(
            "SELECT SUM(x) AS total, AVG(x) AS mean, \
                    date_trunc('month', TIMESTAMP '2019-11-15 10:30:00') AS month, \
                    DATE '2019-11-01' AS day \
             FROM (VALUES (731900::bigint), (776401::bigint)) v(x)",
        )
        .await
        .unwrap();

    assert_eq!(result.value(0, "total"), Some(&Value::Int(1_508_301)));
    assert_eq!(result.value(0, "mean"), Some(&Value::Float(754_150.5)));
    assert_eq!(
        result.value(0, "month"),
        Some(&Value::String("2019-11-01T00:00:00".to_string()))
    );
    assert_eq!(
        result.value(0, "day"),
        Some(&Value::String("2019-11-01".to_string()))
    );
    assert_eq!(result.scalar_count("total").unwrap(), 1_508_301);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_result_has_columns() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = client
        .execute_query("SELECT 1::bigint AS file_id WHERE false")
        .await
        .unwrap();
    assert!(result.is_empty());
    assert_eq!(result.column_names(), vec!["file_id"]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_syntax_error_is_query_execution() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let backends = Backends::new().with(Box::new(client));

    let mut runner = QueryTemplateRunner::new();
    runner
        .register(
            QueryTemplate::new(
                "missing_table",
                "SELECT COUNT(*) FROM no_such_table_{suffix}",
                BackendKind::RowStore,
            )
            .unwrap(),
        )
        .unwrap();

    let query = runner
        .bind("missing_table", &params([("suffix", "xyz")]))
        .unwrap();
    let err = runner.run(&query, &backends, &[]).await.unwrap_err();
    assert!(matches!(err, TallyError::QueryExecution(_)));
    assert!(err.to_string().contains("missing_table"));
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_with_invalid_port() {
    let config = BackendConfig::from_url(Engine::Postgres, "postgres://tally@127.0.0.1:1/none")
        .unwrap();

    let err = PostgresClient::connect(BackendKind::RowStore, &config)
        .await
        .unwrap_err();
    assert!(
        matches!(err, TallyError::BackendUnavailable(_)),
        "Expected BackendUnavailable, got: {err}"
    );
}
