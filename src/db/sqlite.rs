//! SQLite row-store client.
//!
//! Mostly used for local fixture databases: a small extract of the
//! warehouse tables is enough to exercise a template end to end.

use crate::config::BackendConfig;
use crate::db::{Backend, BackendKind, ColumnInfo, Engine, QueryResult, Row, Value};
use crate::error::{Result, TallyError};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as SqlxColumn, Executor, Row as SqlxRow, Statement, TypeInfo, ValueRef};
use std::time::{Duration, Instant};
use tracing::debug;

/// SQLite database client.
#[derive(Debug)]
pub struct SqliteClient {
    kind: BackendKind,
    pool: SqlitePool,
    timeout: Duration,
}

impl SqliteClient {
    /// Opens the database described by `config`.
    pub async fn connect(kind: BackendKind, config: &BackendConfig) -> Result<Self> {
        let conn_str = config.connection_url()?;
        debug!("Opening {}", conn_str);

        // An in-memory database exists per connection, so fixtures only stay
        // visible with a single pooled connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&conn_str)
            .await
            .map_err(|e| TallyError::unavailable(format!("Cannot open {conn_str}: {e}")))?;

        Ok(Self {
            kind,
            pool,
            timeout: config.timeout(kind),
        })
    }

    /// Creates a SqliteClient from an existing pool.
    pub fn from_pool(kind: BackendKind, pool: SqlitePool) -> Self {
        Self {
            kind,
            pool,
            timeout: Duration::from_secs(30),
        }
    }

    /// Returns the underlying pool, for loading fixtures.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_on_connection(&self, statements: &[String]) -> Result<QueryResult> {
        let (query, directives) = statements
            .split_last()
            .ok_or_else(|| TallyError::internal("no statements to execute"))?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| TallyError::unavailable(format!("Failed to acquire connection: {e}")))?;

        for directive in directives {
            debug!("Executing directive: {}", directive);
            (&mut *conn)
                .execute(sqlx::raw_sql(directive))
                .await
                .map_err(|e| TallyError::query(e.to_string()))?;
        }

        fetch_result(&mut conn, query).await
    }
}

#[async_trait]
impl Backend for SqliteClient {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        self.execute_statements(&[sql.to_string()]).await
    }

    async fn execute_statements(&self, statements: &[String]) -> Result<QueryResult> {
        tokio::time::timeout(self.timeout, self.run_on_connection(statements))
            .await
            .map_err(|_| {
                TallyError::query(format!(
                    "Query timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            })?
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

async fn fetch_result(conn: &mut SqliteConnection, sql: &str) -> Result<QueryResult> {
    let start = Instant::now();

    let result = sqlx::query(sql)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| TallyError::query(e.to_string()))?;

    let execution_time = start.elapsed();

    let columns: Vec<ColumnInfo> = if let Some(first_row) = result.first() {
        first_row
            .columns()
            .iter()
            .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
            .collect()
    } else {
        let statement = (&mut *conn)
            .prepare(sql)
            .await
            .map_err(|e| TallyError::query(e.to_string()))?;
        statement
            .columns()
            .iter()
            .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
            .collect()
    };

    let rows = result.iter().map(convert_row).collect::<Result<Vec<Row>>>()?;

    Ok(QueryResult::with_data(columns, rows).with_execution_time(execution_time))
}

fn convert_row(row: &SqliteRow) -> Result<Row> {
    (0..row.columns().len())
        .map(|i| convert_value(row, i))
        .collect()
}

/// Converts one value using its storage class. Declared column types are
/// unreliable for expressions such as `COUNT(*)`, so the runtime type of the
/// value decides.
fn convert_value(row: &SqliteRow, index: usize) -> Result<Value> {
    let raw = row.try_get_raw(index).map_err(|e| decode_error(index, e))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_uppercase();

    let value = match storage.as_str() {
        "INTEGER" => row.try_get::<i64, _>(index).map(Value::Int),
        "REAL" => row.try_get::<f64, _>(index).map(Value::Float),
        "BLOB" => row.try_get::<Vec<u8>, _>(index).map(Value::Bytes),
        _ => row.try_get::<String, _>(index).map(Value::String),
    };
    value.map_err(|e| decode_error(index, e))
}

fn decode_error(index: usize, error: sqlx::Error) -> TallyError {
    TallyError::query(format!("Cannot decode column {index}: {error}"))
}
