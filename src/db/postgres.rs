//! PostgreSQL row-store client.
//!
//! Provides the `PostgresClient` struct that implements the `Backend` trait
//! for PostgreSQL databases using sqlx.

use crate::config::BackendConfig;
use crate::db::{Backend, BackendKind, ColumnInfo, Engine, QueryResult, Row, Value};
use crate::error::{Result, TallyError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::{Column as SqlxColumn, Executor, Row as SqlxRow, Statement, TypeInfo};
use std::time::{Duration, Instant};
use tracing::debug;

/// PostgreSQL database client.
#[derive(Debug)]
pub struct PostgresClient {
    kind: BackendKind,
    pool: PgPool,
    timeout: Duration,
}

impl PostgresClient {
    /// Connects to the database described by `config`.
    ///
    /// A single attempt is made; connectivity failures surface immediately.
    pub async fn connect(kind: BackendKind, config: &BackendConfig) -> Result<Self> {
        let conn_str = config.connection_url()?;
        debug!("Connecting to {}", config.display_string());

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&conn_str)
            .await
            .map_err(|e| map_connection_error(e, config))?;

        debug!("Successfully connected to database");
        Ok(Self {
            kind,
            pool,
            timeout: config.timeout(kind),
        })
    }

    /// Creates a PostgresClient from an existing connection pool.
    ///
    /// This is primarily useful for testing.
    pub fn from_pool(kind: BackendKind, pool: PgPool, timeout: Duration) -> Self {
        Self {
            kind,
            pool,
            timeout,
        }
    }

    /// Runs `statements` on one pooled connection so session directives
    /// apply to the final query.
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
                .map_err(|e| TallyError::query(format_query_error(e)))?;
        }

        fetch_result(&mut conn, query).await
    }
}

#[async_trait]
impl Backend for PostgresClient {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn engine(&self) -> Engine {
        Engine::Postgres
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

/// Fetches all rows for `sql` and converts them to a QueryResult.
async fn fetch_result(conn: &mut PgConnection, sql: &str) -> Result<QueryResult> {
    let start = Instant::now();

    let result = sqlx::query(sql)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| TallyError::query(format_query_error(e)))?;

    let execution_time = start.elapsed();

    // Empty result sets carry no row to read column metadata from, so ask
    // the server to describe the statement instead.
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
            .map_err(|e| TallyError::query(format_query_error(e)))?;
        statement
            .columns()
            .iter()
            .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
            .collect()
    };

    let rows = result.iter().map(convert_row).collect::<Result<Vec<Row>>>()?;

    Ok(QueryResult::with_data(columns, rows).with_execution_time(execution_time))
}

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Result<Row> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.name(), col.type_info().name()))
        .collect()
}

/// Reads one nullable cell. A cell that cannot be decoded is an error,
/// never a NULL.
fn decode<'r, T>(row: &'r PgRow, index: usize, column: &str, type_name: &str) -> Result<Option<T>>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<Option<T>, _>(index).map_err(|e| {
        TallyError::query(format!(
            "Cannot decode column '{column}' of type {type_name}: {e}"
        ))
    })
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, column: &str, type_name: &str) -> Result<Value> {
    let value = match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => decode::<bool>(row, index, column, type_name)?.map(Value::Bool),

        "INT2" | "SMALLINT" => {
            decode::<i16>(row, index, column, type_name)?.map(|v| Value::Int(v as i64))
        }

        "INT4" | "INT" | "INTEGER" => {
            decode::<i32>(row, index, column, type_name)?.map(|v| Value::Int(v as i64))
        }

        "INT8" | "BIGINT" => decode::<i64>(row, index, column, type_name)?.map(Value::Int),

        "FLOAT4" | "REAL" => {
            decode::<f32>(row, index, column, type_name)?.map(|v| Value::Float(v as f64))
        }

        "FLOAT8" | "DOUBLE PRECISION" => {
            decode::<f64>(row, index, column, type_name)?.map(Value::Float)
        }

        // SUM and AVG over integer columns return NUMERIC
        "NUMERIC" | "DECIMAL" => {
            decode::<Decimal>(row, index, column, type_name)?.map(numeric_value)
        }

        "DATE" => decode::<NaiveDate>(row, index, column, type_name)?
            .map(|v| Value::String(v.format("%Y-%m-%d").to_string())),

        "TIMESTAMP" => decode::<NaiveDateTime>(row, index, column, type_name)?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),

        "TIMESTAMPTZ" => decode::<DateTime<Utc>>(row, index, column, type_name)?
            .map(|v| Value::String(v.to_rfc3339())),

        "TIME" => decode::<NaiveTime>(row, index, column, type_name)?
            .map(|v| Value::String(v.to_string())),

        "JSON" | "JSONB" => decode::<serde_json::Value>(row, index, column, type_name)?
            .map(|v| Value::String(v.to_string())),

        "BYTEA" => decode::<Vec<u8>>(row, index, column, type_name)?.map(Value::Bytes),

        // Text-like types; anything else fails to decode as a string
        _ => decode::<String>(row, index, column, type_name)?.map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Integral NUMERICs become `Int`, fractional ones `Float`. Values outside
/// both ranges keep their exact decimal text.
fn numeric_value(value: Decimal) -> Value {
    if value.fract().is_zero() {
        if let Some(i) = value.to_i64() {
            return Value::Int(i);
        }
    } else if let Some(f) = value.to_f64() {
        return Value::Float(f);
    }
    Value::String(value.normalize().to_string())
}

/// Maps sqlx connection errors to user-facing messages.
fn map_connection_error(error: sqlx::Error, config: &BackendConfig) -> TallyError {
    let target = config.display_string();
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        TallyError::unavailable(format!(
            "Cannot connect to {target}. Check that the server is running."
        ))
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        TallyError::unavailable(format!(
            "Connection to {target} timed out. The server may be overloaded or unreachable."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        TallyError::unavailable(format!(
            "Authentication failed for {target}. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        TallyError::unavailable(format!("Database at {target} does not exist."))
    } else if matches!(error, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut) {
        TallyError::unavailable(format!("{target}: {error}"))
    } else {
        TallyError::unavailable(error.to_string())
    }
}

/// Formats a query error with the server's detail and hint if available.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }

        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }

        if let Some(table) = pg_error.table() {
            result.push_str("\n  TABLE: ");
            result.push_str(table);
        }

        if let Some(column) = pg_error.column() {
            result.push_str("\n  COLUMN: ");
            result.push_str(column);
        }
    }

    result
}
