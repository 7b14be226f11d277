//! Mock backend for testing.
//!
//! Answers statements from a script of canned responses and records every
//! statement it receives, so tests can assert on what reached the backend.

use super::{Backend, BackendKind, ColumnInfo, Engine, QueryResult, Value};
use crate::error::{Result, TallyError};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Response {
    Result(QueryResult),
    Failure(String),
}

/// A mock backend that returns predefined results.
///
/// A scripted response applies to any statement containing its fragment
/// (whitespace-normalized); the first matching entry wins. Unscripted
/// `SELECT`s get a one-cell placeholder result and everything else an empty
/// one.
#[derive(Debug)]
pub struct MockBackend {
    kind: BackendKind,
    script: Vec<(String, Response)>,
    unavailable: bool,
    executed: Mutex<Vec<String>>,
}

impl MockBackend {
    /// Creates a new mock backend with an empty script.
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            script: Vec::new(),
            unavailable: false,
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Answers statements containing `fragment` with `result`.
    pub fn respond(mut self, fragment: &str, result: QueryResult) -> Self {
        self.script
            .push((normalize(fragment), Response::Result(result)));
        self
    }

    /// Answers statements containing `fragment` with a single-row,
    /// single-column integer result.
    pub fn respond_count(self, fragment: &str, column: &str, count: i64) -> Self {
        let result = QueryResult::with_data(
            vec![ColumnInfo::new(column, "bigint")],
            vec![vec![Value::Int(count)]],
        );
        self.respond(fragment, result)
    }

    /// Fails statements containing `fragment` with a query error.
    pub fn fail(mut self, fragment: &str, message: &str) -> Self {
        self.script
            .push((normalize(fragment), Response::Failure(message.to_string())));
        self
    }

    /// Makes every statement fail as if the backend were unreachable.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Returns every statement executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, sql: &str) {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sql.to_string());
    }
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Backend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn engine(&self) -> Engine {
        Engine::Mock
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        if self.unavailable {
            return Err(TallyError::unavailable(format!(
                "mock {} is offline",
                self.kind
            )));
        }
        self.record(sql);

        let normalized = normalize(sql);
        if let Some((_, response)) = self
            .script
            .iter()
            .find(|(fragment, _)| normalized.contains(fragment.as_str()))
        {
            return match response {
                Response::Result(result) => {
                    Ok(result.clone().with_execution_time(Duration::from_millis(1)))
                }
                Response::Failure(message) => Err(TallyError::query(message.clone())),
            };
        }

        if normalized.to_uppercase().starts_with("SELECT") {
            let columns = vec![ColumnInfo::new("result", "text")];
            let rows = vec![vec![Value::String(format!("Mock result for: {}", sql))]];
            Ok(QueryResult::with_data(columns, rows).with_execution_time(Duration::from_millis(1)))
        } else {
            Ok(QueryResult::new().with_execution_time(Duration::from_millis(1)))
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
