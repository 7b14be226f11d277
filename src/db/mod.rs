//! Database abstraction layer for db-tally.
//!
//! Provides a trait-based interface over the two kinds of execution target
//! a template can address: a low-latency row store and a high-latency batch
//! store. Engines are interchangeable behind the `Backend` trait.

mod mock;
mod postgres;
mod sqlite;
mod trino;
mod types;

pub use mock::MockBackend;
pub use postgres::PostgresClient;
pub use sqlite::SqliteClient;
pub use trino::{TrinoClient, TrinoSession};
pub use types::{ColumnInfo, QueryResult, Row, Value};

use crate::config::BackendConfig;
use crate::error::{Result, TallyError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which execution target a template addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Row-oriented store for small targeted lookups.
    #[default]
    RowStore,
    /// Distributed store for large historical scans.
    BatchStore,
}

impl BackendKind {
    /// Returns the kind as its configuration key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RowStore => "row_store",
            Self::BatchStore => "batch_store",
        }
    }

    /// Parses a kind from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "row_store" | "row" => Some(Self::RowStore),
            "batch_store" | "batch" => Some(Self::BatchStore),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete engine behind a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Postgres,
    Sqlite,
    Trino,
    /// Scripted in-memory backend.
    Mock,
}

impl Engine {
    /// Returns the engine as a string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
            Self::Trino => "trino",
            Self::Mock => "mock",
        }
    }

    /// Parses an engine from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" => Some(Self::Sqlite),
            "trino" | "presto" => Some(Self::Trino),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }

    /// URL schemes accepted for this engine.
    pub fn url_schemes(&self) -> &'static [&'static str] {
        match self {
            Self::Postgres => &["postgres", "postgresql"],
            Self::Sqlite => &["sqlite"],
            Self::Trino => &["http", "https"],
            Self::Mock => &[],
        }
    }
}

/// Creates a backend client for the given configuration.
///
/// This is the central factory function for backend connections.
pub async fn connect(kind: BackendKind, config: &BackendConfig) -> Result<Box<dyn Backend>> {
    match config.engine {
        Engine::Postgres => {
            let client = PostgresClient::connect(kind, config).await?;
            Ok(Box::new(client))
        }
        Engine::Sqlite => {
            let client = SqliteClient::connect(kind, config).await?;
            Ok(Box::new(client))
        }
        Engine::Trino => {
            let client = TrinoClient::new(kind, config)?;
            Ok(Box::new(client))
        }
        Engine::Mock => Ok(Box::new(MockBackend::new(kind))),
    }
}

/// Trait defining the interface for query backends.
///
/// All operations are async and return Results with TallyError. Callers
/// await each call before issuing the next.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The execution target this backend serves.
    fn kind(&self) -> BackendKind;

    /// The engine behind this backend.
    fn engine(&self) -> Engine;

    /// Executes a single SQL statement and returns its results.
    async fn execute_query(&self, sql: &str) -> Result<QueryResult>;

    /// Executes `statements` in order on one session. All but the last are
    /// directives run for side effect; the last statement's result is
    /// returned.
    ///
    /// The default issues each statement through `execute_query`, which is
    /// only correct for backends without per-connection session state.
    async fn execute_statements(&self, statements: &[String]) -> Result<QueryResult> {
        let (query, directives) = statements
            .split_last()
            .ok_or_else(|| TallyError::internal("no statements to execute"))?;
        for directive in directives {
            self.execute_query(directive).await?;
        }
        self.execute_query(query).await
    }

    /// Closes the backend connection.
    async fn close(&self) -> Result<()>;
}

/// The explicitly constructed backends a runner dispatches to.
///
/// Built once by the caller and passed to every run; nothing is looked up
/// from ambient state.
#[derive(Default)]
pub struct Backends {
    row_store: Option<Box<dyn Backend>>,
    batch_store: Option<Box<dyn Backend>>,
}

impl Backends {
    /// Creates an empty set of backends.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a backend under the kind it reports.
    pub fn with(mut self, backend: Box<dyn Backend>) -> Self {
        self.insert(backend);
        self
    }

    /// Installs a backend, replacing any previous one of the same kind.
    pub fn insert(&mut self, backend: Box<dyn Backend>) {
        match backend.kind() {
            BackendKind::RowStore => self.row_store = Some(backend),
            BackendKind::BatchStore => self.batch_store = Some(backend),
        }
    }

    /// Returns the backend for `kind`.
    pub fn get(&self, kind: BackendKind) -> Result<&dyn Backend> {
        let slot = match kind {
            BackendKind::RowStore => &self.row_store,
            BackendKind::BatchStore => &self.batch_store,
        };
        slot.as_deref()
            .ok_or_else(|| TallyError::unavailable(format!("no {kind} backend is configured")))
    }

    /// Closes every installed backend.
    pub async fn close(&self) -> Result<()> {
        for backend in [&self.row_store, &self.batch_store].into_iter().flatten() {
            backend.close().await?;
        }
        Ok(())
    }
}
