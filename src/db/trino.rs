//! Trino batch-store client.
//!
//! Speaks the Trino/Presto HTTP statement protocol: a statement is POSTed to
//! `/v1/statement` and the client follows `nextUri` until the server stops
//! returning one, collecting `columns` and `data` pages along the way.
//! Session properties set by a `SET SESSION` directive come back as
//! `X-Trino-Set-Session` response headers and are replayed on the
//! following statements of the same call.

use crate::config::BackendConfig;
use crate::db::{Backend, BackendKind, ColumnInfo, Engine, QueryResult, Row, Value};
use crate::error::{Result, TallyError};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::form_urlencoded;

const HEADER_USER: &str = "X-Trino-User";
const HEADER_SOURCE: &str = "X-Trino-Source";
const HEADER_CATALOG: &str = "X-Trino-Catalog";
const HEADER_SCHEMA: &str = "X-Trino-Schema";
const HEADER_SESSION: &str = "X-Trino-Session";
const HEADER_SET_SESSION: &str = "X-Trino-Set-Session";
const HEADER_CLEAR_SESSION: &str = "X-Trino-Clear-Session";

/// Value sent as `X-Trino-Source`.
const SOURCE: &str = "db-tally";

/// Client-side session state for one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrinoSession {
    pub user: String,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl TrinoSession {
    /// Updates session properties from a statement response's headers.
    pub fn apply_response_headers(&mut self, headers: &HeaderMap) {
        for value in headers.get_all(HEADER_SET_SESSION) {
            let Ok(value) = value.to_str() else { continue };
            for (name, property) in form_urlencoded::parse(value.as_bytes()) {
                debug!("Session property set: {}={}", name, property);
                self.properties.insert(name.into_owned(), property.into_owned());
            }
        }
        for value in headers.get_all(HEADER_CLEAR_SESSION) {
            let Ok(name) = value.to_str() else { continue };
            self.properties.remove(name.trim());
        }
    }

    /// Renders the properties as an `X-Trino-Session` header value.
    pub fn session_header(&self) -> Option<String> {
        if self.properties.is_empty() {
            return None;
        }
        let encoded: Vec<String> = self
            .properties
            .iter()
            .map(|(name, value)| {
                let value: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
                format!("{name}={value}")
            })
            .collect();
        Some(encoded.join(","))
    }

    fn apply_request_headers(&self, mut request: RequestBuilder) -> RequestBuilder {
        request = request
            .header(HEADER_USER, &self.user)
            .header(HEADER_SOURCE, SOURCE);
        if let Some(catalog) = &self.catalog {
            request = request.header(HEADER_CATALOG, catalog);
        }
        if let Some(schema) = &self.schema {
            request = request.header(HEADER_SCHEMA, schema);
        }
        if let Some(session) = self.session_header() {
            request = request.header(HEADER_SESSION, session);
        }
        request
    }
}

/// Trino batch-store client.
#[derive(Debug, Clone)]
pub struct TrinoClient {
    kind: BackendKind,
    client: Client,
    statement_url: String,
    session: TrinoSession,
    password: Option<String>,
    timeout: Duration,
}

impl TrinoClient {
    /// Creates a client for the coordinator described by `config`.
    ///
    /// No request is made until the first statement runs.
    pub fn new(kind: BackendKind, config: &BackendConfig) -> Result<Self> {
        let base = config.connection_url()?;
        let timeout = config.timeout(kind);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TallyError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            kind,
            client,
            statement_url: format!("{}/v1/statement", base.trim_end_matches('/')),
            session: TrinoSession {
                user: config.user.clone().unwrap_or_else(|| SOURCE.to_string()),
                catalog: config.catalog.clone(),
                schema: config.schema.clone(),
                properties: BTreeMap::new(),
            },
            password: config.password()?,
            timeout,
        })
    }

    fn authorize(&self, user: &str, request: RequestBuilder) -> RequestBuilder {
        match &self.password {
            Some(password) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    async fn send(&self, session: &TrinoSession, request: RequestBuilder) -> Result<StatementResponse> {
        let request = self.authorize(&session.user, session.apply_request_headers(request));

        let response = request.send().await.map_err(map_request_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| TallyError::unavailable(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(parse_http_error(status, &body));
        }

        let mut page: StatementResponse = serde_json::from_str(&body)
            .map_err(|e| TallyError::query(format!("Failed to parse statement response: {e}")))?;
        page.headers = headers;
        Ok(page)
    }

    /// Runs one statement to completion, updating `session` from the
    /// response headers.
    ///
    /// `in_flight` holds the URI of the statement while it is still running
    /// on the coordinator.
    async fn run_statement(
        &self,
        session: &mut TrinoSession,
        sql: &str,
        in_flight: &mut Option<String>,
    ) -> Result<QueryResult> {
        let start = Instant::now();
        debug!("Submitting statement: {}", sql);

        let mut page = self
            .send(session, self.client.post(&self.statement_url).body(sql.to_string()))
            .await?;
        let mut collector = ResultCollector::default();

        loop {
            session.apply_response_headers(&page.headers);
            let next = collector.absorb(page);
            *in_flight = collector.pending().map(str::to_string);
            match next? {
                Some(uri) => {
                    page = self.send(session, self.client.get(&uri)).await?;
                }
                None => break,
            }
        }

        Ok(collector.finish().with_execution_time(start.elapsed()))
    }

    async fn run_all(&self, statements: &[String], in_flight: &mut Option<String>) -> Result<QueryResult> {
        let (query, directives) = statements
            .split_last()
            .ok_or_else(|| TallyError::internal("no statements to execute"))?;

        let mut session = self.session.clone();
        for directive in directives {
            self.run_statement(&mut session, directive, in_flight).await?;
        }
        self.run_statement(&mut session, query, in_flight).await
    }

    /// Builds the request that cancels the statement at `uri`.
    fn cancel_request(&self, uri: &str) -> RequestBuilder {
        let request = self
            .client
            .delete(uri)
            .header(HEADER_USER, &self.session.user)
            .header(HEADER_SOURCE, SOURCE);
        self.authorize(&self.session.user, request)
    }

    async fn cancel(&self, uri: &str) {
        debug!("Cancelling statement at {}", uri);
        match self.cancel_request(uri).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!("Coordinator returned {} cancelling {}", response.status(), uri)
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to cancel statement at {}: {}", uri, e),
        }
    }
}

/// Cancels a running statement on drop.
///
/// Covers the caller abandoning `execute_statements` mid-flight, e.g. under
/// an outer timeout. The cancel is spawned onto the current runtime.
struct InFlight {
    client: TrinoClient,
    uri: Option<String>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let Some(uri) = self.uri.take() else { return };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to cancel statement at {}", uri);
            return;
        };
        let request = self.client.cancel_request(&uri);
        debug!("Cancelling abandoned statement at {}", uri);
        handle.spawn(async move {
            if let Err(e) = request.send().await {
                warn!("Failed to cancel abandoned statement: {}", e);
            }
        });
    }
}

#[async_trait]
impl Backend for TrinoClient {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn engine(&self) -> Engine {
        Engine::Trino
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        self.execute_statements(&[sql.to_string()]).await
    }

    async fn execute_statements(&self, statements: &[String]) -> Result<QueryResult> {
        let mut in_flight = InFlight {
            client: self.clone(),
            uri: None,
        };
        let outcome = tokio::time::timeout(self.timeout, self.run_all(statements, &mut in_flight.uri))
            .await
            .unwrap_or_else(|_| {
                Err(TallyError::query(format!(
                    "Query timed out after {} seconds",
                    self.timeout.as_secs()
                )))
            });

        // A failed or timed-out statement may still be running server-side.
        if outcome.is_err() {
            if let Some(uri) = in_flight.uri.take() {
                self.cancel(&uri).await;
            }
        }
        outcome
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// One page of the statement protocol.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    id: String,
    next_uri: Option<String>,
    columns: Option<Vec<TrinoColumn>>,
    data: Option<Vec<Vec<serde_json::Value>>>,
    error: Option<TrinoError>,
    #[serde(skip)]
    headers: HeaderMap,
}

#[derive(Debug, Deserialize)]
struct TrinoColumn {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrinoError {
    message: String,
    error_name: Option<String>,
    error_type: Option<String>,
}

/// Accumulates pages into a single result.
#[derive(Debug, Default)]
struct ResultCollector {
    columns: Option<Vec<ColumnInfo>>,
    rows: Vec<Row>,
    pending: Option<String>,
}

impl ResultCollector {
    /// Takes in one page and returns the next URI to fetch, if any.
    fn absorb(&mut self, page: StatementResponse) -> Result<Option<String>> {
        self.pending = page.next_uri.clone();
        if let Some(error) = page.error {
            let name = error.error_name.unwrap_or_else(|| "UNKNOWN".to_string());
            let kind = error.error_type.unwrap_or_default();
            return Err(TallyError::query(format!(
                "{name} ({kind}) in query {}: {}",
                page.id, error.message
            )));
        }

        if self.columns.is_none() {
            if let Some(columns) = page.columns {
                self.columns = Some(
                    columns
                        .into_iter()
                        .map(|c| ColumnInfo::new(c.name, c.data_type))
                        .collect(),
                );
            }
        }

        if let Some(data) = page.data {
            self.rows
                .extend(data.into_iter().map(|row| row.into_iter().map(convert_value).collect()));
        }

        Ok(page.next_uri)
    }

    /// URI of the statement if the coordinator has not finished it yet.
    fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    fn finish(self) -> QueryResult {
        QueryResult::with_data(self.columns.unwrap_or_default(), self.rows)
    }
}

/// Converts a JSON cell to our Value type.
fn convert_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) => Value::String(s),
        other => Value::String(other.to_string()),
    }
}

/// Maps transport errors: anything that never reached the coordinator is
/// an availability problem.
fn map_request_error(error: reqwest::Error) -> TallyError {
    if error.is_connect() || error.is_timeout() {
        TallyError::unavailable(format!("Cannot reach coordinator: {error}"))
    } else {
        TallyError::query(format!("Request failed: {error}"))
    }
}

fn parse_http_error(status: StatusCode, body: &str) -> TallyError {
    match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            TallyError::unavailable(format!("Coordinator returned {status}"))
        }
        StatusCode::UNAUTHORIZED => {
            TallyError::unavailable("Authentication failed. Check the batch store credentials.")
        }
        _ => TallyError::query(format!("Coordinator returned {status}: {}", body.trim())),
    }
}
