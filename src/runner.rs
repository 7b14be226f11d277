//! Template catalog and query execution.
//!
//! The runner owns the read-only catalog of templates. Backends are not
//! part of it: the caller constructs them once and passes them to every
//! run, and each bound query is dispatched to the backend its template
//! targets.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::db::{Backends, QueryResult};
use crate::error::{Result, TallyError};
use crate::periods::DateWindow;
use crate::safety::check_read_only;
use crate::template::{BoundQuery, Params, QueryTemplate};

/// Per-run settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Overall deadline for directives plus query, on top of the
    /// backend's own statement timeout.
    pub timeout: Option<Duration>,
}

/// Binds templates and runs them against injected backends.
#[derive(Debug, Default)]
pub struct QueryTemplateRunner {
    templates: HashMap<String, QueryTemplate>,
}

impl QueryTemplateRunner {
    /// Creates a runner with an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a template to the catalog.
    pub fn register(&mut self, template: QueryTemplate) -> Result<()> {
        if self.templates.contains_key(template.name()) {
            return Err(TallyError::DuplicateTemplate(template.name().to_string()));
        }
        debug!(
            "Registered template '{}' ({} parameters)",
            template.name(),
            template.required_parameters().len()
        );
        self.templates.insert(template.name().to_string(), template);
        Ok(())
    }

    /// Looks up a template by name.
    pub fn template(&self, name: &str) -> Result<&QueryTemplate> {
        self.templates
            .get(name)
            .ok_or_else(|| TallyError::UnknownTemplate(name.to_string()))
    }

    /// All templates, sorted by name.
    pub fn templates(&self) -> Vec<&QueryTemplate> {
        let mut templates: Vec<&QueryTemplate> = self.templates.values().collect();
        templates.sort_by(|a, b| a.name().cmp(b.name()));
        templates
    }

    /// Binds `params` into the named template.
    ///
    /// Unreferenced parameters are logged as a warning and otherwise ignored.
    pub fn bind(&self, template_name: &str, params: &Params) -> Result<BoundQuery> {
        let bound = self.template(template_name)?.bind(params)?;
        if !bound.unused_parameters().is_empty() {
            let warning = TallyError::UnusedParameter {
                template: bound.template().to_string(),
                unused: bound.unused_parameters().to_vec(),
            };
            warn!("{}", warning);
        }
        Ok(bound)
    }

    /// Runs a bound query on its designated backend.
    ///
    /// `pre_statements` are executed first, in order, on the same session;
    /// their results are discarded. The backend's result is returned
    /// untouched. Failures are not retried.
    pub async fn run(
        &self,
        query: &BoundQuery,
        backends: &Backends,
        pre_statements: &[String],
    ) -> Result<QueryResult> {
        self.run_with(query, backends, pre_statements, RunOptions::default())
            .await
    }

    /// Like [`run`](Self::run), with explicit options.
    pub async fn run_with(
        &self,
        query: &BoundQuery,
        backends: &Backends,
        pre_statements: &[String],
        options: RunOptions,
    ) -> Result<QueryResult> {
        let context = query.context();
        let backend = backends
            .get(query.backend())
            .map_err(|e| e.in_context(&context))?;

        for statement in pre_statements
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(query.sql_text()))
        {
            check_read_only(backend.engine(), statement).map_err(|e| e.in_context(&context))?;
        }

        let mut statements = pre_statements.to_vec();
        statements.push(query.sql_text().to_string());

        info!(
            "Running {} on {} ({})",
            context,
            query.backend(),
            backend.engine().as_str()
        );
        debug!("SQL: {}", query.sql_text());

        let execution = backend.execute_statements(&statements);
        let outcome = match options.timeout {
            Some(limit) => tokio::time::timeout(limit, execution)
                .await
                .unwrap_or_else(|_| Err(TallyError::query(format!("run timed out after {limit:?}")))),
            None => execution.await,
        };
        let result = outcome.map_err(|e| e.in_context(&context))?;
        result
            .ensure_unique_columns()
            .map_err(|e| e.in_context(&context))?;

        info!(
            "{} returned {} rows in {:?}",
            query.template(),
            result.row_count(),
            result.execution_time
        );
        Ok(result)
    }

    /// Binds and runs one template per date window, in order.
    ///
    /// Each window supplies `start_date` and `end_date` on top of
    /// `base_params`. `options` apply to every window's run. Stops at the
    /// first failure.
    pub async fn run_series(
        &self,
        template_name: &str,
        base_params: &Params,
        windows: &[DateWindow],
        backends: &Backends,
        pre_statements: &[String],
        options: RunOptions,
    ) -> Result<Vec<(DateWindow, QueryResult)>> {
        let mut results = Vec::with_capacity(windows.len());
        for window in windows {
            let query = self.bind(template_name, &window.apply(base_params))?;
            let result = self
                .run_with(&query, backends, pre_statements, options)
                .await?;
            results.push((*window, result));
        }
        Ok(results)
    }
}
