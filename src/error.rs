//! Error types for db-tally.
//!
//! Defines the main error enum used throughout the crate. Every variant
//! carries enough context (template name, parameter values, backend message)
//! to reproduce the failure by hand.

use thiserror::Error;

/// Main error type for db-tally operations.
#[derive(Error, Debug)]
pub enum TallyError {
    /// A template with the same name is already registered.
    #[error("Template '{0}' is already registered")]
    DuplicateTemplate(String),

    /// No template with the given name is registered.
    #[error("Unknown template '{0}'")]
    UnknownTemplate(String),

    /// Template text is malformed (unmatched brace, bad placeholder name).
    #[error("Invalid template '{name}': {reason}")]
    InvalidTemplate { name: String, reason: String },

    /// One or more placeholders had no value at bind time.
    #[error("Template '{template}' is missing parameters: {}", .missing.join(", "))]
    MissingParameter {
        template: String,
        missing: Vec<String>,
    },

    /// Parameters were supplied that the template never references.
    ///
    /// Non-fatal: the runner logs it and carries on.
    #[error("Template '{template}' does not use parameters: {}", .unused.join(", "))]
    UnusedParameter {
        template: String,
        unused: Vec<String>,
    },

    /// Backend could not be reached (host down, refused, not configured).
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend rejected the query (syntax, permissions, resource limits).
    #[error("Query error: {0}")]
    QueryExecution(String),

    /// Inclusion-exclusion inputs are inconsistent.
    #[error("Invalid overlap: {0}")]
    InvalidOverlap(String),

    /// A scalar count was requested from a result with no rows.
    #[error("No result row: {0}")]
    NoResultRow(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TallyError {
    /// Creates an invalid template error.
    pub fn invalid_template(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a backend-unavailable error with the given message.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::QueryExecution(msg.into())
    }

    /// Creates an invalid overlap error with the given message.
    pub fn overlap(msg: impl Into<String>) -> Self {
        Self::InvalidOverlap(msg.into())
    }

    /// Creates a no-result-row error with the given message.
    pub fn no_row(msg: impl Into<String>) -> Self {
        Self::NoResultRow(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Prefixes backend-originated errors with the context of the query that
    /// produced them. Other variants already name their template.
    pub fn in_context(self, context: &str) -> Self {
        match self {
            Self::BackendUnavailable(msg) => Self::BackendUnavailable(format!("{context}: {msg}")),
            Self::QueryExecution(msg) => Self::QueryExecution(format!("{context}: {msg}")),
            Self::NoResultRow(msg) => Self::NoResultRow(format!("{context}: {msg}")),
            other => other,
        }
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::DuplicateTemplate(_) => "Duplicate Template",
            Self::UnknownTemplate(_) => "Unknown Template",
            Self::InvalidTemplate { .. } => "Invalid Template",
            Self::MissingParameter { .. } => "Missing Parameter",
            Self::UnusedParameter { .. } => "Unused Parameter",
            Self::BackendUnavailable(_) => "Backend Unavailable",
            Self::QueryExecution(_) => "Query Error",
            Self::InvalidOverlap(_) => "Invalid Overlap",
            Self::NoResultRow(_) => "No Result Row",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using TallyError.
pub type Result<T> = std::result::Result<T, TallyError>;
