//! Read-only guard for bound queries.
//!
//! Because parameters are substituted as literal text, the final SQL is
//! parsed before it reaches a backend. Statements that modify data, and
//! bound queries that turn out to contain more than one statement, are
//! refused.

mod parser;

pub use parser::{check_read_only, classify_sql, SqlClassifier};

use std::fmt;

/// Safety level classification for SQL statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyLevel {
    /// Read-only statements and session directives (SELECT, EXPLAIN, SHOW, SET).
    Safe,
    /// Data modification (INSERT, UPDATE, MERGE).
    Mutating,
    /// Data loss or schema changes (DELETE, DROP, TRUNCATE, ALTER, CREATE).
    Destructive,
}

impl SafetyLevel {
    /// Higher is more dangerous.
    fn priority(&self) -> u8 {
        match self {
            Self::Safe => 0,
            Self::Mutating => 1,
            Self::Destructive => 2,
        }
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safe => write!(f, "Safe"),
            Self::Mutating => write!(f, "Mutating"),
            Self::Destructive => write!(f, "Destructive"),
        }
    }
}

/// The type of SQL statement detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    Drop,
    Truncate,
    Alter,
    Create,
    Grant,
    Revoke,
    Explain,
    Show,
    Set,
    Merge,
    /// Multiple statements detected; contains the most dangerous type.
    Multiple(Box<StatementType>),
    /// Statement type could not be determined.
    Unknown,
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => write!(f, "SELECT"),
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
            Self::Drop => write!(f, "DROP"),
            Self::Truncate => write!(f, "TRUNCATE"),
            Self::Alter => write!(f, "ALTER"),
            Self::Create => write!(f, "CREATE"),
            Self::Grant => write!(f, "GRANT"),
            Self::Revoke => write!(f, "REVOKE"),
            Self::Explain => write!(f, "EXPLAIN"),
            Self::Show => write!(f, "SHOW"),
            Self::Set => write!(f, "SET"),
            Self::Merge => write!(f, "MERGE"),
            Self::Multiple(inner) => write!(f, "Multiple ({})", inner),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Result of classifying a SQL string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    /// The most dangerous level among the statements.
    pub level: SafetyLevel,
    /// The type of statement(s) detected.
    pub statement_type: StatementType,
    /// Number of statements parsed.
    pub statement_count: usize,
}

impl ClassificationResult {
    /// Returns true when every statement is read-only.
    pub fn is_read_only(&self) -> bool {
        self.level == SafetyLevel::Safe
    }
}
