//! SQL parsing and classification logic.
//!
//! Uses sqlparser-rs with the dialect matching each engine. Batch-store SQL
//! is parsed with the generic dialect, which does not know every engine
//! extension, so batch-store text that fails to parse is let through with a
//! warning. Row-store text that fails to parse is refused.

use sqlparser::ast::{Query, Select, Set, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::{Dialect, GenericDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use tracing::warn;

use crate::db::Engine;
use crate::error::{Result, TallyError};

use super::{ClassificationResult, SafetyLevel, StatementType};

/// SQL classifier that parses and classifies SQL for one engine.
pub struct SqlClassifier {
    dialect: Box<dyn Dialect>,
}

impl std::fmt::Debug for SqlClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlClassifier").finish_non_exhaustive()
    }
}

impl Default for SqlClassifier {
    fn default() -> Self {
        Self::for_engine(Engine::Postgres)
    }
}

impl SqlClassifier {
    /// Creates a classifier using the dialect of `engine`.
    pub fn for_engine(engine: Engine) -> Self {
        let dialect: Box<dyn Dialect> = match engine {
            Engine::Postgres => Box::new(PostgreSqlDialect {}),
            Engine::Sqlite => Box::new(SQLiteDialect {}),
            Engine::Trino | Engine::Mock => Box::new(GenericDialect {}),
        };
        Self { dialect }
    }

    /// Parses and classifies `sql`. Fails if the text does not parse.
    pub fn classify(&self, sql: &str) -> Result<ClassificationResult> {
        let statements = Parser::parse_sql(self.dialect.as_ref(), sql)
            .map_err(|e| TallyError::query(format!("SQL parse error: {}", e)))?;

        if statements.is_empty() {
            return Err(TallyError::query("Empty SQL statement"));
        }

        let mut max_level = SafetyLevel::Safe;
        let mut max_type = StatementType::Unknown;

        for (i, stmt) in statements.iter().enumerate() {
            let (level, stmt_type) = classify_statement(stmt);
            if i == 0 || level.priority() > max_level.priority() {
                max_level = level;
                max_type = stmt_type;
            }
        }

        let statement_type = if statements.len() > 1 {
            StatementType::Multiple(Box::new(max_type))
        } else {
            max_type
        };

        Ok(ClassificationResult {
            level: max_level,
            statement_type,
            statement_count: statements.len(),
        })
    }
}

/// Convenience function to classify SQL without creating a classifier instance.
pub fn classify_sql(engine: Engine, sql: &str) -> Result<ClassificationResult> {
    SqlClassifier::for_engine(engine).classify(sql)
}

/// Refuses `sql` if it parses as more than one statement or as anything
/// that modifies data.
///
/// SQL that does not parse is refused on the row-store engines, whose
/// dialects sqlparser covers. Batch-store SQL only gets a warning.
pub fn check_read_only(engine: Engine, sql: &str) -> Result<()> {
    let classification = match classify_sql(engine, sql) {
        Ok(classification) => classification,
        Err(e) => match engine {
            Engine::Postgres | Engine::Sqlite => {
                return Err(TallyError::query(format!(
                    "refusing statement that could not be verified as read-only: {e}"
                )));
            }
            Engine::Trino | Engine::Mock => {
                warn!("Could not verify statement is read-only ({}); sending as is", e);
                return Ok(());
            }
        },
    };

    if classification.statement_count > 1 {
        return Err(TallyError::query(format!(
            "expected exactly one statement but found {} ({}); check parameter values for stray ';'",
            classification.statement_count, classification.statement_type
        )));
    }

    if !classification.is_read_only() {
        return Err(TallyError::query(format!(
            "refusing to run {} statement ({}); only read-only queries and session directives are allowed",
            classification.statement_type, classification.level
        )));
    }

    Ok(())
}

/// Classifies a single parsed statement.
fn classify_statement(statement: &Statement) -> (SafetyLevel, StatementType) {
    match statement {
        // Query: may contain data-modifying CTEs, so recurse
        Statement::Query(query) => classify_query(query),
        Statement::Explain {
            analyze, statement, ..
        } => {
            if *analyze {
                // EXPLAIN ANALYZE executes the query
                let (inner_level, _) = classify_statement(statement);
                (inner_level, StatementType::Explain)
            } else {
                (SafetyLevel::Safe, StatementType::Explain)
            }
        }
        Statement::ShowVariable { .. } => (SafetyLevel::Safe, StatementType::Show),
        Statement::ShowTables { .. } => (SafetyLevel::Safe, StatementType::Show),
        Statement::ShowColumns { .. } => (SafetyLevel::Safe, StatementType::Show),
        Statement::ShowCreate { .. } => (SafetyLevel::Safe, StatementType::Show),
        Statement::ShowFunctions { .. } => (SafetyLevel::Safe, StatementType::Show),

        // Session directives (resource limits, timeouts)
        Statement::Set(Set::SingleAssignment { .. } | Set::ParenthesizedAssignments { .. }) => {
            (SafetyLevel::Safe, StatementType::Set)
        }
        Statement::Pragma { .. } => (SafetyLevel::Safe, StatementType::Set),

        // Mutating: data modification
        Statement::Insert(_) => (SafetyLevel::Mutating, StatementType::Insert),
        Statement::Update { .. } => (SafetyLevel::Mutating, StatementType::Update),
        Statement::Merge { .. } => (SafetyLevel::Mutating, StatementType::Merge),

        // Destructive: data loss or schema changes
        Statement::Delete(_) => (SafetyLevel::Destructive, StatementType::Delete),
        Statement::Drop { .. } => (SafetyLevel::Destructive, StatementType::Drop),
        Statement::Truncate { .. } => (SafetyLevel::Destructive, StatementType::Truncate),
        Statement::AlterTable { .. } => (SafetyLevel::Destructive, StatementType::Alter),
        Statement::AlterIndex { .. } => (SafetyLevel::Destructive, StatementType::Alter),
        Statement::AlterView { .. } => (SafetyLevel::Destructive, StatementType::Alter),
        Statement::CreateTable { .. } => (SafetyLevel::Destructive, StatementType::Create),
        Statement::CreateIndex { .. } => (SafetyLevel::Destructive, StatementType::Create),
        Statement::CreateView { .. } => (SafetyLevel::Destructive, StatementType::Create),
        Statement::CreateSchema { .. } => (SafetyLevel::Destructive, StatementType::Create),
        Statement::CreateDatabase { .. } => (SafetyLevel::Destructive, StatementType::Create),
        Statement::Grant { .. } => (SafetyLevel::Destructive, StatementType::Grant),
        Statement::Revoke { .. } => (SafetyLevel::Destructive, StatementType::Revoke),

        // Conservative default: treat unknown statements as destructive
        _ => (SafetyLevel::Destructive, StatementType::Unknown),
    }
}

/// Classifies a Query by recursively inspecting for data-modifying operations.
fn classify_query(query: &Query) -> (SafetyLevel, StatementType) {
    let mut max_level = SafetyLevel::Safe;
    let mut max_type = StatementType::Select;

    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            let (level, stmt_type) = classify_query(&cte.query);
            if level.priority() > max_level.priority() {
                max_level = level;
                max_type = stmt_type;
            }
        }
    }

    let (body_level, body_type) = classify_set_expr(&query.body);
    if body_level.priority() > max_level.priority() {
        max_level = body_level;
        max_type = body_type;
    }

    (max_level, max_type)
}

/// Classifies a SetExpr, detecting mutations and recursing into nested queries.
fn classify_set_expr(set_expr: &SetExpr) -> (SafetyLevel, StatementType) {
    match set_expr {
        SetExpr::Delete(stmt) => classify_statement(stmt),
        SetExpr::Update(stmt) => classify_statement(stmt),
        SetExpr::Insert(stmt) => classify_statement(stmt),
        SetExpr::Merge(stmt) => classify_statement(stmt),

        SetExpr::Query(query) => classify_query(query),

        SetExpr::Select(select) => classify_select(select),

        // UNION, INTERSECT, EXCEPT
        SetExpr::SetOperation { left, right, .. } => {
            let (left_level, left_type) = classify_set_expr(left);
            let (right_level, right_type) = classify_set_expr(right);
            if left_level.priority() >= right_level.priority() {
                (left_level, left_type)
            } else {
                (right_level, right_type)
            }
        }

        SetExpr::Values(_) | SetExpr::Table(_) => (SafetyLevel::Safe, StatementType::Select),
    }
}

fn classify_select(select: &Select) -> (SafetyLevel, StatementType) {
    let mut max_level = SafetyLevel::Safe;
    let mut max_type = StatementType::Select;

    for table_with_joins in &select.from {
        let (level, stmt_type) = classify_table_with_joins(table_with_joins);
        if level.priority() > max_level.priority() {
            max_level = level;
            max_type = stmt_type;
        }
    }

    (max_level, max_type)
}

fn classify_table_with_joins(twj: &TableWithJoins) -> (SafetyLevel, StatementType) {
    let (mut max_level, mut max_type) = classify_table_factor(&twj.relation);

    for join in &twj.joins {
        let (level, stmt_type) = classify_table_factor(&join.relation);
        if level.priority() > max_level.priority() {
            max_level = level;
            max_type = stmt_type;
        }
    }

    (max_level, max_type)
}

/// Classifies a TableFactor, recursing into derived tables (subqueries).
fn classify_table_factor(factor: &TableFactor) -> (SafetyLevel, StatementType) {
    match factor {
        TableFactor::Derived { subquery, .. } => classify_query(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => classify_table_with_joins(table_with_joins),
        _ => (SafetyLevel::Safe, StatementType::Select),
    }
}
