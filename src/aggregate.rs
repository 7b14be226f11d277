//! Derived quantities from separately measured counts.
//!
//! The intersection of two sets is recovered from three counts with the
//! inclusion-exclusion identity `|A ∩ B| = |A| + |B| - |A ∪ B|`. That only
//! holds when the three counts were taken over the same base filters
//! (snapshot, date range, namespace), so scoped counts carry those filters
//! and are checked before any arithmetic.

use std::collections::BTreeMap;

use crate::db::QueryResult;
use crate::error::{Result, TallyError};
use crate::template::{BoundQuery, Param};

/// Returns `count_a + count_b - count_union`.
///
/// Fails with `InvalidOverlap` when the result would be negative, or when
/// `count_union` is smaller than either set (the union cannot have been
/// inclusive of both).
pub fn pairwise_overlap(count_a: u64, count_b: u64, count_union: u64) -> Result<u64> {
    let total = count_a as u128 + count_b as u128;
    let union = count_union as u128;

    if total < union {
        return Err(TallyError::overlap(format!(
            "{count_a} + {count_b} < union {count_union}; the union count covers rows neither set counted"
        )));
    }
    if union < count_a.max(count_b) as u128 {
        return Err(TallyError::overlap(format!(
            "union {count_union} is smaller than one of its sets ({count_a}, {count_b})"
        )));
    }

    // total - union <= min(a, b), so this fits in u64.
    Ok((total - union) as u64)
}

/// Share of `part` in `whole`, in `[0, 1]`.
pub fn proportion(part: u64, whole: u64) -> Result<f64> {
    if whole == 0 {
        return Err(TallyError::overlap("proportion of an empty set"));
    }
    if part > whole {
        return Err(TallyError::overlap(format!(
            "part {part} exceeds whole {whole}"
        )));
    }
    Ok(part as f64 / whole as f64)
}

/// A count together with the base filters it was measured under.
#[derive(Debug, Clone, PartialEq)]
pub struct SetCount {
    pub count: u64,
    pub scope: BTreeMap<String, Param>,
}

impl SetCount {
    /// Creates a count with an explicit scope.
    pub fn new(count: u64, scope: BTreeMap<String, Param>) -> Self {
        Self { count, scope }
    }

    /// Reads `column` from `result` and scopes it by the parameters of
    /// `query` named in `scope_keys`.
    ///
    /// Every scope key must have been bound; a count whose scope cannot be
    /// established cannot be compared with anything.
    pub fn from_result(
        query: &BoundQuery,
        result: &QueryResult,
        column: &str,
        scope_keys: &[&str],
    ) -> Result<Self> {
        let count = result
            .scalar_count(column)
            .map_err(|e| e.in_context(&query.context()))?;

        let mut scope = BTreeMap::new();
        for key in scope_keys {
            let value = query.parameters().get(*key).ok_or_else(|| {
                TallyError::overlap(format!(
                    "{} was not bound with scope parameter '{key}'",
                    query.context()
                ))
            })?;
            scope.insert((*key).to_string(), value.clone());
        }

        Ok(Self { count, scope })
    }
}

/// Inclusion-exclusion over scoped counts.
///
/// Fails with `InvalidOverlap` unless all three counts share one scope.
pub fn overlap(a: &SetCount, b: &SetCount, union: &SetCount) -> Result<u64> {
    for (label, other) in [("b", b), ("union", union)] {
        if other.scope != a.scope {
            return Err(TallyError::overlap(format!(
                "count '{label}' was measured under {} but 'a' under {}",
                describe_scope(&other.scope),
                describe_scope(&a.scope)
            )));
        }
    }
    pairwise_overlap(a.count, b.count, union.count)
}

fn describe_scope(scope: &BTreeMap<String, Param>) -> String {
    if scope.is_empty() {
        return "no filters".to_string();
    }
    scope
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}
