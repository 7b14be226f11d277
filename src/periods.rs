//! Date windows for time-series runs.
//!
//! Running one template over consecutive months replaces a stack of
//! near-identical queries that differ only in their date range.

use crate::error::{Result, TallyError};
use crate::template::{Param, Params};
use chrono::{Datelike, Months, NaiveDate};
use std::fmt;

/// Parameter name receiving a window's first day.
pub const START_DATE: &str = "start_date";

/// Parameter name receiving the day after a window's last day.
pub const END_DATE: &str = "end_date";

/// A half-open date range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Creates a window; `start` must come before `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start >= end {
            return Err(TallyError::config(format!(
                "date window start {start} is not before end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Returns `base` with `start_date` and `end_date` set to this window.
    pub fn apply(&self, base: &Params) -> Params {
        let mut params = base.clone();
        params.insert(START_DATE.to_string(), Param::Date(self.start));
        params.insert(END_DATE.to_string(), Param::Date(self.end));
        params
    }

    /// `YYYY-MM` label of the window's first month.
    pub fn label(&self) -> String {
        self.start.format("%Y-%m").to_string()
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Splits `[from, to)` into consecutive calendar-month windows.
///
/// The first window starts at `from` even mid-month, and the last one is
/// cut at `to`.
pub fn monthly_windows(from: NaiveDate, to: NaiveDate) -> Result<Vec<DateWindow>> {
    if from >= to {
        return Err(TallyError::config(format!(
            "monthly range start {from} is not before end {to}"
        )));
    }

    let mut windows = Vec::new();
    let mut start = from;
    while start < to {
        let month_start = start.with_day(1).unwrap_or(start);
        let next = month_start
            .checked_add_months(Months::new(1))
            .ok_or_else(|| TallyError::config(format!("date {start} is out of range")))?;
        let end = next.min(to);
        windows.push(DateWindow { start, end });
        start = end;
    }
    Ok(windows)
}

/// Parses a `FROM..TO` range of ISO dates.
pub fn parse_range(s: &str) -> Result<(NaiveDate, NaiveDate)> {
    let (from, to) = s
        .split_once("..")
        .ok_or_else(|| TallyError::config(format!("expected FROM..TO, got '{s}'")))?;
    let parse = |d: &str| {
        NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d")
            .map_err(|e| TallyError::config(format!("invalid date '{d}': {e}")))
    };
    Ok((parse(from)?, parse(to)?))
}
