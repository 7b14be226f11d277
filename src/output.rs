//! Plain rendering of query results for the terminal.

use db_tally::db::QueryResult;
use db_tally::error::{Result, TallyError};
use db_tally::periods::DateWindow;
use serde::Serialize;

/// Output format for results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned text columns.
    #[default]
    Text,
    /// JSON document.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid output format: {s}. Expected: text or json")),
        }
    }
}

/// Renders a single result.
pub fn render(result: &QueryResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(render_table(
            result.columns.iter().map(|c| c.name.clone()).collect(),
            result
                .rows
                .iter()
                .map(|row| row.iter().map(|v| v.to_display_string()).collect())
                .collect(),
        )),
        OutputFormat::Json => to_json(result),
    }
}

#[derive(Serialize)]
struct SeriesEntry<'a> {
    start: String,
    end: String,
    result: &'a QueryResult,
}

/// Renders a time series: one block of rows per window, prefixed with the
/// window's month.
pub fn render_series(results: &[(DateWindow, QueryResult)], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => {
            let mut headers = vec!["month".to_string()];
            if let Some((_, first)) = results.first() {
                headers.extend(first.columns.iter().map(|c| c.name.clone()));
            }
            let mut rows = Vec::new();
            for (window, result) in results {
                for row in &result.rows {
                    let mut cells = vec![window.label()];
                    cells.extend(row.iter().map(|v| v.to_display_string()));
                    rows.push(cells);
                }
            }
            Ok(render_table(headers, rows))
        }
        OutputFormat::Json => {
            let entries: Vec<SeriesEntry<'_>> = results
                .iter()
                .map(|(window, result)| SeriesEntry {
                    start: window.start.to_string(),
                    end: window.end.to_string(),
                    result,
                })
                .collect();
            to_json(&entries)
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| TallyError::internal(format!("Failed to serialize result: {e}")))
}

fn render_table(headers: Vec<String>, rows: Vec<Vec<String>>) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let format_row = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![format_row(&headers)];
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  "),
    );
    lines.extend(rows.iter().map(|r| format_row(r)));
    lines.push(format!("({} rows)", rows.len()));
    lines.join("\n")
}
