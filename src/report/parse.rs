// src/report/parse.rs
use chrono::NaiveDateTime;
use csv::ReaderBuilder;

use crate::report::fuel;

/// Report layouts drift in header length, so the "Last Update" line is
/// searched for within this many leading lines rather than at a fixed row.
const HEADER_SCAN_LINES: usize = 16;

/// Accepted date-time formats for the "Last Update" value, tried in order.
const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S", "%b %d, %Y %H:%M"];

const UPDATE_LABEL: &str = "Last Update";

/// A row must have at least this many cells (label + two value columns)
/// to count as part of the data table.
const MIN_ROW_CELLS: usize = 3;

/// One candidate data row: the raw label plus every subsequent cell coerced
/// to a float. Cells that do not parse stay `None`; meaning is assigned
/// later by the row builder, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct RowCandidate {
    pub label: String,
    pub numeric_fields: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReport {
    /// `None` when no "Last Update" line was found; the report then
    /// contributes no records but must not abort the batch.
    pub timestamp: Option<NaiveDateTime>,
    pub rows: Vec<RowCandidate>,
}

/// Parse one raw report. Pure function of the text: no I/O, no state, and
/// no error path at all (an unusable report simply yields no timestamp).
pub fn parse_report(text: &str) -> ParsedReport {
    ParsedReport {
        timestamp: extract_timestamp(text),
        rows: extract_rows(text),
    }
}

/// Trim whitespace + strip outer quotes if present.
fn clean_cell(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    }
}

fn parse_float(raw: &str) -> Option<f64> {
    let cell = clean_cell(raw);
    if cell.is_empty() {
        return None;
    }
    cell.parse::<f64>().ok()
}

/// Scan the leading lines for a "Last Update" label and try each accepted
/// format against the value after the label's colon. First match wins.
fn extract_timestamp(text: &str) -> Option<NaiveDateTime> {
    for line in text.lines().take(HEADER_SCAN_LINES) {
        let idx = match line.find(UPDATE_LABEL) {
            Some(i) => i,
            None => continue,
        };
        let rest = &line[idx + UPDATE_LABEL.len()..];
        let value = match rest.find(':') {
            Some(c) => &rest[c + 1..],
            None => continue,
        };
        // The value may carry trailing empty CSV cells and quoting.
        let value = value.trim().trim_end_matches(',').trim_matches('"').trim();
        for fmt in TIMESTAMP_FORMATS {
            if let Ok(ts) = NaiveDateTime::parse_from_str(value, fmt) {
                return Some(ts);
            }
        }
    }
    None
}

/// Locate the data table by content anchor: the first row whose first cell
/// is a known fuel name starts the table, and every well-formed row from
/// there on is a candidate. No fixed offsets; observed layouts disagree on
/// where the table sits.
fn extract_rows(text: &str) -> Vec<RowCandidate> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    let mut in_table = false;
    for result in rdr.records() {
        let record = match result {
            Ok(r) => r,
            // A mangled row never aborts the report.
            Err(_) => continue,
        };
        let label = record.get(0).map(clean_cell).unwrap_or("");
        if !in_table {
            if fuel::is_known_fuel(label) {
                in_table = true;
            } else {
                continue;
            }
        }
        if label.is_empty() || record.len() < MIN_ROW_CELLS {
            continue;
        }
        let numeric_fields = (1..record.len())
            .map(|i| parse_float(record.get(i).unwrap_or("")))
            .collect();
        rows.push(RowCandidate {
            label: label.to_string(),
            numeric_fields,
        });
    }
    rows
}
