// src/report/record.rs
use chrono::NaiveDateTime;

use crate::report::fuel::{classify, SubType};
use crate::report::parse::RowCandidate;

/// A generation-style row needs capacity + generation at minimum.
const GENERATION_MIN_FIELDS: usize = 2;

/// One canonical output record. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub timestamp: NaiveDateTime,
    /// Canonical fuel/interchange name (trimmed source label).
    pub fuel_type: String,
    pub sub_type: SubType,
    pub maximum_capacity: Option<f64>,
    pub net_generation: Option<f64>,
    /// Derived, never independently sourced: see [`capacity_margin`].
    pub capacity_margin: Option<f64>,
    pub source_id: String,
}

/// `MC - TNG` when both are present, else null.
pub fn capacity_margin(mc: Option<f64>, tng: Option<f64>) -> Option<f64> {
    match (mc, tng) {
        (Some(mc), Some(tng)) => Some(mc - tng),
        _ => None,
    }
}

/// Turn one row candidate into a canonical record, or `None` when the row
/// cannot be reconciled (empty label, or a generation row without its two
/// value columns). Interchange rows carry only a flow value, which lands in
/// `net_generation` with capacity null.
pub fn build(
    timestamp: NaiveDateTime,
    source_id: &str,
    candidate: &RowCandidate,
) -> Option<CanonicalRecord> {
    let label = candidate.label.trim();
    if label.is_empty() {
        return None;
    }
    let (fuel_type, sub_type) = classify(label);

    let (mc, tng) = match sub_type {
        SubType::Interchange => (None, candidate.numeric_fields.first().copied().flatten()),
        _ => {
            if candidate.numeric_fields.len() < GENERATION_MIN_FIELDS {
                return None;
            }
            (candidate.numeric_fields[0], candidate.numeric_fields[1])
        }
    };

    Some(CanonicalRecord {
        timestamp,
        fuel_type,
        sub_type,
        maximum_capacity: mc,
        net_generation: tng,
        capacity_margin: capacity_margin(mc, tng),
        source_id: source_id.to_string(),
    })
}
