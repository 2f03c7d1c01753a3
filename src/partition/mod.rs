// src/partition/mod.rs

pub mod aggregate;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDateTime;
use csv::{ReaderBuilder, WriterBuilder};
use std::collections::BTreeMap;

use crate::report::fuel::SubType;
use crate::report::record::{capacity_margin, CanonicalRecord};

/// Stable column order of a persisted month partition.
pub const PARTITION_HEADER: [&str; 7] = ["Timestamp", "Type", "SubType", "MC", "TNG", "DCR", "SourceFile"];

const TIMESTAMP_OUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIMESTAMP_IN_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Partition key for a record timestamp, e.g. "2024-05".
pub fn month_key(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m").to_string()
}

/// The durable dataset for one calendar month, grouped by source file so
/// that re-ingesting a file replaces its whole contribution. Invariant: a
/// source identifier appears in at most one group.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthPartition {
    month_key: String,
    groups: BTreeMap<String, Vec<CanonicalRecord>>,
}

impl MonthPartition {
    pub fn new(month_key: impl Into<String>) -> Self {
        Self {
            month_key: month_key.into(),
            groups: BTreeMap::new(),
        }
    }

    pub fn month_key(&self) -> &str {
        &self.month_key
    }

    /// Insert or replace the record group for one source file.
    pub fn insert_group(&mut self, source_id: &str, records: Vec<CanonicalRecord>) {
        self.groups.insert(source_id.to_string(), records);
    }

    /// Merge `other` into self; on a shared source identifier the incoming
    /// group wins (a file is never partially represented).
    pub fn merge_from(&mut self, other: MonthPartition) {
        for (source_id, records) in other.groups {
            self.groups.insert(source_id, records);
        }
    }

    pub fn contains_source(&self, source_id: &str) -> bool {
        self.groups.contains_key(source_id)
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Records in deterministic order (by source id, then row order).
    pub fn records(&self) -> impl Iterator<Item = &CanonicalRecord> {
        self.groups.values().flatten()
    }

    pub fn record_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Serialize to CSV bytes with the stable header. Null numerics are
    /// empty strings, never "nan" or "None".
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut wtr = WriterBuilder::new().from_writer(Vec::new());
        wtr.write_record(PARTITION_HEADER)
            .context("writing partition header")?;
        for rec in self.records() {
            wtr.write_record([
                rec.timestamp.format(TIMESTAMP_OUT_FORMAT).to_string(),
                rec.fuel_type.clone(),
                rec.sub_type.as_str().to_string(),
                fmt_opt(rec.maximum_capacity),
                fmt_opt(rec.net_generation),
                fmt_opt(rec.capacity_margin),
                rec.source_id.clone(),
            ])
            .context("writing partition row")?;
        }
        wtr.into_inner()
            .map_err(|e| anyhow!("finalizing partition csv: {e}"))
    }

    /// Parse previously persisted partition content. The stored DCR column
    /// is ignored and recomputed: it is derived data and the capacity and
    /// generation columns are authoritative.
    pub fn from_csv(month_key: &str, bytes: &[u8]) -> Result<Self> {
        let mut part = MonthPartition::new(month_key);
        let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(bytes);
        for (idx, result) in rdr.records().enumerate() {
            let record = result
                .with_context(|| format!("partition {month_key}: bad csv at row {idx}"))?;
            let get = |i: usize| record.get(i).unwrap_or("").trim();
            let timestamp = parse_timestamp(get(0)).ok_or_else(|| {
                anyhow!("partition {month_key}: bad timestamp {:?} at row {idx}", get(0))
            })?;
            let source_id = get(6);
            if source_id.is_empty() {
                bail!("partition {month_key}: missing source file at row {idx}");
            }
            let mc = get(3).parse::<f64>().ok();
            let tng = get(4).parse::<f64>().ok();
            part.groups
                .entry(source_id.to_string())
                .or_default()
                .push(CanonicalRecord {
                    timestamp,
                    fuel_type: get(1).to_string(),
                    sub_type: SubType::parse(get(2)),
                    maximum_capacity: mc,
                    net_generation: tng,
                    capacity_margin: capacity_margin(mc, tng),
                    source_id: source_id.to_string(),
                });
        }
        Ok(part)
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => String::new(),
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_IN_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}
