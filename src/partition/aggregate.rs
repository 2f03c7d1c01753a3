// src/partition/aggregate.rs
use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashSet};
use tracing::{error, info, warn};

use crate::partition::{month_key, MonthPartition};
use crate::report::record::CanonicalRecord;
use crate::sink::{Sink, WriteOutcome};

/// Conflicting partition writes are re-merged this many times before the
/// month is surfaced as failed.
const MAX_WRITE_RETRIES: usize = 3;

/// Rebuild the already-processed source set from persisted partitions. This
/// is derived state: it is never stored on its own, so it cannot diverge
/// from the actual output.
pub fn load_processed(sink: &dyn Sink) -> Result<HashSet<String>> {
    let mut processed = HashSet::new();
    for key in sink.month_keys()? {
        let Some((bytes, _)) = sink.read(&key)? else {
            continue;
        };
        let part = MonthPartition::from_csv(&key, &bytes)?;
        processed.extend(part.source_ids().map(str::to_string));
    }
    Ok(processed)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FlushStats {
    pub months_written: usize,
    pub months_failed: usize,
    /// Total records in the partitions that were written (after merging
    /// with prior content).
    pub records_flushed: usize,
}

/// Collects canonical records across sources, bucketed by calendar month,
/// and materializes each touched month through a [`Sink`]. Owns all
/// in-memory partition state for a run; nothing is persisted until `flush`.
pub struct MonthlyAggregator {
    processed: HashSet<String>,
    months: BTreeMap<String, MonthPartition>,
}

impl MonthlyAggregator {
    pub fn new(processed: HashSet<String>) -> Self {
        Self {
            processed,
            months: BTreeMap::new(),
        }
    }

    /// Buffer one source file's records. Returns `false` (and ingests
    /// nothing) when the identifier was already processed, so re-runs are
    /// idempotent.
    pub fn ingest(&mut self, source_id: &str, records: Vec<CanonicalRecord>) -> bool {
        if !self.processed.insert(source_id.to_string()) {
            return false;
        }
        let mut by_month: BTreeMap<String, Vec<CanonicalRecord>> = BTreeMap::new();
        for rec in records {
            by_month.entry(month_key(&rec.timestamp)).or_default().push(rec);
        }
        for (key, group) in by_month {
            self.months
                .entry(key.clone())
                .or_insert_with(|| MonthPartition::new(key))
                .insert_group(source_id, group);
        }
        true
    }

    pub fn pending_months(&self) -> usize {
        self.months.len()
    }

    /// Materialize every touched month. Failures are scoped to their month:
    /// a month that cannot be written is counted and logged without
    /// affecting its siblings. Buffered state is consumed either way, so an
    /// interrupted batch never leaks partial partitions into a later flush.
    pub fn flush(&mut self, sink: &dyn Sink) -> FlushStats {
        let mut stats = FlushStats::default();
        for (key, update) in std::mem::take(&mut self.months) {
            if update.is_empty() {
                continue;
            }
            match flush_month(sink, &key, &update) {
                Ok(total) => {
                    stats.months_written += 1;
                    stats.records_flushed += total;
                }
                Err(e) => {
                    error!(month = %key, "partition flush failed: {e:#}");
                    stats.months_failed += 1;
                }
            }
        }
        stats
    }
}

/// Read-merge-write one month with optimistic concurrency: re-read and
/// re-merge on conflict so a concurrent writer's records are never lost.
fn flush_month(sink: &dyn Sink, key: &str, update: &MonthPartition) -> Result<usize> {
    for attempt in 1..=MAX_WRITE_RETRIES {
        let (mut merged, version) = match sink.read(key)? {
            Some((bytes, version)) => (MonthPartition::from_csv(key, &bytes)?, Some(version)),
            None => (MonthPartition::new(key), None),
        };
        merged.merge_from(update.clone());
        let bytes = merged.to_csv()?;
        match sink.write(key, &bytes, version.as_deref())? {
            WriteOutcome::Written => {
                info!(month = %key, records = merged.record_count(), "partition written");
                return Ok(merged.record_count());
            }
            WriteOutcome::Conflict => {
                warn!(month = %key, attempt, "concurrent partition write, re-merging");
            }
        }
    }
    bail!("gave up after {MAX_WRITE_RETRIES} conflicting writes");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{parse_report, record};
    use crate::sink::FsSink;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn ts(mo: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, mo, d)
            .unwrap()
            .and_hms_opt(16, 19, 0)
            .unwrap()
    }

    fn parse_records(source_id: &str, text: &str) -> Vec<CanonicalRecord> {
        let parsed = parse_report(text);
        let ts = parsed.timestamp.unwrap();
        parsed
            .rows
            .iter()
            .filter_map(|c| record::build(ts, source_id, c))
            .collect()
    }

    fn sample_report(day: u32, gas_mc: f64) -> String {
        format!(
            "Current Supply Demand Report\n,,\nLast Update : 2024-05-{day:02} 16:19\n,,\nGROUP,MC,TNG\nGas,{gas_mc},80.0\nWind,40,35\nInterchange BC,-55,0\n"
        )
    }

    #[test]
    fn end_to_end_single_report() {
        let tmp = tempdir().unwrap();
        let sink = FsSink::new(tmp.path()).unwrap();
        let mut agg = MonthlyAggregator::new(HashSet::new());

        let records = parse_records("2024-05-10/csd.csv", &sample_report(10, 100.0));
        assert_eq!(records.len(), 3);
        assert!(agg.ingest("2024-05-10/csd.csv", records));

        let stats = agg.flush(&sink);
        assert_eq!(stats.months_written, 1);
        assert_eq!(stats.months_failed, 0);
        assert_eq!(stats.records_flushed, 3);

        let (bytes, _) = sink.read("2024-05").unwrap().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("Timestamp,Type,SubType,MC,TNG,DCR,SourceFile\n"));
        assert!(text.contains("2024-05-10 16:19:00,Gas,Fossil,100,80,20,2024-05-10/csd.csv"));
        assert!(text.contains("Interchange BC,Interchange,,-55,,"));
    }

    #[test]
    fn reingesting_a_source_never_duplicates() {
        let tmp = tempdir().unwrap();
        let sink = FsSink::new(tmp.path()).unwrap();
        let mut agg = MonthlyAggregator::new(HashSet::new());

        let records = parse_records("a.csv", &sample_report(10, 100.0));
        assert!(agg.ingest("a.csv", records.clone()));
        assert!(!agg.ingest("a.csv", records));
        agg.flush(&sink);

        let (bytes, _) = sink.read("2024-05").unwrap().unwrap();
        let part = MonthPartition::from_csv("2024-05", &bytes).unwrap();
        assert_eq!(part.record_count(), 3);
        assert_eq!(part.source_ids().count(), 1);
    }

    #[test]
    fn two_sources_same_month_union_into_one_partition() {
        let tmp = tempdir().unwrap();
        let sink = FsSink::new(tmp.path()).unwrap();
        let mut agg = MonthlyAggregator::new(HashSet::new());

        agg.ingest("a.csv", parse_records("a.csv", &sample_report(10, 100.0)));
        agg.ingest("b.csv", parse_records("b.csv", &sample_report(11, 90.0)));
        let stats = agg.flush(&sink);
        assert_eq!(stats.months_written, 1);

        let (bytes, _) = sink.read("2024-05").unwrap().unwrap();
        let part = MonthPartition::from_csv("2024-05", &bytes).unwrap();
        assert_eq!(part.record_count(), 6);
        let sources: Vec<_> = part.source_ids().collect();
        assert_eq!(sources, vec!["a.csv", "b.csv"]);
    }

    #[test]
    fn flushes_merge_into_existing_partition_across_runs() {
        let tmp = tempdir().unwrap();
        let sink = FsSink::new(tmp.path()).unwrap();

        let mut agg = MonthlyAggregator::new(HashSet::new());
        agg.ingest("a.csv", parse_records("a.csv", &sample_report(10, 100.0)));
        agg.flush(&sink);

        // Second run rebuilds the processed set and adds a new source.
        let processed = load_processed(&sink).unwrap();
        assert!(processed.contains("a.csv"));
        let mut agg = MonthlyAggregator::new(processed);
        assert!(!agg.ingest("a.csv", parse_records("a.csv", &sample_report(10, 100.0))));
        assert!(agg.ingest("b.csv", parse_records("b.csv", &sample_report(12, 95.0))));
        agg.flush(&sink);

        let (bytes, _) = sink.read("2024-05").unwrap().unwrap();
        let part = MonthPartition::from_csv("2024-05", &bytes).unwrap();
        assert_eq!(part.source_ids().count(), 2);
        assert_eq!(part.record_count(), 6);
    }

    #[test]
    fn records_bucket_by_calendar_month() {
        let tmp = tempdir().unwrap();
        let sink = FsSink::new(tmp.path()).unwrap();
        let mut agg = MonthlyAggregator::new(HashSet::new());

        let mut records = parse_records("a.csv", &sample_report(31, 100.0));
        for rec in &mut records[..1] {
            rec.timestamp = ts(6, 1);
        }
        agg.ingest("a.csv", records);
        assert_eq!(agg.pending_months(), 2);
        let stats = agg.flush(&sink);
        assert_eq!(stats.months_written, 2);
        assert_eq!(sink.month_keys().unwrap(), vec!["2024-05", "2024-06"]);
    }

    /// Sink wrapper that reports a conflict for the first N writes.
    struct ConflictingSink {
        inner: FsSink,
        conflicts_left: Mutex<usize>,
    }

    impl Sink for ConflictingSink {
        fn month_keys(&self) -> Result<Vec<String>> {
            self.inner.month_keys()
        }
        fn read(&self, month_key: &str) -> Result<Option<(Vec<u8>, String)>> {
            self.inner.read(month_key)
        }
        fn write(
            &self,
            month_key: &str,
            bytes: &[u8],
            expected_version: Option<&str>,
        ) -> Result<WriteOutcome> {
            let mut left = self.conflicts_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Ok(WriteOutcome::Conflict);
            }
            self.inner.write(month_key, bytes, expected_version)
        }
    }

    #[test]
    fn conflicting_write_is_retried_with_fresh_merge() {
        let tmp = tempdir().unwrap();
        let sink = ConflictingSink {
            inner: FsSink::new(tmp.path()).unwrap(),
            conflicts_left: Mutex::new(1),
        };

        let mut agg = MonthlyAggregator::new(HashSet::new());
        agg.ingest("a.csv", parse_records("a.csv", &sample_report(10, 100.0)));
        let stats = agg.flush(&sink);
        assert_eq!(stats.months_written, 1);
        assert_eq!(stats.months_failed, 0);
        assert!(sink.inner.read("2024-05").unwrap().is_some());
    }

    #[test]
    fn persistent_conflict_fails_only_that_month() {
        let tmp = tempdir().unwrap();
        let sink = ConflictingSink {
            inner: FsSink::new(tmp.path()).unwrap(),
            conflicts_left: Mutex::new(MAX_WRITE_RETRIES),
        };

        let mut agg = MonthlyAggregator::new(HashSet::new());
        let mut may = parse_records("a.csv", &sample_report(10, 100.0));
        for rec in &mut may {
            rec.timestamp = ts(5, 10);
        }
        let mut june = parse_records("b.csv", &sample_report(10, 90.0));
        for rec in &mut june {
            rec.timestamp = ts(6, 10);
        }
        agg.ingest("a.csv", may);
        agg.ingest("b.csv", june);

        let stats = agg.flush(&sink);
        // The first month burns all injected conflicts; the second lands.
        assert_eq!(stats.months_written, 1);
        assert_eq!(stats.months_failed, 1);
        assert_eq!(sink.inner.month_keys().unwrap(), vec!["2024-06"]);
    }

    #[test]
    fn load_processed_on_empty_sink_is_empty() {
        let tmp = tempdir().unwrap();
        let sink = FsSink::new(tmp.path()).unwrap();
        assert!(load_processed(&sink).unwrap().is_empty());
    }
}
