// src/summary.rs
use std::collections::BTreeMap;
use tracing::info;

/// Why a source contributed no records. These are outcomes, not errors:
/// each is scoped to one source and never aborts the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SkipReason {
    /// No "Last Update" line matched any accepted format.
    NoTimestamp,
    /// The source could not be fetched or read.
    FetchFailed,
    /// The identifier is already represented in a persisted partition.
    AlreadyProcessed,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::NoTimestamp => "no timestamp",
            SkipReason::FetchFailed => "fetch failed",
            SkipReason::AlreadyProcessed => "already processed",
        }
    }
}

/// Run-end accounting, logged once after the flush.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub sources_seen: usize,
    pub records_produced: usize,
    pub months_written: usize,
    pub months_failed: usize,
    skipped: BTreeMap<SkipReason, usize>,
}

impl RunSummary {
    pub fn record_skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_default() += 1;
    }

    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    pub fn skipped(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    pub fn log(&self) {
        info!(
            sources_seen = self.sources_seen,
            sources_skipped = self.skipped_total(),
            records_produced = self.records_produced,
            months_written = self.months_written,
            months_failed = self.months_failed,
            "run complete"
        );
        for (reason, count) in &self.skipped {
            info!(reason = reason.as_str(), count = *count, "skipped sources");
        }
    }
}
