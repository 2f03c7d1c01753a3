// src/sink/mod.rs
use anyhow::{Context, Result};
use glob::glob;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Another writer changed the partition since it was read; the caller
    /// must re-read, re-merge and retry rather than overwrite.
    Conflict,
}

/// Durable storage boundary for month partitions. Writes are conditional on
/// the version token returned by `read` (optimistic concurrency), so a
/// month-key write stays a critical section even across processes.
pub trait Sink {
    /// Month keys with persisted content, sorted.
    fn month_keys(&self) -> Result<Vec<String>>;
    /// Current bytes + version token for a month, or `None` if absent.
    fn read(&self, month_key: &str) -> Result<Option<(Vec<u8>, String)>>;
    /// Replace a month's content. `expected_version` is the token from the
    /// `read` this write was based on (`None` for "partition absent").
    fn write(&self, month_key: &str, bytes: &[u8], expected_version: Option<&str>)
        -> Result<WriteOutcome>;
}

static MONTH_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}$").expect("month key regex"));

/// Filesystem sink: one `<YYYY-MM>.csv` per month under `data_dir`.
pub struct FsSink {
    data_dir: PathBuf,
}

impl FsSink {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;
        Ok(Self { data_dir })
    }

    fn partition_path(&self, month_key: &str) -> PathBuf {
        self.data_dir.join(format!("{month_key}.csv"))
    }

    /// Version token from file metadata; changes whenever the file does.
    fn version_token(path: &Path) -> Result<Option<String>> {
        match fs::metadata(path) {
            Ok(meta) => {
                let mtime = meta
                    .modified()
                    .with_context(|| format!("mtime of {}", path.display()))?
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                Ok(Some(format!("{}-{}", meta.len(), mtime.as_nanos())))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("stat {}", path.display())),
        }
    }
}

impl Sink for FsSink {
    fn month_keys(&self) -> Result<Vec<String>> {
        let pattern = format!("{}/*.csv", self.data_dir.display());
        let mut keys = Vec::new();
        for entry in glob(&pattern).context("bad partition glob")? {
            let path = entry?;
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if MONTH_KEY_RE.is_match(stem) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn read(&self, month_key: &str) -> Result<Option<(Vec<u8>, String)>> {
        let path = self.partition_path(month_key);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        match Self::version_token(&path)? {
            Some(version) => Ok(Some((bytes, version))),
            None => Ok(None),
        }
    }

    fn write(
        &self,
        month_key: &str,
        bytes: &[u8],
        expected_version: Option<&str>,
    ) -> Result<WriteOutcome> {
        let path = self.partition_path(month_key);
        let current = Self::version_token(&path)?;
        if current.as_deref() != expected_version {
            return Ok(WriteOutcome::Conflict);
        }
        // Stage then rename so a crash never leaves a torn partition.
        let tmp = self.data_dir.join(format!("{month_key}.csv.tmp"));
        fs::write(&tmp, bytes).with_context(|| format!("staging {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(WriteOutcome::Written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_roundtrips() {
        let tmp = tempdir().unwrap();
        let sink = FsSink::new(tmp.path()).unwrap();

        assert!(sink.read("2024-05").unwrap().is_none());
        assert_eq!(sink.write("2024-05", b"hello", None).unwrap(), WriteOutcome::Written);

        let (bytes, _) = sink.read("2024-05").unwrap().unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(sink.month_keys().unwrap(), vec!["2024-05".to_string()]);
    }

    #[test]
    fn conditional_write_detects_concurrent_writer() {
        let tmp = tempdir().unwrap();
        let sink = FsSink::new(tmp.path()).unwrap();
        sink.write("2024-05", b"v1", None).unwrap();
        let (_, version) = sink.read("2024-05").unwrap().unwrap();

        // A write based on "absent" must conflict now.
        assert_eq!(sink.write("2024-05", b"v2!", None).unwrap(), WriteOutcome::Conflict);
        // A write based on the current version goes through.
        assert_eq!(
            sink.write("2024-05", b"v2!", Some(&version)).unwrap(),
            WriteOutcome::Written
        );
        // The old token is now stale.
        assert_eq!(
            sink.write("2024-05", b"v3", Some(&version)).unwrap(),
            WriteOutcome::Conflict
        );
    }

    #[test]
    fn month_keys_ignore_other_files() {
        let tmp = tempdir().unwrap();
        let sink = FsSink::new(tmp.path()).unwrap();
        sink.write("2024-05", b"x", None).unwrap();
        sink.write("2024-06", b"x", None).unwrap();
        std::fs::write(tmp.path().join("notes.csv"), b"x").unwrap();
        std::fs::write(tmp.path().join("2024-05.csv.tmp"), b"x").unwrap();

        assert_eq!(
            sink.month_keys().unwrap(),
            vec!["2024-05".to_string(), "2024-06".to_string()]
        );
    }
}
