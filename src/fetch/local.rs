// src/fetch/local.rs
use anyhow::{Context, Result};
use glob::glob;
use std::fs;
use std::path::{Path, PathBuf};

use crate::fetch::Source;

/// All `.csv` files under `root`, recursively, in stable sorted order.
pub fn enumerate_dir(root: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/**/*.csv", root.as_ref().display());
    let mut paths: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("bad reports glob {pattern}"))?
        .filter_map(Result::ok)
        .collect();
    paths.sort();
    Ok(paths)
}

/// Root-relative identifier for a report path, normalized to forward
/// slashes so identifiers stay stable across platforms.
pub fn identifier_for(root: impl AsRef<Path>, path: &Path) -> String {
    path.strip_prefix(root.as_ref())
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Read one report from disk with best-effort decoding.
pub fn read_report(identifier: &str, path: &Path) -> Result<Source> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(Source {
        identifier: identifier.to_string(),
        text: String::from_utf8_lossy(&bytes).into_owned(),
    })
}
