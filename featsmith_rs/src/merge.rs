use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use polars::prelude::*;
use tracing::{info, warn};

use crate::data::read_csv;
use crate::error::PipelineError;
use crate::family::{FEATURE_FILE_SUFFIX, FeatureFamily};
use crate::storage::PARTIAL_SUFFIX;

/// Create `dir` if needed and delete every family output and unfinished
/// write left in it. Returns the removed paths.
pub fn clear_work_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let mut removed = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = file_name(&path);
        if name.ends_with(FEATURE_FILE_SUFFIX) || name.ends_with(PARTIAL_SUFFIX) {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove stale output {}", path.display()))?;
            warn!(path = %path.display(), "Removed stale feature output");
            removed.push(path);
        }
    }
    removed.sort();
    Ok(removed)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `*_features.csv` files in `dir`: known families in their fixed order,
/// then anything else by file name.
pub fn discover_family_outputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found: Vec<(usize, String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        let name = file_name(&path);
        let Some(stem) = name.strip_suffix(FEATURE_FILE_SUFFIX) else {
            continue;
        };
        if !path.is_file() || name.starts_with('.') {
            continue;
        }
        let rank = stem
            .parse::<FeatureFamily>()
            .map(FeatureFamily::position)
            .unwrap_or(FeatureFamily::ALL.len());
        found.push((rank, name, path));
    }
    found.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
    Ok(found.into_iter().map(|(_, _, path)| path).collect())
}

/// Column-wise concatenation of named tables. Every table must have the
/// same height (and `expected_rows` when given); column names must be
/// unique across tables.
pub fn concat_columns(
    tables: Vec<(String, DataFrame)>,
    expected_rows: Option<usize>,
) -> Result<DataFrame> {
    let Some(reference) = tables.first() else {
        return Err(PipelineError::NoFeatures("no feature family outputs to merge".into()).into());
    };
    let rows = expected_rows.unwrap_or(reference.1.height());

    let mut owners: HashMap<String, String> = HashMap::new();
    let mut columns: Vec<Series> = Vec::new();
    for (source, frame) in tables {
        if frame.height() != rows {
            return Err(PipelineError::DataAlignment(format!(
                "{source} has {} rows, expected {rows}",
                frame.height()
            ))
            .into());
        }
        for series in frame.get_columns() {
            let name = series.name().to_string();
            if let Some(previous) = owners.get(&name) {
                return Err(PipelineError::configuration(format!(
                    "column '{name}' is produced by both {previous} and {source}"
                ))
                .into());
            }
            owners.insert(name, source.clone());
            columns.push(series.clone());
        }
    }

    DataFrame::new(columns).context("Failed to assemble unified feature table")
}

/// Read every family output in `dir` and merge them into one table.
pub fn merge_family_outputs(dir: &Path, expected_rows: Option<usize>) -> Result<DataFrame> {
    let paths = discover_family_outputs(dir)?;
    if paths.is_empty() {
        return Err(PipelineError::NoFeatures(format!(
            "no *{FEATURE_FILE_SUFFIX} files in {}",
            dir.display()
        ))
        .into());
    }

    let mut tables = Vec::with_capacity(paths.len());
    for path in &paths {
        let frame = read_csv(path)?;
        info!(
            path = %path.display(),
            rows = frame.height(),
            columns = frame.width(),
            "Family output loaded"
        );
        tables.push((file_name(path), frame));
    }

    let merged = concat_columns(tables, expected_rows)?;
    info!(
        families = paths.len(),
        rows = merged.height(),
        columns = merged.width(),
        "Family outputs merged"
    );
    Ok(merged)
}
