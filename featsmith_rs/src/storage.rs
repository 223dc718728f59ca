use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use polars::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Unified feature table with target.
pub const FULL_TABLE_FILE: &str = "X_full.csv";
/// Top-k feature table with target.
pub const SELECTED_TABLE_FILE: &str = "X_selected.csv";
pub const METADATA_FILE: &str = "metadata.json";

/// Suffix carried by in-flight writes until they are renamed into place.
pub const PARTIAL_SUFFIX: &str = ".partial";
const TEMP_PREFIX: &str = ".featsmith-";

pub const FINAL_ARTIFACTS: [&str; 3] = [FULL_TABLE_FILE, SELECTED_TABLE_FILE, METADATA_FILE];

fn temp_sibling(path: &Path) -> Result<tempfile::NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(PARTIAL_SUFFIX)
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))
}

fn persist(tmp: tempfile::NamedTempFile, path: &Path) -> Result<()> {
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to flush {}", tmp.path().display()))?;
    tmp.persist(path).map_err(|err| {
        anyhow!("Failed to move finished file into {}: {}", path.display(), err.error)
    })?;
    Ok(())
}

/// Write `df` as CSV next to `path`, then rename over it. Readers see
/// either the previous file or the complete new one.
pub fn write_frame_atomic(df: &mut DataFrame, path: &Path) -> Result<()> {
    let mut tmp = temp_sibling(path)?;
    CsvWriter::new(tmp.as_file_mut())
        .include_header(true)
        .finish(df)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    persist(tmp, path)?;

    info!(
        rows = df.height(),
        columns = df.width(),
        path = %path.display(),
        "Table written"
    );
    Ok(())
}

/// Pretty-printed JSON with the same write-then-rename guarantee.
pub fn write_json_atomic<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let mut tmp = temp_sibling(path)?;
    let body = serde_json::to_vec_pretty(value).context("Failed to serialize JSON document")?;
    tmp.as_file_mut()
        .write_all(&body)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    persist(tmp, path)?;
    info!(path = %path.display(), bytes = body.len(), "JSON document written");
    Ok(())
}

pub fn read_frame(path: &Path) -> Result<DataFrame> {
    crate::data::read_csv(path)
}

/// Delete final artifacts left behind by a previous run in `output_dir`.
pub fn remove_stale_artifacts(output_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for name in FINAL_ARTIFACTS {
        let path = output_dir.join(name);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove stale artifact {}", path.display()))?;
            warn!(path = %path.display(), "Removed artifact from a previous run");
            removed.push(path);
        }
    }
    Ok(removed)
}

/// Hex SHA-256 of a file's bytes, recorded so a selection can be traced
/// back to the exact candles it was computed from.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("Unable to open {} for fingerprinting", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
