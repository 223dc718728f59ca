use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use polars::prelude::*;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{PipelineConfig, SelectionConfig};
use crate::data::CandleTable;
use crate::error::PipelineError;
use crate::family::FeatureFamily;
use crate::merge::{clear_work_dir, merge_family_outputs};
use crate::provider::{fetch_if_needed, provider_for};
use crate::runner::{RunContext, RunnerSet};
use crate::selection::{SelectionMetadata, SelectionResult, select};
use crate::storage::{
    FULL_TABLE_FILE, METADATA_FILE, SELECTED_TABLE_FILE, file_sha256, read_frame,
    remove_stale_artifacts, write_frame_atomic, write_json_atomic,
};
use crate::target::derive_target;

/// What a completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub source_path: PathBuf,
    pub output_dir: PathBuf,
    pub full_path: PathBuf,
    pub selected_path: Option<PathBuf>,
    pub metadata_path: Option<PathBuf>,
    pub families: Vec<FeatureFamily>,
    /// Rows of `X_full.csv`.
    pub rows: usize,
    /// Columns of `X_full.csv`, `target` included.
    pub columns: Vec<String>,
    pub selection: Option<SelectionResult>,
}

/// Locate the cached source candles, fetching them through the configured
/// provider when the cache file is missing.
pub fn resolve_source(config: &PipelineConfig) -> Result<(PathBuf, CandleTable)> {
    let path = config.source_path();
    if path.is_file() {
        let table = CandleTable::load(&path)?;
        info!(path = %path.display(), rows = table.height(), "Source candles loaded");
        return Ok((path, table));
    }

    let md = &config.market_data;
    let provider = provider_for(&md.provider, md.archive.as_deref()).with_context(|| {
        format!("Source file {} does not exist", path.display())
    })?;
    let (path, fetched) = fetch_if_needed(
        &config.request(),
        &config.paths.data_root,
        provider.as_ref(),
        md.save_to_csv,
    )?;
    let table = match fetched {
        Some(table) => table,
        None => CandleTable::load(&path)?,
    };
    Ok((path, table))
}

/// Persist `X_selected.csv` and `metadata.json` into `output_dir`.
pub fn persist_selection(
    output_dir: &Path,
    mut selected: DataFrame,
    result: SelectionResult,
    source: Option<&Path>,
) -> Result<(PathBuf, PathBuf)> {
    let source_sha256 = match source {
        Some(path) if path.is_file() => Some(file_sha256(path)?),
        _ => None,
    };
    let selected_path = output_dir.join(SELECTED_TABLE_FILE);
    write_frame_atomic(&mut selected, &selected_path)?;

    let metadata = SelectionMetadata::new(result, &selected, source_sha256);
    let metadata_path = output_dir.join(METADATA_FILE);
    write_json_atomic(&metadata, &metadata_path)?;
    Ok((selected_path, metadata_path))
}

/// Feature generation, merge, target derivation and selection for one
/// configuration.
pub struct FeaturePipeline {
    config: PipelineConfig,
    runners: RunnerSet,
}

impl FeaturePipeline {
    pub fn new(config: PipelineConfig, runners: RunnerSet) -> Self {
        Self { config, runners }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn generate_families(&self, families: &[FeatureFamily], source: &CandleTable) -> Result<()> {
        let ctx = RunContext {
            config: &self.config,
            source,
        };
        let run_one = |family: &FeatureFamily| -> Result<PathBuf> {
            let kind = self.config.features.toggle(*family).runner;
            self.runners
                .for_kind(kind)
                .run(*family, &ctx)
                .with_context(|| format!("Feature family '{family}' failed"))
        };

        if self.config.features.parallel && families.len() > 1 {
            info!(families = families.len(), "Generating feature families in parallel");
            // Collecting is the barrier: merge starts only after every family returns.
            families
                .par_iter()
                .map(run_one)
                .collect::<Result<Vec<_>>>()?;
        } else {
            for family in families {
                run_one(family)?;
            }
        }
        Ok(())
    }

    pub fn run(&self) -> Result<PipelineReport> {
        let started = Instant::now();
        let config = &self.config;
        let families = config.features.enabled_families();
        let output_dir = config.output_dir();
        info!(
            symbol = %config.market_data.symbol,
            interval = %config.market_data.interval,
            families = ?families.iter().map(|f| f.name()).collect::<Vec<_>>(),
            parallel = config.features.parallel,
            selection = config.active_selection().is_some(),
            output = %output_dir.display(),
            "Starting feature pipeline"
        );

        let (source_path, source) = resolve_source(config)?;
        if source.height() < 2 {
            return Err(PipelineError::InsufficientData {
                rows: source.height(),
                required: 2,
            }
            .into());
        }

        let work_dir = config.work_dir();
        fs::create_dir_all(work_dir)
            .with_context(|| format!("Failed to create {}", work_dir.display()))?;
        let cleared = clear_work_dir(work_dir)?;
        if !cleared.is_empty() {
            info!(files = cleared.len(), "Cleared previous family outputs");
        }
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;
        remove_stale_artifacts(&output_dir)?;

        if families.is_empty() {
            warn!("No feature families are enabled");
        }
        let generate_start = Instant::now();
        self.generate_families(&families, &source)?;
        info!(
            elapsed_ms = generate_start.elapsed().as_millis() as u64,
            "Feature families finished"
        );

        let merged = merge_family_outputs(work_dir, Some(source.height()))?;
        let mut full = derive_target(merged)?;
        let full_path = output_dir.join(FULL_TABLE_FILE);
        write_frame_atomic(&mut full, &full_path)?;
        let columns: Vec<String> = full
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();

        let mut report = PipelineReport {
            source_path: source_path.clone(),
            output_dir: output_dir.clone(),
            full_path,
            selected_path: None,
            metadata_path: None,
            families,
            rows: full.height(),
            columns,
            selection: None,
        };

        match config.active_selection() {
            Some(selection) => {
                let (selected, result) = select(&full, selection)?;
                let (selected_path, metadata_path) =
                    persist_selection(&output_dir, selected, result.clone(), Some(&source_path))?;
                report.selected_path = Some(selected_path);
                report.metadata_path = Some(metadata_path);
                report.selection = Some(result);
            }
            None => info!("Selection not configured; stopping after the unified table"),
        }

        info!(
            rows = report.rows,
            columns = report.columns.len(),
            elapsed_sec = started.elapsed().as_secs_f64(),
            "Feature pipeline complete"
        );
        Ok(report)
    }
}

/// Load `config_path` and run the whole pipeline with `runners`.
pub fn run_pipeline(config_path: &Path, runners: RunnerSet) -> Result<PipelineReport> {
    let config = PipelineConfig::load(config_path)?;
    FeaturePipeline::new(config, runners).run()
}

/// Select over an existing unified table and write the selection artifacts
/// into `output_dir`.
pub fn run_selection(
    input: &Path,
    selection: &SelectionConfig,
    output_dir: &Path,
) -> Result<(PathBuf, PathBuf, SelectionResult)> {
    let frame = read_frame(input)?;
    info!(
        path = %input.display(),
        rows = frame.height(),
        columns = frame.width(),
        "Unified table loaded for selection"
    );
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let (selected, result) = select(&frame, selection)?;
    let (selected_path, metadata_path) =
        persist_selection(output_dir, selected, result.clone(), None)?;
    Ok((selected_path, metadata_path, result))
}
