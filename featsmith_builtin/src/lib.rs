pub mod indicators;
pub mod nonlinear;
pub mod ohlcv;
pub mod relational;
pub mod stats;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use featsmith_rs::data::CandleTable;
use featsmith_rs::error::PipelineError;
use featsmith_rs::family::FeatureFamily;
use featsmith_rs::pipeline::{FeaturePipeline, PipelineReport, resolve_source, run_selection};
use featsmith_rs::runner::{GeneratorRegistry, RunnerSet, generate_family_output};
use featsmith_rs::selection::SelectionResult;
use featsmith_rs::PipelineConfig;
use tracing::info;

pub use nonlinear::NonlinearGenerator;
pub use ohlcv::OhlcvGenerator;
pub use relational::RelationalGenerator;
pub use stats::StatsGenerator;

/// One generator per feature family.
pub fn builtin_generators() -> GeneratorRegistry {
    GeneratorRegistry::new()
        .with(Arc::new(OhlcvGenerator))
        .with(Arc::new(StatsGenerator))
        .with(Arc::new(RelationalGenerator))
        .with(Arc::new(NonlinearGenerator))
}

pub fn builtin_runners() -> RunnerSet {
    RunnerSet::with_registry(builtin_generators())
}

/// Run the full pipeline for `config_path` with the builtin generators.
pub fn run_builtin_pipeline(config_path: &Path) -> Result<PipelineReport> {
    let config = PipelineConfig::load(config_path)?;
    let builder = std::thread::Builder::new()
        .name("featsmith-pipeline".to_string())
        .stack_size(32 * 1024 * 1024);

    let handle = builder
        .spawn(move || -> Result<PipelineReport> {
            FeaturePipeline::new(config, builtin_runners()).run()
        })
        .map_err(|err| anyhow!("failed to spawn featsmith pipeline thread: {err}"))?;

    handle
        .join()
        .map_err(|_| anyhow!("featsmith pipeline thread panicked"))?
}

/// Child side of process isolation: load the configuration, read the
/// cached source candles and write this family's output file.
pub fn run_builtin_family(config_path: &Path, family: FeatureFamily) -> Result<PathBuf> {
    let config = PipelineConfig::load(config_path)?;
    let source_path = config.source_path();
    if !source_path.is_file() {
        return Err(PipelineError::environment(
            family.name(),
            format!("source candles not found at {}", source_path.display()),
        )
        .into());
    }
    let source = CandleTable::load(&source_path)?;
    info!(
        family = %family,
        source = %source_path.display(),
        rows = source.height(),
        "Generating feature family"
    );

    let registry = builtin_generators();
    let generator = registry.get(family)?;
    generate_family_output(generator.as_ref(), &source, &config)
}

/// Selection over an existing unified table, using the selection section of
/// `config_path`. Artifacts go to `output_dir` or the configured output
/// directory.
pub fn run_builtin_selection(
    input: &Path,
    config_path: &Path,
    output_dir: Option<&Path>,
) -> Result<(PathBuf, PathBuf, SelectionResult)> {
    let config = PipelineConfig::load(config_path)?;
    let selection = config.active_selection().ok_or_else(|| {
        PipelineError::configuration(format!(
            "{} has no enabled selection section",
            config_path.display()
        ))
    })?;
    let output_dir = output_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.output_dir());
    run_selection(input, selection, &output_dir)
        .with_context(|| format!("Selection over {} failed", input.display()))
}

/// Populate the source cache from the configured provider.
pub fn fetch_builtin_source(config_path: &Path) -> Result<PathBuf> {
    let config = PipelineConfig::load(config_path)?;
    let (path, table) = resolve_source(&config)?;
    info!(path = %path.display(), rows = table.height(), "Source candles ready");
    Ok(path)
}
