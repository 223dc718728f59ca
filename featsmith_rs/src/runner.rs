//! Execution environments for feature families.
//!
//! A runner turns one enabled family into `<work_dir>/<family>_features.csv`.
//! The in-process runner calls a registered generator directly; the process
//! runner launches a child that receives only the configuration path and
//! reports back through the file it writes and its exit status.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::{PipelineConfig, RunnerKind};
use crate::data::CandleTable;
use crate::error::PipelineError;
use crate::family::{FeatureFamily, FeatureFamilyGenerator, FeatureTable};
use crate::storage::write_frame_atomic;

/// Everything a runner may consult while producing one family.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub config: &'a PipelineConfig,
    pub source: &'a CandleTable,
}

impl RunContext<'_> {
    pub fn work_dir(&self) -> &Path {
        self.config.work_dir()
    }
}

pub trait EnvironmentRunner: Send + Sync {
    /// Produce the family's output file and return its path.
    fn run(&self, family: FeatureFamily, ctx: &RunContext<'_>) -> Result<PathBuf>;
}

/// Generators keyed by the family they produce.
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    generators: BTreeMap<FeatureFamily, Arc<dyn FeatureFamilyGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later registrations for the same family replace earlier ones.
    pub fn register(&mut self, generator: Arc<dyn FeatureFamilyGenerator>) -> &mut Self {
        self.generators.insert(generator.family(), generator);
        self
    }

    pub fn with(mut self, generator: Arc<dyn FeatureFamilyGenerator>) -> Self {
        self.register(generator);
        self
    }

    pub fn get(&self, family: FeatureFamily) -> Result<&Arc<dyn FeatureFamilyGenerator>> {
        self.generators.get(&family).ok_or_else(|| {
            PipelineError::environment(family.name(), "no generator registered").into()
        })
    }

    pub fn families(&self) -> Vec<FeatureFamily> {
        self.generators.keys().copied().collect()
    }
}

/// Generate `family` from `source` and persist it under `work_dir`. Shared by
/// the in-process runner and the child side of process isolation.
pub fn generate_family_output(
    generator: &dyn FeatureFamilyGenerator,
    source: &CandleTable,
    config: &PipelineConfig,
) -> Result<PathBuf> {
    let family = generator.family();
    let started = Instant::now();
    let mut table: FeatureTable = generator
        .generate(source, &config.features)
        .map_err(|err| PipelineError::environment(family.name(), format!("{err:#}")))?;
    table.ensure_rows(source.height())?;

    let path = config.work_dir().join(family.output_file_name());
    write_frame_atomic(table.frame_mut(), &path)?;
    info!(
        family = %family,
        columns = table.width(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Feature family generated"
    );
    Ok(path)
}

pub struct InProcessRunner {
    registry: GeneratorRegistry,
}

impl InProcessRunner {
    pub fn new(registry: GeneratorRegistry) -> Self {
        Self { registry }
    }
}

impl EnvironmentRunner for InProcessRunner {
    fn run(&self, family: FeatureFamily, ctx: &RunContext<'_>) -> Result<PathBuf> {
        let generator = self.registry.get(family)?;
        generate_family_output(generator.as_ref(), ctx.source, ctx.config)
    }
}

/// Runs each family as a child process: `<command> --config <path>`.
///
/// The command comes from the family's `command` setting, or defaults to
/// this executable's `family --name <family>` subcommand.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn argv(&self, family: FeatureFamily, config: &PipelineConfig) -> Result<Vec<String>> {
        if let Some(command) = config.features.toggle(family).command.clone() {
            return Ok(command);
        }
        let program = env::current_exe().context("Failed to locate the current executable")?;
        Ok(vec![
            program.to_string_lossy().into_owned(),
            "family".to_string(),
            "--name".to_string(),
            family.name().to_string(),
        ])
    }
}

/// Last few lines of a child's stderr, for error messages.
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(20);
    lines[start..].join("\n")
}

impl EnvironmentRunner for ProcessRunner {
    fn run(&self, family: FeatureFamily, ctx: &RunContext<'_>) -> Result<PathBuf> {
        let config = ctx.config;
        let work_dir = ctx.work_dir();
        let output = work_dir.join(family.output_file_name());

        // A config that never came from disk is snapshotted for the child,
        // with every path made absolute.
        let snapshot;
        let config_path = match &config.source_file {
            Some(path) => path.clone(),
            None => {
                let mut absolute = config.clone();
                absolute.resolve_relative_paths(&env::current_dir()?);
                std::fs::create_dir_all(work_dir)
                    .with_context(|| format!("Failed to create {}", work_dir.display()))?;
                snapshot = tempfile::Builder::new()
                    .prefix(".featsmith-config-")
                    .suffix(".yaml")
                    .tempfile_in(work_dir)
                    .context("Failed to create config snapshot")?;
                absolute.write_yaml(snapshot.path())?;
                snapshot.path().to_path_buf()
            }
        };

        let argv = self.argv(family, config)?;
        let (program, args) = argv.split_first().ok_or_else(|| {
            PipelineError::configuration(format!("features.{family}.command is empty"))
        })?;
        debug!(family = %family, program = %program, ?args, "Launching family process");

        let started = Instant::now();
        let result = Command::new(program)
            .args(args)
            .arg("--config")
            .arg(&config_path)
            .output()
            .map_err(|err| {
                PipelineError::environment(
                    family.name(),
                    format!("failed to launch {program}: {err}"),
                )
            })?;

        if !result.status.success() {
            return Err(PipelineError::environment(
                family.name(),
                format!(
                    "process exited with {}\n{}",
                    result.status,
                    stderr_tail(&result.stderr)
                ),
            )
            .into());
        }
        if !output.is_file() {
            return Err(PipelineError::environment(
                family.name(),
                format!("process succeeded but {} was not written", output.display()),
            )
            .into());
        }

        info!(
            family = %family,
            runner = "process",
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Feature family generated"
        );
        Ok(output)
    }
}

/// One runner per [`RunnerKind`]; each family's `runner` setting picks.
#[derive(Clone)]
pub struct RunnerSet {
    in_process: Arc<dyn EnvironmentRunner>,
    process: Arc<dyn EnvironmentRunner>,
}

impl RunnerSet {
    pub fn new(in_process: Arc<dyn EnvironmentRunner>, process: Arc<dyn EnvironmentRunner>) -> Self {
        Self {
            in_process,
            process,
        }
    }

    /// In-process generators from `registry`, child processes of the current
    /// executable for process-isolated families.
    pub fn with_registry(registry: GeneratorRegistry) -> Self {
        Self::new(
            Arc::new(InProcessRunner::new(registry)),
            Arc::new(ProcessRunner::new()),
        )
    }

    pub fn for_kind(&self, kind: RunnerKind) -> &dyn EnvironmentRunner {
        match kind {
            RunnerKind::InProcess => self.in_process.as_ref(),
            RunnerKind::Process => self.process.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeaturesConfig;
    use crate::error::pipeline_error;
    use polars::prelude::*;
    use tempfile::tempdir;

    struct Fixed {
        rows: Option<usize>,
    }

    impl FeatureFamilyGenerator for Fixed {
        fn family(&self) -> FeatureFamily {
            FeatureFamily::Relational
        }

        fn generate(&self, source: &CandleTable, _config: &FeaturesConfig) -> Result<FeatureTable> {
            let rows = self.rows.unwrap_or(source.height());
            FeatureTable::new(
                FeatureFamily::Relational,
                vec![Series::new("one", vec![1.0; rows])],
            )
        }
    }

    fn candles() -> CandleTable {
        let df = df!(
            "timestamp" => ["2024-01-01", "2024-01-02", "2024-01-03"],
            "open" => [1.0, 2.0, 3.0],
            "high" => [1.5, 2.5, 3.5],
            "low" => [0.5, 1.5, 2.5],
            "close" => [1.2, 2.2, 3.2],
            "volume" => [10.0, 20.0, 30.0],
        )
        .unwrap();
        CandleTable::from_frame(df).unwrap()
    }

    fn config_in(dir: &Path) -> PipelineConfig {
        let text = r#"
market_data:
  symbol: TEST
  interval: 1d
  start_date: 2024-01-01
  end_date: 2024-01-03
  provider: archive
features:
  relational:
    enabled: true
"#;
        PipelineConfig::from_yaml_str(text, dir).unwrap()
    }

    #[test]
    fn in_process_runner_writes_the_family_file() -> Result<()> {
        let dir = tempdir()?;
        let config = config_in(dir.path());
        let source = candles();
        let runner = InProcessRunner::new(
            GeneratorRegistry::new().with(Arc::new(Fixed { rows: None })),
        );
        let path = runner.run(
            FeatureFamily::Relational,
            &RunContext {
                config: &config,
                source: &source,
            },
        )?;
        assert_eq!(path, dir.path().join("work/relational_features.csv"));
        assert!(path.is_file());
        Ok(())
    }

    #[test]
    fn misaligned_output_is_rejected_before_writing() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let source = candles();
        let runner = InProcessRunner::new(
            GeneratorRegistry::new().with(Arc::new(Fixed { rows: Some(2) })),
        );
        let err = runner
            .run(
                FeatureFamily::Relational,
                &RunContext {
                    config: &config,
                    source: &source,
                },
            )
            .unwrap_err();
        assert!(matches!(
            pipeline_error(&err),
            Some(PipelineError::DataAlignment(_))
        ));
        assert!(!dir.path().join("work/relational_features.csv").exists());
    }

    #[test]
    fn unregistered_family_is_an_environment_error() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let source = candles();
        let runner = InProcessRunner::new(GeneratorRegistry::new());
        let err = runner
            .run(
                FeatureFamily::Stats,
                &RunContext {
                    config: &config,
                    source: &source,
                },
            )
            .unwrap_err();
        assert!(matches!(
            pipeline_error(&err),
            Some(PipelineError::EnvironmentExecution { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn failing_child_process_surfaces_its_stderr() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.features.relational.toggle.command = Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo boom >&2; exit 3".to_string(),
            "featsmith-child".to_string(),
        ]);
        let source = candles();
        let err = ProcessRunner::new()
            .run(
                FeatureFamily::Relational,
                &RunContext {
                    config: &config,
                    source: &source,
                },
            )
            .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("boom"), "{message}");
        assert!(matches!(
            pipeline_error(&err),
            Some(PipelineError::EnvironmentExecution { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn successful_child_without_output_is_an_error() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.features.relational.toggle.command =
            Some(vec!["sh".to_string(), "-c".to_string(), "exit 0".to_string()]);
        let source = candles();
        let err = ProcessRunner::new()
            .run(
                FeatureFamily::Relational,
                &RunContext {
                    config: &config,
                    source: &source,
                },
            )
            .unwrap_err();
        assert!(format!("{err:#}").contains("was not written"));
    }
}
