use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::family::FeatureFamily;
use crate::metrics::MetricKind;
use crate::models::{
    KnnParams, LogisticRegressionParams, ModelKind, RandomForestParams, XgboostParams,
};
use crate::provider::MarketDataRequest;

/// Indicator groups understood by the `ohlcv` family. `indicators: all`
/// expands to this list in this order.
pub const OHLCV_INDICATORS: [&str; 12] = [
    "rsi",
    "ema",
    "sma",
    "macd",
    "bollinger",
    "williams_r",
    "stoch",
    "atr",
    "adx",
    "obv",
    "cci",
    "roc",
];

/// Top-level pipeline document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    /// When absent the run stops after writing `X_full.csv`.
    #[serde(default)]
    pub selection: Option<SelectionConfig>,
    /// File this configuration was loaded from. Process-isolated families
    /// receive this path and nothing else.
    #[serde(skip)]
    pub source_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    pub symbol: String,
    pub interval: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub provider: String,
    /// Local candle archive used to populate the source cache when the
    /// source file does not exist yet.
    #[serde(default)]
    pub archive: Option<PathBuf>,
    #[serde(default = "default_save_to_csv")]
    pub save_to_csv: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Overrides the `<output_root>/<symbol>_<interval>` convention.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            work_dir: default_work_dir(),
            output_root: default_output_root(),
            output_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    /// Call the registered generator inside the orchestrating process.
    #[default]
    InProcess,
    /// Spawn a separate process per family.
    Process,
}

/// Switches shared by every family section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FamilyToggle {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub runner: RunnerKind,
    /// Argv prefix for the `process` runner; `--config <path>` is appended.
    /// Defaults to the current executable's `family --name <family>`.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeaturesConfig {
    /// Generate enabled families concurrently. Merge still waits for all.
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub ohlcv: OhlcvConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub relational: RelationalConfig,
    #[serde(default)]
    pub nonlinear: NonlinearConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum IndicatorSelection {
    Named(Vec<String>),
    Keyword(String),
}

impl Default for IndicatorSelection {
    fn default() -> Self {
        IndicatorSelection::Named(Vec::new())
    }
}

impl IndicatorSelection {
    pub fn resolve(&self) -> Result<Vec<String>, PipelineError> {
        match self {
            IndicatorSelection::Keyword(word) if word == "all" => {
                Ok(OHLCV_INDICATORS.iter().map(|s| s.to_string()).collect())
            }
            IndicatorSelection::Keyword(word) => Err(PipelineError::configuration(format!(
                "features.ohlcv.indicators must be 'all' or a list (got '{word}')"
            ))),
            IndicatorSelection::Named(names) => {
                let unknown: Vec<&str> = names
                    .iter()
                    .map(String::as_str)
                    .filter(|name| !OHLCV_INDICATORS.contains(name))
                    .collect();
                if unknown.is_empty() {
                    Ok(names.clone())
                } else {
                    Err(PipelineError::configuration(format!(
                        "unknown ohlcv indicators {unknown:?}; supported: {}",
                        OHLCV_INDICATORS.join(", ")
                    )))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OhlcvConfig {
    #[serde(flatten)]
    pub toggle: FamilyToggle,
    #[serde(default)]
    pub indicators: IndicatorSelection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    #[serde(flatten)]
    pub toggle: FamilyToggle,
    #[serde(default = "default_windows")]
    pub windows: Vec<usize>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            toggle: FamilyToggle::default(),
            windows: default_windows(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelationalConfig {
    #[serde(flatten)]
    pub toggle: FamilyToggle,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NonlinearMethod {
    /// Deterministic unary transforms plus pairwise products.
    #[default]
    #[serde(alias = "autofeat")]
    Expansion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonlinearConfig {
    #[serde(flatten)]
    pub toggle: FamilyToggle,
    #[serde(default)]
    pub method: NonlinearMethod,
    /// Upper bound on pairwise product columns.
    #[serde(default = "default_max_pairs")]
    pub max_pairs: usize,
}

impl Default for NonlinearConfig {
    fn default() -> Self {
        Self {
            toggle: FamilyToggle::default(),
            method: NonlinearMethod::default(),
            max_pairs: default_max_pairs(),
        }
    }
}

impl FeaturesConfig {
    pub fn toggle(&self, family: FeatureFamily) -> &FamilyToggle {
        match family {
            FeatureFamily::Ohlcv => &self.ohlcv.toggle,
            FeatureFamily::Stats => &self.stats.toggle,
            FeatureFamily::Relational => &self.relational.toggle,
            FeatureFamily::Nonlinear => &self.nonlinear.toggle,
        }
    }

    /// Enabled families in the fixed generation order.
    pub fn enabled_families(&self) -> Vec<FeatureFamily> {
        FeatureFamily::ALL
            .into_iter()
            .filter(|family| self.toggle(*family).enabled)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default = "default_selection_enabled")]
    pub enabled: bool,
    pub top_k: usize,
    /// Candidate models, in enumeration order.
    pub models: Vec<ModelKind>,
    /// Candidate metrics, in enumeration order.
    pub metrics: Vec<MetricKind>,
    #[serde(default = "default_cv_splits")]
    pub cv_splits: usize,
    #[serde(default)]
    pub xgboost_params: XgboostParams,
    #[serde(default)]
    pub random_forest_params: RandomForestParams,
    #[serde(default)]
    pub logistic_regression_params: LogisticRegressionParams,
    #[serde(default)]
    pub knn_params: KnnParams,
}

impl SelectionConfig {
    pub fn new(top_k: usize, models: Vec<ModelKind>, metrics: Vec<MetricKind>) -> Self {
        Self {
            enabled: true,
            top_k,
            models,
            metrics,
            cv_splits: default_cv_splits(),
            xgboost_params: XgboostParams::default(),
            random_forest_params: RandomForestParams::default(),
            logistic_regression_params: LogisticRegressionParams::default(),
            knn_params: KnnParams::default(),
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut problems = Vec::new();
        if self.top_k == 0 {
            problems.push("selection.top_k must be at least 1".to_string());
        }
        if self.models.is_empty() {
            problems.push("selection.models must list at least one model".to_string());
        }
        if self.metrics.is_empty() {
            problems.push("selection.metrics must list at least one metric".to_string());
        }
        if self.cv_splits < 2 {
            problems.push(format!(
                "selection.cv_splits must be at least 2 (got {})",
                self.cv_splits
            ));
        }
        if self.knn_params.n_neighbors == 0 {
            problems.push("selection.knn_params.n_neighbors must be at least 1".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Configuration(problems.join("; ")))
        }
    }
}

impl PipelineConfig {
    /// Read a YAML document, resolve its relative paths against the
    /// document's directory and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut config = Self::from_yaml_str(&text, base_dir)?;
        config.source_file = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_yaml_str(text: &str, base_dir: &Path) -> Result<Self> {
        let mut config: PipelineConfig = serde_yaml::from_str(text)
            .map_err(|err| PipelineError::configuration(format!("invalid config: {err}")))?;
        config.resolve_relative_paths(base_dir);
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as YAML, e.g. for handing to a child process.
    pub fn write_yaml(&self, path: &Path) -> Result<()> {
        let text = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub(crate) fn resolve_relative_paths(&mut self, base_dir: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        };
        resolve(&mut self.paths.data_root);
        resolve(&mut self.paths.work_dir);
        resolve(&mut self.paths.output_root);
        if let Some(dir) = self.paths.output_dir.as_mut() {
            resolve(dir);
        }
        if let Some(archive) = self.market_data.archive.as_mut() {
            resolve(archive);
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut problems = Vec::new();
        let md = &self.market_data;
        for (field, value) in [
            ("symbol", &md.symbol),
            ("interval", &md.interval),
            ("provider", &md.provider),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("market_data.{field} is required"));
            }
        }
        if md.end_date < md.start_date {
            problems.push(format!(
                "market_data.end_date {} precedes start_date {}",
                md.end_date, md.start_date
            ));
        }

        if let Some(window) = self.features.stats.windows.iter().find(|w| **w < 2) {
            problems.push(format!(
                "features.stats.windows entries must be at least 2 (got {window})"
            ));
        }
        if let Err(err) = self.features.ohlcv.indicators.resolve() {
            problems.push(err.to_string());
        }
        for family in FeatureFamily::ALL {
            let toggle = self.features.toggle(family);
            if toggle.enabled && toggle.runner == RunnerKind::Process && !md.save_to_csv {
                problems.push(format!(
                    "features.{} uses the process runner, which reads the cached source; set market_data.save_to_csv: true",
                    family.name()
                ));
            }
            if toggle.command.as_ref().is_some_and(|cmd| cmd.is_empty()) {
                problems.push(format!(
                    "features.{}.command must not be empty when given",
                    family.name()
                ));
            }
        }

        if let Some(selection) = self.selection.as_ref().filter(|s| s.enabled) {
            if let Err(err) = selection.validate() {
                problems.push(err.to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Configuration(problems.join("; ")))
        }
    }

    pub fn request(&self) -> MarketDataRequest {
        MarketDataRequest {
            symbol: self.market_data.symbol.clone(),
            interval: self.market_data.interval.clone(),
            start_date: self.market_data.start_date,
            end_date: self.market_data.end_date,
            provider: self.market_data.provider.clone(),
        }
    }

    /// `<data_root>/<symbol>/<interval>/<start>_to_<end>_<provider>.csv`
    pub fn source_path(&self) -> PathBuf {
        self.request().source_path(&self.paths.data_root)
    }

    pub fn work_dir(&self) -> &Path {
        &self.paths.work_dir
    }

    pub fn output_dir(&self) -> PathBuf {
        match &self.paths.output_dir {
            Some(dir) => dir.clone(),
            None => self.paths.output_root.join(format!(
                "{}_{}",
                self.request().clean_symbol(),
                self.market_data.interval
            )),
        }
    }

    /// Selection settings when selection is configured and enabled.
    pub fn active_selection(&self) -> Option<&SelectionConfig> {
        self.selection.as_ref().filter(|s| s.enabled)
    }
}

const fn default_save_to_csv() -> bool {
    true
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_output_root() -> PathBuf {
    PathBuf::from("output")
}

fn default_windows() -> Vec<usize> {
    vec![5, 10, 20]
}

const fn default_max_pairs() -> usize {
    6
}

const fn default_selection_enabled() -> bool {
    true
}

const fn default_cv_splits() -> usize {
    5
}
