pub mod config;
pub mod cv;
pub mod data;
pub mod error;
pub mod family;
pub mod merge;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod runner;
pub mod selection;
pub mod storage;
pub mod target;

pub use config::{FeaturesConfig, PipelineConfig, RunnerKind, SelectionConfig};
pub use data::CandleTable;
pub use error::PipelineError;
pub use family::{FeatureFamily, FeatureFamilyGenerator, FeatureTable};
pub use metrics::MetricKind;
pub use models::ModelKind;
pub use pipeline::{FeaturePipeline, PipelineReport, run_pipeline};
pub use runner::{EnvironmentRunner, GeneratorRegistry, RunnerSet};
pub use selection::{SelectionResult, select};
