use thiserror::Error;

/// Structural failures raised by the pipeline stages.
///
/// Stages return `anyhow::Result`; these variants travel inside the
/// `anyhow::Error` so callers (and tests) can `downcast_ref::<PipelineError>()`
/// to distinguish a misconfigured run from a data problem.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("data alignment error: {0}")]
    DataAlignment(String),

    #[error("missing required column '{column}' ({context})")]
    MissingColumn { column: String, context: String },

    #[error("missing target column '{0}'")]
    MissingTarget(String),

    #[error("no usable feature columns: {0}")]
    NoFeatures(String),

    #[error("insufficient data: {rows} usable rows, at least {required} required")]
    InsufficientData { rows: usize, required: usize },

    #[error("feature family '{family}' failed: {message}")]
    EnvironmentExecution { family: String, message: String },

    #[error("invalid candle table: {0}")]
    InvalidCandles(String),
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn missing_column(column: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingColumn {
            column: column.into(),
            context: context.into(),
        }
    }

    pub fn environment(family: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EnvironmentExecution {
            family: family.into(),
            message: message.into(),
        }
    }
}

/// Returns the pipeline error carried by `err`, if any.
pub fn pipeline_error(err: &anyhow::Error) -> Option<&PipelineError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
}
