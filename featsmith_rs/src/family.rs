use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::FeaturesConfig;
use crate::data::CandleTable;
use crate::error::PipelineError;

/// Suffix shared by every intermediate family output.
pub const FEATURE_FILE_SUFFIX: &str = "_features.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFamily {
    Ohlcv,
    Stats,
    Relational,
    Nonlinear,
}

impl FeatureFamily {
    /// Fixed generation and merge order.
    pub const ALL: [FeatureFamily; 4] = [
        FeatureFamily::Ohlcv,
        FeatureFamily::Stats,
        FeatureFamily::Relational,
        FeatureFamily::Nonlinear,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FeatureFamily::Ohlcv => "ohlcv",
            FeatureFamily::Stats => "stats",
            FeatureFamily::Relational => "relational",
            FeatureFamily::Nonlinear => "nonlinear",
        }
    }

    /// `<family>_features.csv`
    pub fn output_file_name(self) -> String {
        format!("{}{FEATURE_FILE_SUFFIX}", self.name())
    }

    pub fn position(self) -> usize {
        FeatureFamily::ALL
            .iter()
            .position(|family| *family == self)
            .unwrap_or(FeatureFamily::ALL.len())
    }
}

impl fmt::Display for FeatureFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureFamily {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureFamily::ALL
            .into_iter()
            .find(|family| family.name() == s)
            .ok_or_else(|| PipelineError::configuration(format!("unknown feature family '{s}'")))
    }
}

/// One family's output, row-aligned with the source candles.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    family: FeatureFamily,
    frame: DataFrame,
}

impl FeatureTable {
    pub fn new(family: FeatureFamily, columns: Vec<Series>) -> Result<Self> {
        let frame = DataFrame::new(columns)
            .with_context(|| format!("Failed to assemble {family} feature table"))?;
        Ok(Self { family, frame })
    }

    pub fn family(&self) -> FeatureFamily {
        self.family
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn width(&self) -> usize {
        self.frame.width()
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut DataFrame {
        &mut self.frame
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Fails with a data alignment error unless the table has `rows` rows.
    pub fn ensure_rows(&self, rows: usize) -> Result<(), PipelineError> {
        if self.height() == rows {
            Ok(())
        } else {
            Err(PipelineError::DataAlignment(format!(
                "{} produced {} rows, source has {rows}",
                self.family,
                self.height()
            )))
        }
    }
}

/// A pure `candles -> feature columns` transform for one family.
pub trait FeatureFamilyGenerator: Send + Sync {
    fn family(&self) -> FeatureFamily;

    fn generate(&self, source: &CandleTable, config: &FeaturesConfig) -> Result<FeatureTable>;
}
