use anyhow::Result;
use featsmith_rs::config::FeaturesConfig;
use featsmith_rs::data::CandleTable;
use featsmith_rs::family::{FeatureFamily, FeatureFamilyGenerator, FeatureTable};
use polars::prelude::*;

use crate::indicators::ratio;

/// Same-bar price relationships.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelationalGenerator;

impl FeatureFamilyGenerator for RelationalGenerator {
    fn family(&self) -> FeatureFamily {
        FeatureFamily::Relational
    }

    fn generate(&self, source: &CandleTable, _config: &FeaturesConfig) -> Result<FeatureTable> {
        let p = source.prices()?;
        let spread: Vec<f64> = p.close.iter().zip(&p.open).map(|(c, o)| c - o).collect();
        let range: Vec<f64> = p.high.iter().zip(&p.low).map(|(h, l)| h - l).collect();

        FeatureTable::new(
            FeatureFamily::Relational,
            vec![
                Series::new("spread_close_open", spread),
                Series::new("ratio_high_low", ratio(&p.high, &p.low)),
                Series::new("range_relative", ratio(&range, &p.close)),
                Series::new("close_over_high", ratio(&p.close, &p.high)),
                Series::new("close_over_low", ratio(&p.close, &p.low)),
            ],
        )
    }
}
