use anyhow::Result;
use featsmith_rs::config::FeaturesConfig;
use featsmith_rs::data::CandleTable;
use featsmith_rs::family::{FeatureFamily, FeatureFamilyGenerator, FeatureTable};
use polars::prelude::*;

use crate::indicators::{
    finite_or_nan, rolling_kurt, rolling_max, rolling_min, rolling_skew, rolling_std, sma,
};

/// Rolling mean, sample std, z-score, extrema and shape statistics of
/// `close` (and a subset for `volume`) for every configured window.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatsGenerator;

fn zscore(values: &[f64], mean: &[f64], std: &[f64]) -> Vec<f64> {
    (0..values.len())
        .map(|i| finite_or_nan((values[i] - mean[i]) / std[i]))
        .collect()
}

impl FeatureFamilyGenerator for StatsGenerator {
    fn family(&self) -> FeatureFamily {
        FeatureFamily::Stats
    }

    fn generate(&self, source: &CandleTable, config: &FeaturesConfig) -> Result<FeatureTable> {
        let close = source.float_column("close")?;
        let volume = source.float_column("volume")?;
        let mut columns = Vec::with_capacity(config.stats.windows.len() * 10);

        for &w in &config.stats.windows {
            let close_mean = sma(&close, w);
            let volume_mean = sma(&volume, w);
            let close_std = rolling_std(&close, w, 1);
            let volume_std = rolling_std(&volume, w, 1);
            let close_z = zscore(&close, &close_mean, &close_std);
            let volume_z = zscore(&volume, &volume_mean, &volume_std);

            columns.push(Series::new(&format!("close_mean_{w}"), close_mean));
            columns.push(Series::new(&format!("volume_mean_{w}"), volume_mean));
            columns.push(Series::new(&format!("close_std_{w}"), close_std));
            columns.push(Series::new(&format!("volume_std_{w}"), volume_std));
            columns.push(Series::new(&format!("close_zscore_{w}"), close_z));
            columns.push(Series::new(&format!("volume_zscore_{w}"), volume_z));
            columns.push(Series::new(&format!("close_min_{w}"), rolling_min(&close, w)));
            columns.push(Series::new(&format!("close_max_{w}"), rolling_max(&close, w)));
            columns.push(Series::new(&format!("close_skew_{w}"), rolling_skew(&close, w)));
            columns.push(Series::new(&format!("close_kurt_{w}"), rolling_kurt(&close, w)));
        }

        FeatureTable::new(FeatureFamily::Stats, columns)
    }
}
