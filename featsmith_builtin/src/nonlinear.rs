use anyhow::Result;
use featsmith_rs::config::{FeaturesConfig, NonlinearMethod};
use featsmith_rs::data::CandleTable;
use featsmith_rs::family::{FeatureFamily, FeatureFamilyGenerator, FeatureTable};
use polars::prelude::*;
use tracing::debug;

use crate::indicators::finite_or_nan;

/// Bases for the expansion. `close` is left out.
const BASES: [&str; 4] = ["open", "high", "low", "volume"];

type Transform = fn(f64) -> f64;

const TRANSFORMS: [(&str, Transform); 5] = [
    ("log1p_abs", |v| v.abs().ln_1p()),
    ("sqrt_abs", |v| v.abs().sqrt()),
    ("sq", |v| v * v),
    ("cube", |v| v * v * v),
    ("inv", |v| 1.0 / v),
];

/// Unary transforms of each base plus pairwise products, capped at
/// `max_pairs` products in base order.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonlinearGenerator;

impl FeatureFamilyGenerator for NonlinearGenerator {
    fn family(&self) -> FeatureFamily {
        FeatureFamily::Nonlinear
    }

    fn generate(&self, source: &CandleTable, config: &FeaturesConfig) -> Result<FeatureTable> {
        let settings = &config.nonlinear;
        match settings.method {
            NonlinearMethod::Expansion => {}
        }

        let bases = BASES
            .iter()
            .map(|name| Ok((*name, source.float_column(name)?)))
            .collect::<Result<Vec<(&str, Vec<f64>)>>>()?;

        let mut columns = Vec::new();
        for (name, values) in &bases {
            for (suffix, transform) in TRANSFORMS {
                let out: Vec<f64> = values.iter().map(|v| finite_or_nan(transform(*v))).collect();
                columns.push(Series::new(&format!("{name}_{suffix}"), out));
            }
        }

        let pairs = (0..bases.len())
            .flat_map(|i| (i + 1..bases.len()).map(move |j| (i, j)))
            .take(settings.max_pairs);
        for (i, j) in pairs {
            let (left, a) = &bases[i];
            let (right, b) = &bases[j];
            let out: Vec<f64> = a.iter().zip(b).map(|(x, y)| finite_or_nan(x * y)).collect();
            columns.push(Series::new(&format!("{left}_x_{right}"), out));
        }

        debug!(columns = columns.len(), "nonlinear expansion assembled");
        FeatureTable::new(FeatureFamily::Nonlinear, columns)
    }
}
