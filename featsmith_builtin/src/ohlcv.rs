use anyhow::Result;
use featsmith_rs::config::FeaturesConfig;
use featsmith_rs::data::CandleTable;
use featsmith_rs::family::{FeatureFamily, FeatureFamilyGenerator, FeatureTable};
use polars::prelude::*;
use tracing::debug;

use crate::indicators;

const RSI_PERIOD: usize = 14;
const MA_PERIOD: usize = 10;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const BB_PERIOD: usize = 20;
const BB_MULT: f64 = 2.0;
const WILLIAMS_PERIOD: usize = 14;
const STOCH_PERIOD: usize = 14;
const STOCH_SIGNAL: usize = 3;
const ATR_PERIOD: usize = 14;
const ADX_PERIOD: usize = 14;
const CCI_PERIOD: usize = 20;
const CCI_CONSTANT: f64 = 0.015;
const ROC_PERIOD: usize = 12;

/// Source columns passed through, followed by the configured indicator
/// groups in configuration order.
#[derive(Debug, Default, Clone, Copy)]
pub struct OhlcvGenerator;

impl FeatureFamilyGenerator for OhlcvGenerator {
    fn family(&self) -> FeatureFamily {
        FeatureFamily::Ohlcv
    }

    fn generate(&self, source: &CandleTable, config: &FeaturesConfig) -> Result<FeatureTable> {
        let groups = config.ohlcv.indicators.resolve()?;
        let p = source.prices()?;
        let mut columns: Vec<Series> = source.frame().get_columns().to_vec();

        for name in &groups {
            match name.as_str() {
                "rsi" => columns.push(Series::new("rsi_14", indicators::rsi(&p.close, RSI_PERIOD))),
                "ema" => columns.push(Series::new("ema_10", indicators::ema(&p.close, MA_PERIOD))),
                "sma" => columns.push(Series::new("sma_10", indicators::sma(&p.close, MA_PERIOD))),
                "macd" => {
                    let (line, signal) =
                        indicators::macd(&p.close, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
                    columns.push(Series::new("macd_line", line));
                    columns.push(Series::new("macd_signal", signal));
                }
                "bollinger" => {
                    let (upper, lower) = indicators::bollinger(&p.close, BB_PERIOD, BB_MULT);
                    columns.push(Series::new("bb_high", upper));
                    columns.push(Series::new("bb_low", lower));
                }
                "williams_r" => columns.push(Series::new(
                    "williams_r",
                    indicators::williams_r(&p.high, &p.low, &p.close, WILLIAMS_PERIOD),
                )),
                "stoch" => {
                    let (k, d) = indicators::stochastic(
                        &p.high,
                        &p.low,
                        &p.close,
                        STOCH_PERIOD,
                        STOCH_SIGNAL,
                    );
                    columns.push(Series::new("stoch_k", k));
                    columns.push(Series::new("stoch_d", d));
                }
                "atr" => columns.push(Series::new(
                    "atr_14",
                    indicators::atr(&p.high, &p.low, &p.close, ATR_PERIOD),
                )),
                "adx" => columns.push(Series::new(
                    "adx",
                    indicators::adx(&p.high, &p.low, &p.close, ADX_PERIOD),
                )),
                "obv" => columns.push(Series::new("obv", indicators::obv(&p.close, &p.volume))),
                "cci" => columns.push(Series::new(
                    "cci",
                    indicators::cci(&p.high, &p.low, &p.close, CCI_PERIOD, CCI_CONSTANT),
                )),
                "roc" => columns.push(Series::new("roc", indicators::roc(&p.close, ROC_PERIOD))),
                // `resolve` has already rejected unknown names.
                _ => {}
            }
        }

        debug!(groups = ?groups, columns = columns.len(), "ohlcv columns assembled");
        FeatureTable::new(FeatureFamily::Ohlcv, columns)
    }
}
