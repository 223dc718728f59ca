use anyhow::Result;
use featsmith_builtin::{
    NonlinearGenerator, OhlcvGenerator, RelationalGenerator, StatsGenerator, builtin_generators,
};
use featsmith_rs::config::{FeaturesConfig, IndicatorSelection};
use featsmith_rs::data::CandleTable;
use featsmith_rs::family::{FeatureFamily, FeatureFamilyGenerator};
use polars::prelude::*;

fn candles(rows: usize) -> Result<CandleTable> {
    let ts: Vec<i64> = (0..rows as i64).map(|i| 1_704_067_200_000 + i * 3_600_000).collect();
    let close: Vec<f64> = (0..rows)
        .map(|i| 100.0 + (i as f64 / 4.0).sin() * 5.0 + i as f64 * 0.1)
        .collect();
    let open: Vec<f64> = close.iter().map(|c| c - 0.5).collect();
    let high: Vec<f64> = close.iter().map(|c| c + 1.5).collect();
    let low: Vec<f64> = close.iter().map(|c| c - 2.0).collect();
    let volume: Vec<f64> = (0..rows).map(|i| 1_000.0 + (i % 7) as f64 * 50.0).collect();
    let df = df!(
        "timestamp" => ts,
        "open" => open,
        "high" => high,
        "low" => low,
        "close" => close,
        "volume" => volume,
        "funding" => vec![0.01; rows]
    )?;
    CandleTable::from_frame(df)
}

#[test]
fn ohlcv_all_passes_source_through_then_indicators() -> Result<()> {
    let source = candles(80)?;
    let mut config = FeaturesConfig::default();
    config.ohlcv.indicators = IndicatorSelection::Keyword("all".to_string());

    let table = OhlcvGenerator.generate(&source, &config)?;
    assert_eq!(table.family(), FeatureFamily::Ohlcv);
    assert_eq!(table.height(), 80);
    assert_eq!(
        table.column_names(),
        vec![
            "timestamp", "open", "high", "low", "close", "volume", "funding", "rsi_14", "ema_10",
            "sma_10", "macd_line", "macd_signal", "bb_high", "bb_low", "williams_r", "stoch_k",
            "stoch_d", "atr_14", "adx", "obv", "cci", "roc",
        ]
    );
    Ok(())
}

#[test]
fn ohlcv_indicators_follow_configuration_order() -> Result<()> {
    let source = candles(40)?;
    let mut config = FeaturesConfig::default();
    config.ohlcv.indicators =
        IndicatorSelection::Named(vec!["roc".to_string(), "rsi".to_string()]);

    let names = OhlcvGenerator.generate(&source, &config)?.column_names();
    assert_eq!(&names[names.len() - 2..], ["roc", "rsi_14"]);
    Ok(())
}

#[test]
fn stats_emits_ten_columns_per_window() -> Result<()> {
    let source = candles(30)?;
    let mut config = FeaturesConfig::default();
    config.stats.windows = vec![5, 20];

    let table = StatsGenerator.generate(&source, &config)?;
    assert_eq!(table.width(), 20);
    assert_eq!(table.height(), 30);
    let names = table.column_names();
    assert_eq!(names[0], "close_mean_5");
    assert_eq!(names[10], "close_mean_20");

    let mean = table.frame().column("close_mean_5")?.f64()?.clone();
    assert!(mean.get(3).is_some_and(f64::is_nan));
    assert!(mean.get(4).is_some_and(f64::is_finite));
    Ok(())
}

#[test]
fn relational_handles_zero_denominators() -> Result<()> {
    let df = df!(
        "timestamp" => [1_i64, 2, 3],
        "open" => [1.0, 2.0, 3.0],
        "high" => [2.0, 3.0, 4.0],
        "low" => [0.0, 1.0, 2.0],
        "close" => [1.5, 0.0, 3.5],
        "volume" => [10.0, 20.0, 30.0]
    )?;
    let source = CandleTable::from_frame(df)?;
    let table = RelationalGenerator.generate(&source, &FeaturesConfig::default())?;
    assert_eq!(
        table.column_names(),
        vec![
            "spread_close_open",
            "ratio_high_low",
            "range_relative",
            "close_over_high",
            "close_over_low",
        ]
    );
    let ratio = table.frame().column("ratio_high_low")?.f64()?.clone();
    assert!(ratio.get(0).is_some_and(f64::is_nan));
    assert_eq!(ratio.get(1), Some(3.0));
    let relative = table.frame().column("range_relative")?.f64()?.clone();
    assert!(relative.get(1).is_some_and(f64::is_nan));
    Ok(())
}

#[test]
fn nonlinear_caps_pairwise_products() -> Result<()> {
    let source = candles(12)?;
    let mut config = FeaturesConfig::default();
    config.nonlinear.max_pairs = 2;

    let names = NonlinearGenerator.generate(&source, &config)?.column_names();
    assert_eq!(names.len(), 4 * 5 + 2);
    assert_eq!(
        &names[..5],
        ["open_log1p_abs", "open_sqrt_abs", "open_sq", "open_cube", "open_inv"]
    );
    assert_eq!(&names[20..], ["open_x_high", "open_x_low"]);
    assert!(!names.iter().any(|name| name.starts_with("close")));
    Ok(())
}

#[test]
fn registry_covers_every_family() -> Result<()> {
    let registry = builtin_generators();
    assert_eq!(registry.families(), FeatureFamily::ALL.to_vec());
    for family in FeatureFamily::ALL {
        assert_eq!(registry.get(family)?.family(), family);
    }
    Ok(())
}
