use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use featsmith_rs::data::CandleTable;
use featsmith_rs::family::{FeatureFamily, FeatureFamilyGenerator, FeatureTable};
use featsmith_rs::merge::merge_family_outputs;
use featsmith_rs::storage::read_frame;
use featsmith_rs::target::{TARGET_COLUMN, derive_target};
use featsmith_rs::{FeaturePipeline, FeaturesConfig, GeneratorRegistry, PipelineConfig, RunnerSet};
use polars::prelude::*;
use tempfile::tempdir;

/// Passes `close` through so the target can be derived.
struct CloseOnly;

impl FeatureFamilyGenerator for CloseOnly {
    fn family(&self) -> FeatureFamily {
        FeatureFamily::Ohlcv
    }

    fn generate(&self, source: &CandleTable, _config: &FeaturesConfig) -> Result<FeatureTable> {
        FeatureTable::new(
            FeatureFamily::Ohlcv,
            vec![Series::new("close", source.float_column("close")?)],
        )
    }
}

struct Spread;

impl FeatureFamilyGenerator for Spread {
    fn family(&self) -> FeatureFamily {
        FeatureFamily::Relational
    }

    fn generate(&self, source: &CandleTable, _config: &FeaturesConfig) -> Result<FeatureTable> {
        let p = source.prices()?;
        let spread: Vec<f64> = p.high.iter().zip(&p.low).map(|(h, l)| h - l).collect();
        let body: Vec<f64> = p.close.iter().zip(&p.open).map(|(c, o)| c - o).collect();
        FeatureTable::new(
            FeatureFamily::Relational,
            vec![Series::new("spread", spread), Series::new("body", body)],
        )
    }
}

fn write_archive(dir: &Path, rows: usize) -> Result<()> {
    let mut body = String::from("timestamp,open,high,low,close,volume\n");
    for i in 0..rows {
        let close = 100.0 + ((i * 7) % 5) as f64 - (i % 3) as f64;
        body.push_str(&format!(
            "2024-01-{:02},{:.1},{:.1},{:.1},{:.1},{}\n",
            i + 1,
            close - 0.5,
            close + 1.0,
            close - 1.0,
            close,
            1000 + i
        ));
    }
    fs::write(dir.join("archive.csv"), body)?;
    Ok(())
}

fn config(dir: &Path, relational: bool, parallel: bool) -> Result<PipelineConfig> {
    let text = format!(
        r#"
market_data:
  symbol: TEST/USD
  interval: 1d
  start_date: 2024-01-01
  end_date: 2024-01-20
  provider: archive
  archive: archive.csv
paths:
  output_dir: out
features:
  parallel: {parallel}
  ohlcv:
    enabled: true
  relational:
    enabled: {relational}
"#
    );
    PipelineConfig::from_yaml_str(&text, dir)
}

fn runners() -> RunnerSet {
    RunnerSet::with_registry(
        GeneratorRegistry::new()
            .with(Arc::new(CloseOnly))
            .with(Arc::new(Spread)),
    )
}

#[test]
fn merged_width_is_the_sum_of_family_widths() -> Result<()> {
    let dir = tempdir()?;
    write_archive(dir.path(), 20)?;
    let report = FeaturePipeline::new(config(dir.path(), true, true)?, runners()).run()?;

    let work = dir.path().join("work");
    let merged = merge_family_outputs(&work, Some(20))?;
    assert_eq!(merged.width(), 1 + 2);
    assert_eq!(merged.height(), 20);

    assert_eq!(report.rows, 19);
    assert_eq!(report.columns, vec!["close", "spread", "body", TARGET_COLUMN]);
    assert!(report.selection.is_none());

    let full = read_frame(&report.full_path)?;
    assert_eq!(full.height(), 19);
    assert_eq!(full.width(), 4);
    Ok(())
}

#[test]
fn disabled_family_leaves_nothing_behind() -> Result<()> {
    let dir = tempdir()?;
    write_archive(dir.path(), 20)?;
    FeaturePipeline::new(config(dir.path(), true, false)?, runners()).run()?;
    assert!(dir.path().join("work/relational_features.csv").is_file());

    let report = FeaturePipeline::new(config(dir.path(), false, false)?, runners()).run()?;
    assert!(!dir.path().join("work/relational_features.csv").exists());
    assert_eq!(report.columns, vec!["close", TARGET_COLUMN]);
    Ok(())
}

#[test]
fn source_is_cached_under_the_data_root() -> Result<()> {
    let dir = tempdir()?;
    write_archive(dir.path(), 20)?;
    let report = FeaturePipeline::new(config(dir.path(), false, false)?, runners()).run()?;
    assert_eq!(
        report.source_path,
        dir.path()
            .join("data/TESTUSD/1d/2024-01-01_to_2024-01-20_archive.csv")
    );
    assert!(report.source_path.is_file());
    Ok(())
}

#[test]
fn deriving_target_twice_is_a_no_op() -> Result<()> {
    let frame = df!("close" => [1.0, 2.0, 1.5, 1.5, 3.0])?;
    let once = derive_target(frame)?;
    let twice = derive_target(once.clone())?;
    assert!(once.equals(&twice));
    let labels: Vec<Option<i32>> = once.column(TARGET_COLUMN)?.i32()?.into_iter().collect();
    assert_eq!(labels, vec![Some(1), Some(0), Some(0), Some(1)]);
    Ok(())
}
