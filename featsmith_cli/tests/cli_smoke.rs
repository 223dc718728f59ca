use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::tempdir;

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("workspace root")
        .to_path_buf()
}

fn featsmith() -> Command {
    if let Some(bin) = option_env!("CARGO_BIN_EXE_featsmith") {
        Command::new(bin)
    } else {
        let mut cmd = Command::new("cargo");
        cmd.args(["run", "-q", "-p", "featsmith_cli", "--"]);
        cmd
    }
}

fn sample_csv() -> PathBuf {
    let path = workspace_root()
        .join("tests")
        .join("data")
        .join("ohlcv_tiny.csv");
    assert!(path.exists(), "sample CSV missing at {}", path.display());
    path
}

fn write_config(dir: &Path, relational_runner: &str, with_selection: bool) -> PathBuf {
    let mut yaml = format!(
        r#"market_data:
  symbol: BTC/USDT
  interval: 1h
  start_date: 2024-01-01
  end_date: 2024-01-10
  provider: binance
  archive: {archive}
paths:
  data_root: data
  work_dir: work
  output_dir: out
features:
  ohlcv:
    enabled: true
    indicators: all
  stats:
    enabled: true
    windows: [5, 10]
  relational:
    enabled: true
    runner: {relational_runner}
"#,
        archive = sample_csv().display(),
    );
    if with_selection {
        yaml.push_str(
            r#"selection:
  top_k: 5
  models: [random_forest, logistic_regression]
  metrics: [accuracy, f1]
  cv_splits: 3
  random_forest_params:
    n_estimators: 10
    max_depth: 4
"#,
        );
    }
    let path = dir.join("pipeline.yaml");
    fs::write(&path, yaml).expect("write config");
    path
}

#[test]
fn run_writes_full_and_selected_tables() {
    let temp_dir = tempdir().expect("temp dir");
    let config = write_config(temp_dir.path(), "in_process", true);

    let status = featsmith()
        .args(["run", "--config", config.to_str().expect("config"), "--no-file-log"])
        .current_dir(workspace_root())
        .status()
        .expect("failed to spawn featsmith");
    assert!(status.success(), "featsmith exited with {status:?}");

    let out = temp_dir.path().join("out");
    for name in ["X_full.csv", "X_selected.csv", "metadata.json"] {
        assert!(out.join(name).exists(), "expected {name} in {}", out.display());
    }
    let cached = temp_dir
        .path()
        .join("data")
        .join("BTCUSDT")
        .join("1h")
        .join("2024-01-01_to_2024-01-10_binance.csv");
    assert!(cached.exists(), "source cache missing at {}", cached.display());

    let metadata: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("metadata.json")).expect("metadata"))
            .expect("metadata json");
    let top = metadata["top_features"].as_array().expect("top_features");
    assert_eq!(top.len(), 5);
    assert_eq!(metadata["ranking"].as_array().expect("ranking").len(), 4);
    assert!(metadata["best_score"].as_f64().is_some());

    let selected = fs::read_to_string(out.join("X_selected.csv")).expect("selected");
    let header: Vec<&str> = selected.lines().next().expect("header").split(',').collect();
    assert_eq!(header.len(), 6);
    assert_eq!(header.last().copied(), Some("target"));
}

#[test]
fn process_runner_family_is_merged_like_in_process() {
    let temp_dir = tempdir().expect("temp dir");
    let config = write_config(temp_dir.path(), "process", false);

    let status = featsmith()
        .args(["run", "--config", config.to_str().expect("config"), "--no-file-log"])
        .current_dir(workspace_root())
        .status()
        .expect("failed to spawn featsmith");
    assert!(status.success(), "featsmith exited with {status:?}");

    let out = temp_dir.path().join("out");
    let full = fs::read_to_string(out.join("X_full.csv")).expect("full table");
    let header = full.lines().next().expect("header");
    for column in ["spread_close_open", "ratio_high_low", "close_over_low", "target"] {
        assert!(header.contains(column), "{column} missing from {header}");
    }
    assert_eq!(full.lines().count(), 241);
    assert!(!out.join("X_selected.csv").exists());
}

#[test]
fn run_writes_default_log_file() {
    let temp_dir = tempdir().expect("temp dir");
    let config = write_config(temp_dir.path(), "in_process", false);

    let status = featsmith()
        .args(["run", "--config", config.to_str().expect("config")])
        .current_dir(workspace_root())
        .status()
        .expect("failed to spawn featsmith");
    assert!(status.success(), "featsmith exited with {status:?}");

    let log = temp_dir.path().join("out").join("featsmith.log");
    assert!(log.exists(), "expected log file at {}", log.display());
}

#[test]
fn invalid_config_fails() {
    let temp_dir = tempdir().expect("temp dir");
    let config = temp_dir.path().join("broken.yaml");
    fs::write(&config, "market_data:\n  symbol: ''\n").expect("write config");

    let status = featsmith()
        .args(["run", "--config", config.to_str().expect("config"), "--no-file-log"])
        .current_dir(workspace_root())
        .status()
        .expect("failed to spawn featsmith");
    assert!(!status.success());
}
