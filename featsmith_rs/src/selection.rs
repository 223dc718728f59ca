//! Model × metric grid search with stratified cross-validation, followed by
//! an importance-ranked top-k column selection.

use std::time::Instant;

use anyhow::{Context, Result};
use ndarray::Array2;
use polars::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SelectionConfig;
use crate::cv::{CvSplit, stratified_k_fold};
use crate::data::{is_numeric_like, numeric_values};
use crate::error::PipelineError;
use crate::metrics::MetricKind;
use crate::models::{ModelKind, StandardizedModel};
use crate::target::TARGET_COLUMN;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub model: ModelKind,
    pub metric: MetricKind,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceSource {
    /// The model's own importances.
    Native,
    /// Absolute linear coefficients.
    Coefficients,
    /// Neither was available; every feature weighs `1/n`.
    Uniform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionResult {
    pub best_model: ModelKind,
    pub best_metric: MetricKind,
    pub best_score: f64,
    /// Selected feature names, most important first.
    pub top_features: Vec<String>,
    /// Every evaluated pair in enumeration order.
    pub ranking: Vec<RankingEntry>,
    pub elapsed_time_sec: f64,
    pub excluded_columns: Vec<String>,
    pub dropped_rows: usize,
    pub n_samples: usize,
    pub n_features: usize,
    pub cv_splits: usize,
    pub importance_source: ImportanceSource,
    /// All features by descending importance.
    pub importances: Vec<FeatureImportance>,
}

/// The `metadata.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionMetadata {
    #[serde(flatten)]
    pub result: SelectionResult,
    /// Columns of the selected table, `target` included.
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_sha256: Option<String>,
}

impl SelectionMetadata {
    pub fn new(result: SelectionResult, selected: &DataFrame, source_sha256: Option<String>) -> Self {
        let columns = selected
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        Self {
            result,
            columns,
            source_sha256,
        }
    }
}

struct Dataset {
    features: Vec<String>,
    excluded: Vec<String>,
    x: Array2<f64>,
    y: Vec<f64>,
    dropped_rows: usize,
}

fn prepare_dataset(frame: &DataFrame, config: &SelectionConfig) -> Result<Dataset> {
    let target = frame
        .column(TARGET_COLUMN)
        .map_err(|_| PipelineError::MissingTarget(TARGET_COLUMN.to_string()))?;
    if !is_numeric_like(target.dtype()) {
        return Err(PipelineError::configuration(format!(
            "target column must be numeric, found {}",
            target.dtype()
        ))
        .into());
    }
    let labels = numeric_values(target)?;

    let candidates: Vec<&Series> = frame
        .get_columns()
        .iter()
        .filter(|series| series.name() != TARGET_COLUMN)
        .collect();
    if config.top_k > candidates.len() {
        return Err(PipelineError::configuration(format!(
            "top_k={} exceeds the {} available feature columns",
            config.top_k,
            candidates.len()
        ))
        .into());
    }

    let mut features = Vec::new();
    let mut excluded = Vec::new();
    let mut columns = Vec::new();
    for series in candidates {
        if is_numeric_like(series.dtype()) {
            columns.push(numeric_values(series)?);
            features.push(series.name().to_string());
        } else {
            excluded.push(series.name().to_string());
        }
    }
    if !excluded.is_empty() {
        warn!(columns = ?excluded, "Excluding non-numeric columns from selection");
    }
    if features.is_empty() {
        return Err(PipelineError::NoFeatures(
            "no numeric or boolean feature columns remain".to_string(),
        )
        .into());
    }

    let rows: Vec<usize> = (0..frame.height())
        .filter(|row| {
            labels[*row].is_finite() && columns.iter().all(|values| values[*row].is_finite())
        })
        .collect();
    let dropped_rows = frame.height() - rows.len();
    if dropped_rows > 0 {
        warn!(dropped_rows, "Dropping rows with missing values before selection");
    }
    if rows.len() < config.cv_splits {
        return Err(PipelineError::InsufficientData {
            rows: rows.len(),
            required: config.cv_splits,
        }
        .into());
    }

    let x = Array2::from_shape_fn((rows.len(), columns.len()), |(r, c)| columns[c][rows[r]]);
    let y = rows.iter().map(|row| labels[*row]).collect();

    info!(
        samples = rows.len(),
        features = features.len(),
        excluded = excluded.len(),
        dropped_rows,
        "Prepared dataset for selection"
    );
    Ok(Dataset {
        features,
        excluded,
        x,
        y,
        dropped_rows,
    })
}

fn take_rows(x: &Array2<f64>, y: &[f64], rows: &[usize]) -> (Array2<f64>, Vec<f64>) {
    let sub_x = Array2::from_shape_fn((rows.len(), x.ncols()), |(r, c)| x[[rows[r], c]]);
    let sub_y = rows.iter().map(|row| y[*row]).collect();
    (sub_x, sub_y)
}

/// Per-fold `(y_test, y_pred)` for one model.
fn cross_validated_predictions(
    model: ModelKind,
    config: &SelectionConfig,
    data: &Dataset,
    splits: &[CvSplit],
) -> Result<Vec<(Vec<f64>, Vec<f64>)>> {
    splits
        .par_iter()
        .enumerate()
        .map(|(fold, split)| -> Result<(Vec<f64>, Vec<f64>)> {
            let (train_x, train_y) = take_rows(&data.x, &data.y, &split.train_indices);
            let (test_x, test_y) = take_rows(&data.x, &data.y, &split.test_indices);
            let mut pipeline = StandardizedModel::new(model.build(config));
            pipeline
                .fit(&train_x, &train_y)
                .with_context(|| format!("Failed to fit {model} on fold {fold}"))?;
            Ok((test_y, pipeline.predict(&test_x)))
        })
        .collect()
}

/// Rank every configured (model, metric) pair by mean cross-validated
/// score, refit the winner on all usable rows, and keep its `top_k` most
/// important features.
///
/// Equal mean scores go to the pair enumerated first (models outer, metrics
/// inner). That order is arbitrary; it only makes the choice repeatable.
///
/// Returns the selected columns plus `target`, taken from the unfiltered
/// `frame`, together with the selection record.
pub fn select(frame: &DataFrame, config: &SelectionConfig) -> Result<(DataFrame, SelectionResult)> {
    let started = Instant::now();
    config.validate()?;
    let data = prepare_dataset(frame, config)?;
    let splits = stratified_k_fold(&data.y, config.cv_splits);

    let mut ranking = Vec::with_capacity(config.models.len() * config.metrics.len());
    for model in &config.models {
        let folds = cross_validated_predictions(*model, config, &data, &splits)?;
        for metric in &config.metrics {
            let total: f64 = folds
                .iter()
                .map(|(y_true, y_pred)| metric.score(y_true, y_pred))
                .sum();
            let score = total / folds.len().max(1) as f64;
            debug!(model = %model, metric = %metric, score, "Cross-validated");
            ranking.push(RankingEntry {
                model: *model,
                metric: *metric,
                score,
            });
        }
    }

    let mut best = ranking
        .first()
        .cloned()
        .ok_or_else(|| PipelineError::configuration("no model/metric pairs to evaluate"))?;
    for entry in &ranking[1..] {
        if entry.score > best.score {
            best = entry.clone();
        }
    }
    info!(
        model = %best.model,
        metric = %best.metric,
        score = best.score,
        "Best model/metric pair"
    );

    let mut winner = StandardizedModel::new(best.model.build(config));
    winner
        .fit(&data.x, &data.y)
        .with_context(|| format!("Failed to refit {}", best.model))?;

    let n_features = data.features.len();
    let (importances, importance_source) =
        match winner.model().feature_importances().filter(|v| v.len() == n_features) {
            Some(native) => (native, ImportanceSource::Native),
            None => match winner.model().coefficients().filter(|v| v.len() == n_features) {
                Some(coef) => (
                    coef.iter().map(|c| c.abs()).collect(),
                    ImportanceSource::Coefficients,
                ),
                None => {
                    warn!(
                        model = %best.model,
                        "Model exposes no importances; ranking features uniformly"
                    );
                    (
                        vec![1.0 / n_features as f64; n_features],
                        ImportanceSource::Uniform,
                    )
                }
            },
        };

    let mut order: Vec<usize> = (0..n_features).collect();
    order.sort_by(|a, b| importances[*b].total_cmp(&importances[*a]));
    let keep = config.top_k.min(n_features);
    let top_features: Vec<String> = order[..keep]
        .iter()
        .map(|idx| data.features[*idx].clone())
        .collect();

    let mut selected_columns = top_features.clone();
    selected_columns.push(TARGET_COLUMN.to_string());
    let selected = frame
        .select(selected_columns.iter().map(String::as_str))
        .context("Failed to build selected table")?;

    let result = SelectionResult {
        best_model: best.model,
        best_metric: best.metric,
        best_score: best.score,
        top_features,
        ranking,
        elapsed_time_sec: started.elapsed().as_secs_f64(),
        excluded_columns: data.excluded,
        dropped_rows: data.dropped_rows,
        n_samples: data.y.len(),
        n_features,
        cv_splits: config.cv_splits,
        importance_source,
        importances: order
            .iter()
            .map(|idx| FeatureImportance {
                feature: data.features[*idx].clone(),
                importance: importances[*idx],
            })
            .collect(),
    };
    info!(
        selected = ?result.top_features,
        elapsed_sec = result.elapsed_time_sec,
        "Feature selection complete"
    );
    Ok((selected, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::pipeline_error;

    fn small_config(top_k: usize, models: Vec<ModelKind>) -> SelectionConfig {
        let mut config = SelectionConfig::new(top_k, models, vec![MetricKind::Accuracy]);
        config.cv_splits = 3;
        config.xgboost_params.n_estimators = 10;
        config.random_forest_params.n_estimators = 10;
        config
    }

    fn frame(rows: usize) -> DataFrame {
        let signal: Vec<f64> = (0..rows).map(|i| (i % 2) as f64).collect();
        let noise: Vec<f64> = (0..rows).map(|i| ((i * 7) % 5) as f64).collect();
        let target: Vec<i32> = (0..rows).map(|i| (i % 2) as i32).collect();
        DataFrame::new(vec![
            Series::new("noise", noise),
            Series::new("signal", signal),
            Series::new(TARGET_COLUMN, target),
        ])
        .unwrap()
    }

    #[test]
    fn missing_target_is_reported() {
        let df = frame(12).drop(TARGET_COLUMN).unwrap();
        let err = select(&df, &small_config(1, vec![ModelKind::Xgboost])).unwrap_err();
        assert!(matches!(pipeline_error(&err), Some(PipelineError::MissingTarget(_))));
    }

    #[test]
    fn top_k_larger_than_feature_count_is_a_configuration_error() {
        let err = select(&frame(12), &small_config(3, vec![ModelKind::Xgboost])).unwrap_err();
        assert!(matches!(pipeline_error(&err), Some(PipelineError::Configuration(_))));
    }

    #[test]
    fn too_few_rows_for_the_folds() {
        let err = select(&frame(2), &small_config(1, vec![ModelKind::Knn])).unwrap_err();
        assert!(matches!(
            pipeline_error(&err),
            Some(PipelineError::InsufficientData { rows: 2, required: 3 })
        ));
    }

    #[test]
    fn knn_falls_back_to_uniform_importances() -> Result<()> {
        let (selected, result) = select(&frame(12), &small_config(1, vec![ModelKind::Knn]))?;
        assert_eq!(result.importance_source, ImportanceSource::Uniform);
        // Equal weights keep the original column order.
        assert_eq!(result.top_features, vec!["noise".to_string()]);
        assert_eq!(selected.get_column_names(), vec!["noise", TARGET_COLUMN]);
        Ok(())
    }

    #[test]
    fn rows_with_nan_are_dropped_but_output_keeps_them() -> Result<()> {
        let mut df = frame(12);
        let mut noise: Vec<Option<f64>> = (0..12).map(|i| Some(((i * 7) % 5) as f64)).collect();
        noise[4] = None;
        noise[5] = Some(f64::NAN);
        df.with_column(Series::new("noise", noise))?;

        let (selected, result) =
            select(&df, &small_config(1, vec![ModelKind::LogisticRegression]))?;
        assert_eq!(result.dropped_rows, 2);
        assert_eq!(result.n_samples, 10);
        assert_eq!(result.importance_source, ImportanceSource::Coefficients);
        assert_eq!(result.top_features, vec!["signal".to_string()]);
        assert_eq!(selected.height(), 12);
        Ok(())
    }

    fn separable(rows: usize) -> DataFrame {
        let target: Vec<i32> = (0..rows).map(|i| (i % 2) as i32).collect();
        let signal: Vec<f64> = target.iter().map(|t| *t as f64).collect();
        DataFrame::new(vec![
            Series::new("signal", signal),
            Series::new(TARGET_COLUMN, target),
        ])
        .unwrap()
    }

    // Both models classify every fold perfectly, so the scores are equal and
    // the enumeration order alone decides. The choice is arbitrary by
    // construction; the test pins that it is the first pair.
    #[test]
    fn equal_scores_go_to_the_first_enumerated_pair() -> Result<()> {
        let frame = separable(24);

        let config = small_config(1, vec![ModelKind::LogisticRegression, ModelKind::Knn]);
        let (_, result) = select(&frame, &config)?;
        assert_eq!(result.ranking[0].score, 1.0);
        assert_eq!(result.ranking[1].score, 1.0);
        assert_eq!(result.best_model, ModelKind::LogisticRegression);

        let config = small_config(1, vec![ModelKind::Knn, ModelKind::LogisticRegression]);
        let (_, result) = select(&frame, &config)?;
        assert_eq!(result.best_model, ModelKind::Knn);
        assert_eq!(result.importance_source, ImportanceSource::Uniform);
        Ok(())
    }
}
