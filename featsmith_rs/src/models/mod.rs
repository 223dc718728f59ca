//! Binary classifiers used by the selection grid search.
//!
//! Every model is deterministic given its parameters (randomised ones carry
//! an explicit `seed`), fits on a dense row-major matrix and predicts hard
//! 0/1 labels.

mod boosting;
mod forest;
mod knn;
mod logistic;
pub mod tree;

use std::fmt;

use anyhow::Result;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::SelectionConfig;
use crate::cv::StandardScaler;

pub use boosting::{GradientBoosting, XgboostParams};
pub use forest::{RandomForest, RandomForestParams};
pub use knn::{KNearestNeighbors, KnnParams};
pub use logistic::{LogisticRegression, LogisticRegressionParams};

pub trait Classifier: Send {
    fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<()>;

    /// Hard 0/1 predictions, one per row of `x`.
    fn predict(&self, x: &Array2<f64>) -> Vec<f64>;

    /// Native per-feature importances, when the model has them.
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }

    /// Linear coefficients, when the model has them.
    fn coefficients(&self) -> Option<Vec<f64>> {
        None
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Xgboost,
    RandomForest,
    LogisticRegression,
    Knn,
}

impl ModelKind {
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Xgboost => "xgboost",
            ModelKind::RandomForest => "random_forest",
            ModelKind::LogisticRegression => "logistic_regression",
            ModelKind::Knn => "knn",
        }
    }

    /// A fresh, unfitted model with the hyperparameters configured for it.
    pub fn build(self, config: &SelectionConfig) -> Box<dyn Classifier> {
        match self {
            ModelKind::Xgboost => Box::new(GradientBoosting::new(config.xgboost_params.clone())),
            ModelKind::RandomForest => {
                Box::new(RandomForest::new(config.random_forest_params.clone()))
            }
            ModelKind::LogisticRegression => Box::new(LogisticRegression::new(
                config.logistic_regression_params.clone(),
            )),
            ModelKind::Knn => Box::new(KNearestNeighbors::new(config.knn_params.clone())),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Standardize-then-classify pipeline. The scaler is always fitted on the
/// same rows as the model.
pub struct StandardizedModel {
    scaler: StandardScaler,
    model: Box<dyn Classifier>,
}

impl StandardizedModel {
    pub fn new(model: Box<dyn Classifier>) -> Self {
        Self {
            scaler: StandardScaler::default(),
            model,
        }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<()> {
        let (scaler, scaled) = StandardScaler::fit_transform(x);
        self.scaler = scaler;
        self.model.fit(&scaled, y)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
        self.model.predict(&self.scaler.transform(x))
    }

    pub fn model(&self) -> &dyn Classifier {
        self.model.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricKind;

    #[test]
    fn model_names_follow_serde_names() {
        let parsed: Vec<ModelKind> =
            serde_json::from_str(r#"["xgboost","random_forest","logistic_regression","knn"]"#)
                .unwrap();
        for kind in parsed {
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{kind}\""));
        }
    }

    #[test]
    fn standardized_model_exposes_inner_coefficients() -> Result<()> {
        let config = SelectionConfig::new(1, vec![ModelKind::LogisticRegression], vec![MetricKind::F1]);
        let mut model = StandardizedModel::new(ModelKind::LogisticRegression.build(&config));
        let x = Array2::from_shape_fn((20, 1), |(i, _)| 1000.0 + i as f64);
        let y: Vec<f64> = (0..20).map(|i| if i >= 10 { 1.0 } else { 0.0 }).collect();
        model.fit(&x, &y)?;

        assert_eq!(model.predict(&x), y);
        assert!(model.model().coefficients().is_some());
        Ok(())
    }
}
