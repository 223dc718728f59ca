use anyhow::Result;
use ndarray::Array2;
use rand::SeedableRng;
use rand::seq::index::sample;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{Classifier, sigmoid};
use super::tree::{NewtonScore, Tree, TreeShape};

/// Gradient-boosted trees with logistic loss, configured with the usual
/// xgboost parameter names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XgboostParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    #[serde(alias = "eta")]
    pub learning_rate: f64,
    #[serde(alias = "lambda")]
    pub reg_lambda: f64,
    #[serde(alias = "min_split_loss")]
    pub gamma: f64,
    pub min_child_weight: f64,
    /// Row fraction drawn (without replacement) for each tree.
    pub subsample: f64,
    #[serde(alias = "random_state")]
    pub seed: u64,
}

impl Default for XgboostParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            learning_rate: 0.3,
            reg_lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
            subsample: 1.0,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GradientBoosting {
    params: XgboostParams,
    base_margin: f64,
    trees: Vec<Tree>,
    importances: Vec<f64>,
}

impl GradientBoosting {
    pub fn new(params: XgboostParams) -> Self {
        Self {
            params,
            base_margin: 0.0,
            trees: Vec::new(),
            importances: Vec::new(),
        }
    }

    fn margins(&self, x: &Array2<f64>) -> Vec<f64> {
        let eta = self.params.learning_rate;
        x.outer_iter()
            .map(|row| {
                self.base_margin
                    + self
                        .trees
                        .iter()
                        .map(|tree| eta * tree.predict_row(row))
                        .sum::<f64>()
            })
            .collect()
    }
}

impl Classifier for GradientBoosting {
    fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<()> {
        let n = x.nrows();
        let eta = self.params.learning_rate;
        let score = NewtonScore {
            lambda: self.params.reg_lambda,
            gamma: self.params.gamma,
            min_child_weight: self.params.min_child_weight,
        };
        let shape = TreeShape {
            max_depth: Some(self.params.max_depth),
            min_samples_split: 2,
            max_features: None,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        let n_sub = ((n as f64) * self.params.subsample.clamp(0.0, 1.0)).round() as usize;

        // Start from a 0.5 base probability, i.e. zero margin.
        self.base_margin = 0.0;
        self.trees.clear();
        let mut margin = vec![self.base_margin; n];
        let mut gains = vec![0.0; x.ncols()];

        for _ in 0..self.params.n_estimators {
            let mut grad = vec![0.0; n];
            let mut hess = vec![0.0; n];
            for i in 0..n {
                let p = sigmoid(margin[i]);
                grad[i] = p - y[i];
                hess[i] = (p * (1.0 - p)).max(1e-16);
            }

            let rows: Vec<usize> = if n_sub > 0 && n_sub < n {
                let mut picked = sample(&mut rng, n, n_sub).into_vec();
                picked.sort_unstable();
                picked
            } else {
                (0..n).collect()
            };

            let tree = Tree::fit(x, &rows, &hess, &grad, &score, shape, &mut rng);
            for (acc, gain) in gains.iter_mut().zip(tree.gains()) {
                *acc += gain;
            }
            for (i, row) in x.outer_iter().enumerate() {
                margin[i] += eta * tree.predict_row(row);
            }
            self.trees.push(tree);
        }

        let total: f64 = gains.iter().sum();
        if total > 0.0 {
            gains.iter_mut().for_each(|g| *g /= total);
        }
        self.importances = gains;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
        self.margins(x)
            .into_iter()
            .map(|m| if sigmoid(m) > 0.5 { 1.0 } else { 0.0 })
            .collect()
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        Some(self.importances.clone())
    }
}
