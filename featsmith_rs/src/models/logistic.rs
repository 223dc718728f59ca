use anyhow::Result;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::{Classifier, sigmoid};

/// L2-regularised logistic regression. `C` is the inverse regularisation
/// strength, as in liblinear-style solvers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticRegressionParams {
    #[serde(rename = "C", alias = "c")]
    pub c: f64,
    pub max_iter: usize,
    /// Stop once the gradient's max-norm falls below this.
    pub tol: f64,
    pub fit_intercept: bool,
}

impl Default for LogisticRegressionParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
            tol: 1e-6,
            fit_intercept: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogisticRegression {
    params: LogisticRegressionParams,
    weights: Array1<f64>,
    intercept: f64,
}

impl LogisticRegression {
    pub fn new(params: LogisticRegressionParams) -> Self {
        Self {
            params,
            weights: Array1::zeros(0),
            intercept: 0.0,
        }
    }

    fn decision(&self, x: &Array2<f64>) -> Array1<f64> {
        x.dot(&self.weights) + self.intercept
    }
}

impl Classifier for LogisticRegression {
    /// Full-batch gradient descent on the mean log-loss plus
    /// `||w||² / (2·C·n)`, which has the same minimiser as the usual
    /// `½||w||² + C·Σ loss` objective.
    fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<()> {
        let n = x.nrows();
        let p = x.ncols();
        self.weights = Array1::zeros(p);
        self.intercept = 0.0;
        if n == 0 {
            return Ok(());
        }

        let y = Array1::from_vec(y.to_vec());
        let n_f = n as f64;
        let l2 = if self.params.c > 0.0 {
            1.0 / (self.params.c * n_f)
        } else {
            0.0
        };
        // Step from an upper bound on the loss curvature.
        let frobenius = x.iter().map(|v| v * v).sum::<f64>() / n_f;
        let lipschitz = 0.25 * (frobenius + if self.params.fit_intercept { 1.0 } else { 0.0 }) + l2;
        let step = if lipschitz > 0.0 { 1.0 / lipschitz } else { 1.0 };

        for _ in 0..self.params.max_iter {
            let residual = self.decision(x).mapv(sigmoid) - &y;
            let grad_w = x.t().dot(&residual) / n_f + &self.weights * l2;
            let grad_b = if self.params.fit_intercept {
                residual.sum() / n_f
            } else {
                0.0
            };

            self.weights.scaled_add(-step, &grad_w);
            self.intercept -= step * grad_b;

            let max_grad = grad_w.iter().fold(grad_b.abs(), |acc, g| acc.max(g.abs()));
            if max_grad < self.params.tol {
                break;
            }
        }
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
        self.decision(x)
            .iter()
            .map(|z| if *z > 0.0 { 1.0 } else { 0.0 })
            .collect()
    }

    fn coefficients(&self) -> Option<Vec<f64>> {
        Some(self.weights.to_vec())
    }
}
