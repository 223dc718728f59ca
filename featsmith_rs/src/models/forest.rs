use anyhow::Result;
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::Classifier;
use super::tree::{GiniScore, Tree, TreeShape};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    /// Unlimited when absent.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; defaults to `sqrt(n_features)`.
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    #[serde(alias = "random_state")]
    pub seed: u64,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
            seed: 42,
        }
    }
}

/// Bagged gini trees; probability votes are averaged.
#[derive(Debug, Clone)]
pub struct RandomForest {
    params: RandomForestParams,
    trees: Vec<Tree>,
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn new(params: RandomForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            importances: Vec::new(),
        }
    }

    fn fit_tree(&self, x: &Array2<f64>, y: &[f64], tree_idx: usize) -> Tree {
        let n = x.nrows();
        let n_features = x.ncols();
        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed.wrapping_add(tree_idx as u64));

        let mut counts = vec![0.0; n];
        if self.params.bootstrap {
            for _ in 0..n {
                counts[rng.gen_range(0..n)] += 1.0;
            }
        } else {
            counts.fill(1.0);
        }
        let rows: Vec<usize> = (0..n).filter(|i| counts[*i] > 0.0).collect();
        let weighted_y: Vec<f64> = counts.iter().zip(y).map(|(w, t)| w * t).collect();

        let max_features = self
            .params
            .max_features
            .unwrap_or_else(|| ((n_features as f64).sqrt().floor() as usize).max(1));
        let shape = TreeShape {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            max_features: Some(max_features),
        };
        let score = GiniScore {
            min_samples_leaf: self.params.min_samples_leaf,
        };
        Tree::fit(x, &rows, &counts, &weighted_y, &score, shape, &mut rng)
    }

    fn positive_share(&self, x: &Array2<f64>) -> Vec<f64> {
        if self.trees.is_empty() {
            return vec![0.0; x.nrows()];
        }
        let n_trees = self.trees.len() as f64;
        x.outer_iter()
            .map(|row| {
                self.trees
                    .iter()
                    .map(|tree| tree.predict_row(row))
                    .sum::<f64>()
                    / n_trees
            })
            .collect()
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<()> {
        let n_estimators = self.params.n_estimators.max(1);
        let trees: Vec<Tree> = (0..n_estimators)
            .into_par_iter()
            .map(|idx| self.fit_tree(x, y, idx))
            .collect();

        // Mean of per-tree normalised impurity decrease.
        let mut importances = vec![0.0; x.ncols()];
        for tree in &trees {
            let total: f64 = tree.gains().iter().sum();
            if total > 0.0 {
                for (acc, gain) in importances.iter_mut().zip(tree.gains()) {
                    *acc += gain / total;
                }
            }
        }
        let sum: f64 = importances.iter().sum();
        if sum > 0.0 {
            importances.iter_mut().for_each(|v| *v /= sum);
        }

        self.trees = trees;
        self.importances = importances;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
        self.positive_share(x)
            .into_iter()
            .map(|p| if p > 0.5 { 1.0 } else { 0.0 })
            .collect()
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        Some(self.importances.clone())
    }
}
