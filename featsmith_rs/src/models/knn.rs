use anyhow::Result;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use super::Classifier;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnnParams {
    pub n_neighbors: usize,
}

impl Default for KnnParams {
    fn default() -> Self {
        Self { n_neighbors: 5 }
    }
}

/// Uniform-weight majority vote over euclidean neighbours. Exposes neither
/// importances nor coefficients.
#[derive(Debug, Clone)]
pub struct KNearestNeighbors {
    params: KnnParams,
    train_x: Array2<f64>,
    train_y: Vec<f64>,
}

impl KNearestNeighbors {
    pub fn new(params: KnnParams) -> Self {
        Self {
            params,
            train_x: Array2::zeros((0, 0)),
            train_y: Vec::new(),
        }
    }

    fn vote(&self, row: ArrayView1<f64>) -> f64 {
        let k = self.params.n_neighbors.max(1).min(self.train_y.len());
        if k == 0 {
            return 0.0;
        }
        let mut distances: Vec<(f64, usize)> = self
            .train_x
            .outer_iter()
            .enumerate()
            .map(|(idx, train)| {
                let d: f64 = train
                    .iter()
                    .zip(row.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                (d, idx)
            })
            .collect();
        // Stable on index so equidistant neighbours resolve deterministically.
        distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let positives = distances[..k]
            .iter()
            .filter(|(_, idx)| self.train_y[*idx] > 0.5)
            .count();
        if positives * 2 > k { 1.0 } else { 0.0 }
    }
}

impl Classifier for KNearestNeighbors {
    fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<()> {
        self.train_x = x.clone();
        self.train_y = y.to_vec();
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
        x.outer_iter().map(|row| self.vote(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn votes_with_nearest_rows() -> Result<()> {
        let x = array![[0.0], [0.1], [0.2], [5.0], [5.1], [5.2]];
        let y = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut model = KNearestNeighbors::new(KnnParams { n_neighbors: 3 });
        model.fit(&x, &y)?;

        assert_eq!(model.predict(&array![[0.05], [4.9]]), vec![0.0, 1.0]);
        assert!(model.feature_importances().is_none());
        assert!(model.coefficients().is_none());
        Ok(())
    }
}
