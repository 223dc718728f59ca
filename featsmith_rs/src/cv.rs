//! Cross-validation splits and feature standardization.

use ndarray::{Array1, Array2, Axis};

/// Row indices of one cross-validation fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
}

/// Unshuffled stratified k-fold.
///
/// Labels are sorted and dealt round-robin across folds to size each fold's
/// share of every class; each class's rows are then assigned to folds in
/// their original order. Every row is tested exactly once. Callers must
/// guarantee `labels.len() >= n_splits`.
pub fn stratified_k_fold(labels: &[f64], n_splits: usize) -> Vec<CvSplit> {
    let n = labels.len();
    if n_splits == 0 || n == 0 {
        return Vec::new();
    }

    let mut classes: Vec<f64> = labels.to_vec();
    classes.sort_by(f64::total_cmp);
    classes.dedup();
    let encode = |value: f64| {
        classes
            .binary_search_by(|c| c.total_cmp(&value))
            .unwrap_or_default()
    };
    let encoded: Vec<usize> = labels.iter().map(|v| encode(*v)).collect();

    let mut order = encoded.clone();
    order.sort_unstable();

    // allocation[fold][class]: how many rows of `class` land in `fold`.
    let mut allocation = vec![vec![0usize; classes.len()]; n_splits];
    for (i, class) in order.iter().enumerate() {
        allocation[i % n_splits][*class] += 1;
    }

    let mut test_fold = vec![0usize; n];
    for class in 0..classes.len() {
        let mut folds = allocation
            .iter()
            .enumerate()
            .flat_map(|(fold, counts)| std::iter::repeat(fold).take(counts[class]));
        for (row, _) in encoded.iter().enumerate().filter(|(_, c)| **c == class) {
            test_fold[row] = folds.next().unwrap_or(n_splits - 1);
        }
    }

    (0..n_splits)
        .map(|fold| {
            let (test_indices, train_indices): (Vec<usize>, Vec<usize>) =
                (0..n).partition(|row| test_fold[*row] == fold);
            CvSplit {
                train_indices,
                test_indices,
            }
        })
        .collect()
}

/// Per-column standardization to zero mean and unit (population) variance.
/// Constant columns are centred but not scaled.
#[derive(Debug, Clone, Default)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: &Array2<f64>) -> Self {
        let n_features = x.ncols();
        if x.nrows() == 0 {
            return Self {
                mean: Array1::zeros(n_features),
                scale: Array1::ones(n_features),
            };
        }
        let mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_features));
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s.is_finite() && s > 0.0 { s } else { 1.0 });
        Self { mean, scale }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean) / &self.scale
    }

    pub fn fit_transform(x: &Array2<f64>) -> (Self, Array2<f64>) {
        let scaler = Self::fit(x);
        let scaled = scaler.transform(x);
        (scaler, scaled)
    }
}
