use std::fmt;

use serde::{Deserialize, Serialize};

/// Scoring functions for the selection grid search. All of them score hard
/// 0/1 predictions and always return a finite value; higher is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    RocAuc,
    F1,
    Accuracy,
    Sharpe,
}

impl MetricKind {
    pub fn name(self) -> &'static str {
        match self {
            MetricKind::RocAuc => "roc_auc",
            MetricKind::F1 => "f1",
            MetricKind::Accuracy => "accuracy",
            MetricKind::Sharpe => "sharpe",
        }
    }

    pub fn score(self, y_true: &[f64], y_pred: &[f64]) -> f64 {
        let score = match self {
            MetricKind::RocAuc => roc_auc(y_true, y_pred),
            MetricKind::F1 => f1(y_true, y_pred),
            MetricKind::Accuracy => accuracy(y_true, y_pred),
            MetricKind::Sharpe => sharpe(y_true, y_pred),
        };
        if score.is_finite() { score } else { 0.0 }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn accuracy(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true
        .iter()
        .zip(y_pred)
        .filter(|(t, p)| (**t - **p).abs() < 0.5)
        .count();
    correct as f64 / y_true.len() as f64
}

/// F1 of the positive class (label 1). Zero when there are no true
/// positives.
pub fn f1(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (t, p) in y_true.iter().zip(y_pred) {
        match (*t > 0.5, *p > 0.5) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    let denom = 2 * tp + fp + fn_;
    if tp == 0 || denom == 0 {
        0.0
    } else {
        2.0 * tp as f64 / denom as f64
    }
}

/// Rank-based (Mann-Whitney) area under the ROC curve with average ranks
/// for ties. With a single class in `y_true` the curve is undefined and
/// the chance level 0.5 is returned.
pub fn roc_auc(y_true: &[f64], y_score: &[f64]) -> f64 {
    let n = y_true.len().min(y_score.len());
    let n_pos = y_true[..n].iter().filter(|t| **t > 0.5).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| y_score[*a].total_cmp(&y_score[*b]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && y_score[order[j + 1]] == y_score[order[i]] {
            j += 1;
        }
        // 1-based average rank of the tie block.
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = rank;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = (0..n).filter(|i| y_true[*i] > 0.5).map(|i| ranks[i]).sum();
    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    (pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

/// Risk-adjusted score of the signal `y * ŷ`: `mean / std` (population
/// std), exactly `0.0` when the product has zero variance.
pub fn sharpe(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let returns: Vec<f64> = y_true.iter().zip(y_pred).map(|(t, p)| t * p).collect();
    if returns.is_empty() {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    if std == 0.0 || !std.is_finite() {
        return 0.0;
    }
    mean / std
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharpe_is_zero_for_constant_signal() {
        let y = [1.0, 0.0, 1.0, 1.0];
        assert_eq!(sharpe(&y, &[0.0; 4]), 0.0);
        assert_eq!(sharpe(&[1.0; 4], &[1.0; 4]), 0.0);
        assert_eq!(MetricKind::Sharpe.score(&[], &[]), 0.0);
    }

    #[test]
    fn sharpe_matches_population_formula() {
        // y*ŷ = [1, 0, 1, 0]: mean 0.5, population std 0.5.
        let score = sharpe(&[1.0, 1.0, 1.0, 0.0], &[1.0, 0.0, 1.0, 1.0]);
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn auc_on_hard_predictions_is_balanced_accuracy() {
        let y = [1.0, 1.0, 0.0, 0.0];
        assert_eq!(roc_auc(&y, &[1.0, 1.0, 0.0, 0.0]), 1.0);
        assert_eq!(roc_auc(&y, &[1.0, 0.0, 0.0, 0.0]), 0.75);
        assert_eq!(roc_auc(&y, &[1.0, 1.0, 1.0, 1.0]), 0.5);
        assert_eq!(roc_auc(&[1.0, 1.0], &[0.0, 1.0]), 0.5);
    }

    #[test]
    fn f1_and_accuracy_basics() {
        let y = [1.0, 0.0, 1.0, 0.0];
        let p = [1.0, 1.0, 0.0, 0.0];
        assert_eq!(accuracy(&y, &p), 0.5);
        assert_eq!(f1(&y, &p), 0.5);
        assert_eq!(f1(&y, &[0.0; 4]), 0.0);
    }

    #[test]
    fn metric_names_round_trip_through_serde() {
        let parsed: Vec<MetricKind> =
            serde_json::from_str(r#"["roc_auc","f1","accuracy","sharpe"]"#).unwrap();
        let names: Vec<&str> = parsed.iter().map(|m| m.name()).collect();
        assert_eq!(names, ["roc_auc", "f1", "accuracy", "sharpe"]);
    }
}
