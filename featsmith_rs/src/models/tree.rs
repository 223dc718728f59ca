//! Binary decision trees over additive node statistics.
//!
//! Every training row contributes a pair `(weight, target)` that sums across
//! a node: `(w, w * y)` for gini classification trees, `(hessian, gradient)`
//! for boosted trees. A [`SplitScore`] turns those sums into split gains and
//! leaf values, so one builder serves both model families.

use ndarray::{Array2, ArrayView1};
use rand::Rng;
use rand::seq::index::sample;

/// Additive statistics of the rows that reach a node.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeStats {
    pub count: usize,
    pub weight: f64,
    pub target: f64,
}

impl NodeStats {
    fn add(&mut self, weight: f64, target: f64) {
        self.count += 1;
        self.weight += weight;
        self.target += target;
    }

    fn minus(self, other: NodeStats) -> NodeStats {
        NodeStats {
            count: self.count - other.count,
            weight: self.weight - other.weight,
            target: self.target - other.target,
        }
    }
}

pub trait SplitScore {
    /// Improvement of splitting `parent` into `left` and `right`. Only
    /// strictly positive gains produce a split.
    fn gain(&self, parent: NodeStats, left: NodeStats, right: NodeStats) -> f64;

    /// Whether both children satisfy the minimum-size constraints.
    fn admissible(&self, left: NodeStats, right: NodeStats) -> bool;

    fn leaf_value(&self, stats: NodeStats) -> f64;

    /// A node that cannot improve (e.g. pure) becomes a leaf immediately.
    fn is_terminal(&self, _stats: NodeStats) -> bool {
        false
    }
}

/// Weighted gini impurity; leaves predict the positive-class share.
#[derive(Debug, Clone, Copy)]
pub struct GiniScore {
    pub min_samples_leaf: usize,
}

impl GiniScore {
    /// `weight * gini`, i.e. the impurity mass of a node.
    fn impurity_mass(stats: NodeStats) -> f64 {
        if stats.weight <= 0.0 {
            return 0.0;
        }
        2.0 * stats.target * (stats.weight - stats.target) / stats.weight
    }
}

impl SplitScore for GiniScore {
    fn gain(&self, parent: NodeStats, left: NodeStats, right: NodeStats) -> f64 {
        Self::impurity_mass(parent) - Self::impurity_mass(left) - Self::impurity_mass(right)
    }

    fn admissible(&self, left: NodeStats, right: NodeStats) -> bool {
        left.count >= self.min_samples_leaf.max(1) && right.count >= self.min_samples_leaf.max(1)
    }

    fn leaf_value(&self, stats: NodeStats) -> f64 {
        if stats.weight > 0.0 {
            stats.target / stats.weight
        } else {
            0.0
        }
    }

    fn is_terminal(&self, stats: NodeStats) -> bool {
        Self::impurity_mass(stats) <= 1e-12
    }
}

/// Second-order gain for boosting with L2-regularised leaf weights.
/// `weight` carries the hessian sum and `target` the gradient sum.
#[derive(Debug, Clone, Copy)]
pub struct NewtonScore {
    pub lambda: f64,
    pub gamma: f64,
    pub min_child_weight: f64,
}

impl NewtonScore {
    fn structure_score(&self, stats: NodeStats) -> f64 {
        stats.target * stats.target / (stats.weight + self.lambda)
    }
}

impl SplitScore for NewtonScore {
    fn gain(&self, parent: NodeStats, left: NodeStats, right: NodeStats) -> f64 {
        0.5 * (self.structure_score(left) + self.structure_score(right)
            - self.structure_score(parent))
            - self.gamma
    }

    fn admissible(&self, left: NodeStats, right: NodeStats) -> bool {
        left.weight >= self.min_child_weight && right.weight >= self.min_child_weight
    }

    fn leaf_value(&self, stats: NodeStats) -> f64 {
        -stats.target / (stats.weight + self.lambda)
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct TreeShape {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    /// Features examined per node; `None` examines all of them.
    pub max_features: Option<usize>,
}

/// A fitted tree. Importances hold the total gain credited to each feature.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    gains: Vec<f64>,
}

impl Tree {
    /// Grow a tree over `rows` (indices into `x`). `weight[i]` and
    /// `target[i]` are the per-row statistics; rows with zero weight are
    /// ignored by callers before reaching here.
    pub fn fit<S: SplitScore, R: Rng>(
        x: &Array2<f64>,
        rows: &[usize],
        weight: &[f64],
        target: &[f64],
        score: &S,
        shape: TreeShape,
        rng: &mut R,
    ) -> Tree {
        let n_features = x.ncols();
        let sorted: Vec<Vec<usize>> = (0..n_features)
            .map(|f| {
                let mut order = rows.to_vec();
                order.sort_by(|a, b| x[[*a, f]].total_cmp(&x[[*b, f]]));
                order
            })
            .collect();

        let mut builder = Builder {
            x,
            weight,
            target,
            score,
            shape,
            nodes: Vec::new(),
            gains: vec![0.0; n_features],
            in_left: vec![false; x.nrows()],
        };
        builder.grow(rows, sorted, 0, rng);
        Tree {
            nodes: builder.nodes,
            gains: builder.gains,
        }
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                None => return 0.0,
            }
        }
    }

    pub fn gains(&self) -> &[f64] {
        &self.gains
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

struct Builder<'a, S> {
    x: &'a Array2<f64>,
    weight: &'a [f64],
    target: &'a [f64],
    score: &'a S,
    shape: TreeShape,
    nodes: Vec<Node>,
    gains: Vec<f64>,
    in_left: Vec<bool>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl<S: SplitScore> Builder<'_, S> {
    fn stats(&self, rows: &[usize]) -> NodeStats {
        let mut stats = NodeStats::default();
        for &i in rows {
            stats.add(self.weight[i], self.target[i]);
        }
        stats
    }

    fn grow<R: Rng>(
        &mut self,
        rows: &[usize],
        sorted: Vec<Vec<usize>>,
        depth: usize,
        rng: &mut R,
    ) -> usize {
        let id = self.nodes.len();
        let stats = self.stats(rows);
        self.nodes.push(Node::Leaf {
            value: self.score.leaf_value(stats),
        });

        let depth_exhausted = self.shape.max_depth.is_some_and(|max| depth >= max);
        if depth_exhausted
            || rows.len() < self.shape.min_samples_split.max(2)
            || self.score.is_terminal(stats)
        {
            return id;
        }

        let Some(best) = self.best_split(&sorted, stats, rng) else {
            return id;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&i| self.x[[i, best.feature]] <= best.threshold);
        for &i in &left_rows {
            self.in_left[i] = true;
        }
        let mut left_sorted = Vec::with_capacity(sorted.len());
        let mut right_sorted = Vec::with_capacity(sorted.len());
        for order in sorted {
            let (l, r): (Vec<usize>, Vec<usize>) =
                order.into_iter().partition(|i| self.in_left[*i]);
            left_sorted.push(l);
            right_sorted.push(r);
        }
        for &i in &left_rows {
            self.in_left[i] = false;
        }

        self.gains[best.feature] += best.gain;
        let left = self.grow(&left_rows, left_sorted, depth + 1, rng);
        let right = self.grow(&right_rows, right_sorted, depth + 1, rng);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        id
    }

    fn best_split<R: Rng>(
        &self,
        sorted: &[Vec<usize>],
        parent: NodeStats,
        rng: &mut R,
    ) -> Option<BestSplit> {
        let n_features = sorted.len();
        let candidates: Vec<usize> = match self.shape.max_features {
            Some(k) if k < n_features => {
                let mut picked = sample(rng, n_features, k.max(1)).into_vec();
                picked.sort_unstable();
                picked
            }
            _ => (0..n_features).collect(),
        };

        let mut best: Option<BestSplit> = None;
        for feature in candidates {
            let order = &sorted[feature];
            let mut left = NodeStats::default();
            for pos in 0..order.len().saturating_sub(1) {
                let i = order[pos];
                left.add(self.weight[i], self.target[i]);
                let here = self.x[[i, feature]];
                let next = self.x[[order[pos + 1], feature]];
                if next <= here {
                    continue;
                }
                let right = parent.minus(left);
                if !self.score.admissible(left, right) {
                    continue;
                }
                let gain = self.score.gain(parent, left, right);
                if gain > 1e-12 && best.as_ref().is_none_or(|b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn gini_tree_separates_a_threshold_concept() {
        let x = array![[0.0, 5.0], [1.0, 5.0], [2.0, 5.0], [3.0, 5.0]];
        let y = [0.0, 0.0, 1.0, 1.0];
        let w = [1.0; 4];
        let rows: Vec<usize> = (0..4).collect();
        let shape = TreeShape {
            max_depth: None,
            min_samples_split: 2,
            max_features: None,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let tree = Tree::fit(&x, &rows, &w, &y, &GiniScore { min_samples_leaf: 1 }, shape, &mut rng);

        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.predict_row(x.row(0)), 0.0);
        assert_eq!(tree.predict_row(x.row(3)), 1.0);
        assert!(tree.gains()[0] > 0.0);
        assert_eq!(tree.gains()[1], 0.0);
    }

    #[test]
    fn newton_leaf_weight_is_regularised() {
        let score = NewtonScore {
            lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 0.0,
        };
        let stats = NodeStats {
            count: 2,
            weight: 1.0,
            target: -2.0,
        };
        assert_eq!(score.leaf_value(stats), 1.0);
    }
}
