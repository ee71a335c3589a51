//! Random forest classifier: bagged CART trees with gini splits

use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Forest configuration
#[derive(Debug, Clone)]
pub struct RandomForestParams {
    /// Number of trees in the ensemble
    pub n_trees: usize,
    /// Maximum depth per tree
    pub max_depth: usize,
    /// Minimum samples required to attempt a split
    pub min_samples_split: usize,
    /// Seed for bootstrap and feature sampling
    pub seed: u64,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_trees: 200,
            max_depth: 10,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    /// Fraction of positive samples that reached this leaf during fitting
    Leaf { probability: f64 },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn probability(&self, row: &ArrayView1<f64>) -> f64 {
        match self {
            Node::Leaf { probability } => *probability,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] <= *threshold {
                    left.probability(row)
                } else {
                    right.probability(row)
                }
            }
        }
    }
}

/// A single fitted CART tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Node,
}

impl DecisionTree {
    /// Positive-class probability for one feature row
    pub fn predict_proba(&self, row: &ArrayView1<f64>) -> f64 {
        self.root.probability(row)
    }
}

/// Bagged ensemble of decision trees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit the forest on a feature matrix and 0/1 targets.
    ///
    /// Each tree fits a bootstrap sample of the rows and considers a random
    /// sqrt-sized feature subset at every split. All randomness derives from
    /// the configured seed, so refitting with the same inputs reproduces the
    /// same forest.
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, params: &RandomForestParams) -> crate::Result<Self> {
        if x.nrows() == 0 {
            anyhow::bail!("cannot fit a random forest on an empty matrix");
        }
        if x.nrows() != y.len() {
            anyhow::bail!(
                "feature matrix has {} rows but target vector has {}",
                x.nrows(),
                y.len()
            );
        }
        if params.n_trees == 0 {
            anyhow::bail!("a random forest needs at least one tree");
        }

        let n = x.nrows();
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_trees);

        for _ in 0..params.n_trees {
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let root = grow_tree(x, y, &bootstrap, 0, params, &mut rng);
            trees.push(DecisionTree { root });
        }

        Ok(Self { trees })
    }

    /// Number of trees in the ensemble
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Mean positive-class probability across the trees, per row
    pub fn predict_proba(&self, x: &Array2<f64>) -> Array1<f64> {
        let mut probs = Array1::zeros(x.nrows());
        for (i, row) in x.rows().into_iter().enumerate() {
            let total: f64 = self.trees.iter().map(|t| t.predict_proba(&row)).sum();
            probs[i] = total / self.trees.len() as f64;
        }
        probs
    }

    /// Majority-vote class labels (0.0 or 1.0), per row
    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        self.predict_proba(x)
            .mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 })
    }
}

fn grow_tree(
    x: &Array2<f64>,
    y: &Array1<f64>,
    indices: &[usize],
    depth: usize,
    params: &RandomForestParams,
    rng: &mut StdRng,
) -> Node {
    let positives: f64 = indices.iter().map(|&i| y[i]).sum();
    let probability = positives / indices.len() as f64;

    let pure = probability == 0.0 || probability == 1.0;
    if pure || depth >= params.max_depth || indices.len() < params.min_samples_split {
        return Node::Leaf { probability };
    }

    // Random sqrt-sized feature subset per split
    let n_features = x.ncols();
    let k = ((n_features as f64).sqrt().round() as usize).clamp(1, n_features);
    let mut candidates: Vec<usize> = (0..n_features).collect();
    candidates.shuffle(rng);
    candidates.truncate(k);

    match best_split(x, y, indices, &candidates) {
        None => Node::Leaf { probability },
        Some((feature, threshold, left_idx, right_idx)) => Node::Split {
            feature,
            threshold,
            left: Box::new(grow_tree(x, y, &left_idx, depth + 1, params, rng)),
            right: Box::new(grow_tree(x, y, &right_idx, depth + 1, params, rng)),
        },
    }
}

/// Find the gini-optimal split over the candidate features.
///
/// Returns the feature, a midpoint threshold, and the two row partitions, or
/// `None` when no split improves on the parent impurity.
fn best_split(
    x: &Array2<f64>,
    y: &Array1<f64>,
    indices: &[usize],
    candidates: &[usize],
) -> Option<(usize, f64, Vec<usize>, Vec<usize>)> {
    let n = indices.len() as f64;
    let total_pos: f64 = indices.iter().map(|&i| y[i]).sum();
    let parent_gini = gini(total_pos, n);

    let mut best: Option<(f64, usize, f64)> = None;

    for &feature in candidates {
        // Sort rows by this feature and scan prefix counts
        let mut order: Vec<usize> = indices.to_vec();
        order.sort_by(|&a, &b| {
            x[[a, feature]]
                .partial_cmp(&x[[b, feature]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut left_n = 0.0;
        let mut left_pos = 0.0;
        for w in 0..order.len() - 1 {
            left_n += 1.0;
            left_pos += y[order[w]];

            let lo = x[[order[w], feature]];
            let hi = x[[order[w + 1], feature]];
            if lo == hi {
                continue;
            }

            let right_n = n - left_n;
            let right_pos = total_pos - left_pos;
            let weighted =
                (left_n * gini(left_pos, left_n) + right_n * gini(right_pos, right_n)) / n;

            if weighted + 1e-12 < best.map_or(parent_gini, |(g, _, _)| g) {
                best = Some((weighted, feature, (lo + hi) / 2.0));
            }
        }
    }

    let (_, feature, threshold) = best?;
    let (left, right): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .partition(|&&i| x[[i, feature]] <= threshold);
    if left.is_empty() || right.is_empty() {
        return None;
    }
    Some((feature, threshold, left, right))
}

/// Gini impurity of a binary node with `pos` positives out of `n` samples
fn gini(pos: f64, n: f64) -> f64 {
    if n == 0.0 {
        return 0.0;
    }
    let p = pos / n;
    2.0 * p * (1.0 - p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn separable_data() -> (Array2<f64>, Array1<f64>) {
        // Feature 0 cleanly separates the classes at 0.5
        let x = array![
            [0.0, 3.0],
            [0.1, 7.0],
            [0.2, 1.0],
            [0.3, 9.0],
            [0.7, 2.0],
            [0.8, 8.0],
            [0.9, 4.0],
            [1.0, 6.0],
        ];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn test_fit_and_predict() {
        let (x, y) = separable_data();
        let params = RandomForestParams {
            n_trees: 25,
            ..Default::default()
        };
        let forest = RandomForest::fit(&x, &y, &params).unwrap();

        assert_eq!(forest.n_trees(), 25);
        let predictions = forest.predict(&x);
        for (pred, truth) in predictions.iter().zip(y.iter()) {
            assert_eq!(pred, truth);
        }
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (x, y) = separable_data();
        let params = RandomForestParams {
            n_trees: 10,
            ..Default::default()
        };
        let a = RandomForest::fit(&x, &y, &params).unwrap();
        let b = RandomForest::fit(&x, &y, &params).unwrap();

        assert_eq!(a.predict_proba(&x), b.predict_proba(&x));
    }

    #[test]
    fn test_probabilities_bounded() {
        let (x, y) = separable_data();
        let forest = RandomForest::fit(&x, &y, &RandomForestParams::default()).unwrap();
        for p in forest.predict_proba(&x).iter() {
            assert!((0.0..=1.0).contains(p));
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let (x, _) = separable_data();
        let y = array![0.0, 1.0];
        assert!(RandomForest::fit(&x, &y, &RandomForestParams::default()).is_err());
    }

    #[test]
    fn test_gini() {
        assert_eq!(gini(0.0, 4.0), 0.0);
        assert_eq!(gini(4.0, 4.0), 0.0);
        assert!((gini(2.0, 4.0) - 0.5).abs() < 1e-12);
    }
}
