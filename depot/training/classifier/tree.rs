use ndarray::{Array2, ArrayView1};
use rand::seq::index;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Gains below this are treated as no improvement.
const MIN_GAIN: f64 = 1e-12;

/// Growth limits for one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TreeSettings {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features examined per split.
    pub max_features: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    /// Class probabilities of the training rows that reached the leaf.
    Leaf { distribution: Vec<f64> },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Classification tree grown with Gini impurity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Node,
}

/// Borrowed training inputs shared by every node of one tree.
struct Grower<'a> {
    x: &'a Array2<f64>,
    y: &'a [usize],
    n_classes: usize,
    settings: TreeSettings,
}

impl DecisionTree {
    /// Grows a tree over `rows` of `x` (rows may repeat, as with bootstrap samples).
    pub(crate) fn grow(
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        rows: &[usize],
        settings: TreeSettings,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let grower = Grower {
            x,
            y,
            n_classes,
            settings,
        };
        Self {
            root: grower.node(rows, 0, rng),
        }
    }

    /// Class distribution of the leaf `sample` falls into.
    pub(crate) fn distribution(&self, sample: ArrayView1<'_, f64>) -> &[f64] {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[*feature] <= *threshold {
                        left.as_ref()
                    } else {
                        right.as_ref()
                    };
                }
            }
        }
    }

    /// Number of levels below the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        fn walk(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        walk(&self.root)
    }
}

impl Grower<'_> {
    fn node(&self, rows: &[usize], depth: usize, rng: &mut ChaCha8Rng) -> Node {
        let counts = self.class_counts(rows);
        let pure = counts.iter().filter(|count| **count > 0).count() <= 1;
        let depth_reached = self.settings.max_depth.is_some_and(|max| depth >= max);
        if pure || depth_reached || rows.len() < self.settings.min_samples_split {
            return leaf(&counts, rows.len());
        }
        let n_features = self.x.ncols();
        let candidates = index::sample(rng, n_features, self.settings.max_features.min(n_features));
        let Some((feature, threshold)) = self.best_split(rows, &counts, &candidates.into_vec())
        else {
            return leaf(&counts, rows.len());
        };
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&row| self.x[[row, feature]] <= threshold);
        Node::Split {
            feature,
            threshold,
            left: Box::new(self.node(&left_rows, depth + 1, rng)),
            right: Box::new(self.node(&right_rows, depth + 1, rng)),
        }
    }

    fn class_counts(&self, rows: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &row in rows {
            counts[self.y[row]] += 1;
        }
        counts
    }

    /// Best (feature, threshold) by Gini gain, sweeping each candidate feature in sorted order.
    #[allow(clippy::cast_precision_loss)]
    fn best_split(&self, rows: &[usize], counts: &[usize], features: &[usize]) -> Option<(usize, f64)> {
        let total = rows.len();
        let parent = gini(counts, total);
        let min_leaf = self.settings.min_samples_leaf.max(1);
        let mut best: Option<(usize, f64, f64)> = None;
        let mut order = rows.to_vec();
        for &feature in features {
            order.sort_by(|a, b| self.x[[*a, feature]].total_cmp(&self.x[[*b, feature]]));
            let mut left = vec![0_usize; self.n_classes];
            for pos in 0..total.saturating_sub(1) {
                left[self.y[order[pos]]] += 1;
                let left_n = pos + 1;
                let right_n = total - left_n;
                let here = self.x[[order[pos], feature]];
                let next = self.x[[order[pos + 1], feature]];
                if next <= here || left_n < min_leaf || right_n < min_leaf {
                    continue;
                }
                let right: Vec<usize> = counts.iter().zip(&left).map(|(all, l)| all - l).collect();
                let weighted = (left_n as f64).mul_add(
                    gini(&left, left_n),
                    right_n as f64 * gini(&right, right_n),
                ) / total as f64;
                let gain = parent - weighted;
                if gain > best.map_or(MIN_GAIN, |(_, _, best_gain)| best_gain + MIN_GAIN) {
                    best = Some((feature, here + (next - here) / 2.0, gain));
                }
            }
        }
        best.map(|(feature, threshold, _)| (feature, threshold))
    }
}

#[allow(clippy::cast_precision_loss)]
fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|count| {
            let share = *count as f64 / total;
            share * share
        })
        .sum::<f64>()
}

#[allow(clippy::cast_precision_loss)]
fn leaf(counts: &[usize], total: usize) -> Node {
    let total = total.max(1) as f64;
    Node::Leaf {
        distribution: counts.iter().map(|count| *count as f64 / total).collect(),
    }
}
