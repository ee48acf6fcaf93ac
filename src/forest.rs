use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        class: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    pub fn predict(&self, row: &[f64]) -> usize {
        let mut node = 0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { class } => return *class,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Prediction {
    pub class: usize,
    /// Fraction of trees voting for the winning class.
    pub confidence: f64,
}

/// Bagged ensemble of CART trees: Gini splits, sqrt-feature subsampling,
/// bootstrap resampling, majority vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_classes: usize,
    n_features: usize,
}

impl RandomForest {
    /// Fits the forest on `x`/`y`. `x` must hold at least one row and `y`
    /// codes must lie in `0..n_classes`.
    pub fn fit(x: &[Vec<f64>], y: &[usize], n_classes: usize, params: &ForestParams) -> Self {
        let n = x.len();
        let n_features = x[0].len();
        let max_features = ((n_features as f64).sqrt().floor() as usize).max(1);
        let mut rng = StdRng::seed_from_u64(params.seed);

        let mut trees = Vec::with_capacity(params.n_trees);
        for _ in 0..params.n_trees {
            let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut builder = TreeBuilder {
                x,
                y,
                n_classes,
                max_features,
                min_samples_split: params.min_samples_split,
                max_depth: params.max_depth,
                nodes: Vec::new(),
            };
            builder.grow(&sample, 0, &mut rng);
            trees.push(DecisionTree {
                nodes: builder.nodes,
            });
        }

        RandomForest {
            trees,
            n_classes,
            n_features,
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn votes(&self, row: &[f64]) -> Vec<usize> {
        let mut votes = vec![0usize; self.n_classes];
        for tree in &self.trees {
            votes[tree.predict(row)] += 1;
        }
        votes
    }

    pub fn predict(&self, row: &[f64]) -> usize {
        argmax(&self.votes(row))
    }

    pub fn predict_with_votes(&self, row: &[f64]) -> Prediction {
        let votes = self.votes(row);
        let class = argmax(&votes);
        Prediction {
            class,
            confidence: votes[class] as f64 / self.trees.len() as f64,
        }
    }

    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> Vec<usize> {
        rows.iter().map(|row| self.predict(row)).collect()
    }
}

// ties break toward the lowest class code
fn argmax(counts: &[usize]) -> usize {
    let mut best = 0;
    for (class, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = class;
        }
    }
    best
}

fn gini(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [usize],
    n_classes: usize,
    max_features: usize,
    min_samples_split: usize,
    max_depth: Option<usize>,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn class_counts(&self, indices: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_classes];
        for &i in indices {
            counts[self.y[i]] += 1;
        }
        counts
    }

    fn push_leaf(&mut self, counts: &[usize]) -> usize {
        self.nodes.push(Node::Leaf {
            class: argmax(counts),
        });
        self.nodes.len() - 1
    }

    fn grow(&mut self, indices: &[usize], depth: usize, rng: &mut StdRng) -> usize {
        let counts = self.class_counts(indices);
        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        let depth_capped = self.max_depth.is_some_and(|d| depth >= d);
        if pure || depth_capped || indices.len() < self.min_samples_split {
            return self.push_leaf(&counts);
        }

        let Some((feature, threshold)) = self.best_split(indices, &counts, rng) else {
            return self.push_leaf(&counts);
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| self.x[i][feature] <= threshold);

        // reserve the slot so the root stays at node 0
        let node_id = self.nodes.len();
        self.nodes.push(Node::Leaf { class: 0 });
        let left = self.grow(&left_idx, depth + 1, rng);
        let right = self.grow(&right_idx, depth + 1, rng);
        self.nodes[node_id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        node_id
    }

    /// Best Gini split over a random subset of features. Constant features do
    /// not count toward the subsample budget, mirroring sklearn's splitter.
    fn best_split(
        &self,
        indices: &[usize],
        counts: &[usize],
        rng: &mut StdRng,
    ) -> Option<(usize, f64)> {
        let n_features = self.x[0].len();
        let mut order: Vec<usize> = (0..n_features).collect();
        order.shuffle(rng);

        let total = indices.len() as f64;
        let parent = gini(counts);

        let mut best: Option<(usize, f64)> = None;
        let mut best_decrease = f64::NEG_INFINITY;
        let mut evaluated = 0;

        for &feature in &order {
            if evaluated >= self.max_features {
                break;
            }

            let mut values: Vec<(f64, usize)> = indices
                .iter()
                .map(|&i| (self.x[i][feature], self.y[i]))
                .collect();
            values.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            if values[0].0 == values[values.len() - 1].0 {
                continue;
            }
            evaluated += 1;

            let mut left = vec![0usize; self.n_classes];
            let mut right = counts.to_vec();
            for w in 0..values.len() - 1 {
                let (value, class) = values[w];
                left[class] += 1;
                right[class] -= 1;
                if value == values[w + 1].0 {
                    continue;
                }

                let n_left = (w + 1) as f64;
                let n_right = total - n_left;
                let decrease =
                    parent - (n_left / total) * gini(&left) - (n_right / total) * gini(&right);
                if decrease > best_decrease {
                    best_decrease = decrease;
                    best = Some((feature, (value + values[w + 1].0) / 2.0));
                }
            }
        }

        best
    }
}
