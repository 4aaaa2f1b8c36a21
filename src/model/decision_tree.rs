//! CART classification tree with cross-validated cost-complexity pruning
//!
//! Splits minimize Gini impurity; pruning uses misclassification risk. A tree
//! is grown with a minimum split size, cut back to the complexity floor, and
//! the final size is the complexity parameter with the lowest k-fold error.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::data::dataset::{CallDataset, FeatureMatrix};
use crate::model::{check_training_data, check_width, normalize, Classifier, FittedModel, ModelDetails};
use crate::training::cross_validation::k_fold;
use crate::{ModelKind, Result, TreeConfig};

const ROOT: usize = 0;
const EPS: f64 = 1e-9;

/// Growth limits shared by single trees and forest members
#[derive(Debug, Clone, Copy)]
pub struct GrowParams {
    /// Nodes smaller than this are never split
    pub min_split: usize,
    /// Smallest allowed child
    pub min_leaf: usize,
    pub max_depth: usize,
    /// Features sampled per split; all when `None`
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    threshold: f64,
    left: usize,
    right: usize,
    /// Count-weighted Gini decrease
    gain: f64,
}

#[derive(Debug, Clone)]
struct Node {
    n: usize,
    positives: usize,
    split: Option<Split>,
}

impl Node {
    fn probability(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.positives as f64 / self.n as f64
        }
    }

    /// Misclassification count if this node were a leaf
    fn risk(&self) -> f64 {
        self.positives.min(self.n - self.positives) as f64
    }
}

fn gini(n: usize, positives: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = positives as f64 / n as f64;
    2.0 * p * (1.0 - p)
}

/// Binary classification tree stored as an arena, root at index 0
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    n_features: usize,
}

impl Tree {
    /// Grow on the given rows of `data`; `rows` may repeat (bootstrap)
    pub fn grow(data: &CallDataset, rows: &[usize], params: &GrowParams, rng: &mut StdRng) -> Tree {
        let mut tree = Tree {
            nodes: Vec::new(),
            n_features: data.n_features(),
        };
        let mut rows = rows.to_vec();
        tree.build(data, &mut rows, 0, params, rng);
        tree
    }

    fn build(
        &mut self,
        data: &CallDataset,
        rows: &mut [usize],
        depth: usize,
        params: &GrowParams,
        rng: &mut StdRng,
    ) -> usize {
        let n = rows.len();
        let positives = rows.iter().filter(|&&i| data.labels[i] >= 0.5).count();
        let id = self.nodes.len();
        self.nodes.push(Node {
            n,
            positives,
            split: None,
        });

        if n < params.min_split || depth >= params.max_depth || positives == 0 || positives == n {
            return id;
        }

        let Some(best) = best_split(data, rows, positives, params, rng) else {
            return id;
        };

        // Partition rows in place: left block holds x <= threshold
        let mut boundary = 0;
        for i in 0..n {
            if data.features.rows[rows[i]][best.feature] <= best.threshold {
                rows.swap(i, boundary);
                boundary += 1;
            }
        }
        let (left_rows, right_rows) = rows.split_at_mut(boundary);

        let left = self.build(data, left_rows, depth + 1, params, rng);
        let right = self.build(data, right_rows, depth + 1, params, rng);
        self.nodes[id].split = Some(Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
            gain: best.gain,
        });
        id
    }

    /// Probability of conversion for one feature row
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut id = ROOT;
        while let Some(split) = &self.nodes[id].split {
            id = if row[split.feature] <= split.threshold {
                split.left
            } else {
                split.right
            };
        }
        self.nodes[id].probability()
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.split.is_none()).count()
    }

    pub fn n_splits(&self) -> usize {
        self.nodes.len() - self.n_leaves()
    }

    /// Misclassification count of the root as a single leaf
    pub fn root_risk(&self) -> f64 {
        self.nodes[ROOT].risk()
    }

    /// Misclassification count over all leaves
    pub fn risk(&self) -> f64 {
        self.nodes
            .iter()
            .filter(|n| n.split.is_none())
            .map(Node::risk)
            .sum()
    }

    /// Unnormalized Gini decrease summed per feature
    pub fn raw_importances(&self) -> Vec<f64> {
        let mut scores = vec![0.0; self.n_features];
        for split in self.nodes.iter().filter_map(|n| n.split) {
            scores[split.feature] += split.gain;
        }
        scores
    }

    /// Smallest subtree minimizing `risk + alpha * leaves`
    pub fn pruned(&self, alpha: f64) -> Tree {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        self.copy_pruned(ROOT, alpha, &mut nodes);
        Tree {
            nodes,
            n_features: self.n_features,
        }
    }

    /// Returns (new id, subtree risk, subtree leaves)
    fn copy_pruned(&self, id: usize, alpha: f64, out: &mut Vec<Node>) -> (usize, f64, usize) {
        let node = &self.nodes[id];
        let new_id = out.len();
        out.push(Node {
            split: None,
            ..node.clone()
        });

        if let Some(split) = node.split {
            let (left, left_risk, left_leaves) = self.copy_pruned(split.left, alpha, out);
            let (right, right_risk, right_leaves) = self.copy_pruned(split.right, alpha, out);
            let risk = left_risk + right_risk;
            let leaves = left_leaves + right_leaves;

            if node.risk() - risk > alpha * (leaves - 1) as f64 + EPS {
                out[new_id].split = Some(Split {
                    left,
                    right,
                    ..split
                });
                return (new_id, risk, leaves);
            }
            out.truncate(new_id + 1);
        }
        (new_id, node.risk(), 1)
    }

    /// Weakest-link sequence: the alpha at which each nested subtree becomes
    /// optimal, from this tree (alpha 0) down to the root alone.
    fn weakest_links(&self) -> Vec<PruneStep> {
        let mut collapsed = vec![false; self.nodes.len()];
        let mut links = Vec::new();
        let (risk, leaves) = self.link_strengths(ROOT, &collapsed, &mut links);
        let mut steps = vec![PruneStep {
            alpha: 0.0,
            leaves,
            risk,
        }];

        while !links.is_empty() {
            let weakest = links.iter().map(|&(_, g)| g).fold(f64::INFINITY, f64::min);
            for &(id, g) in &links {
                if g <= weakest + EPS {
                    collapsed[id] = true;
                }
            }

            links.clear();
            let (risk, leaves) = self.link_strengths(ROOT, &collapsed, &mut links);
            let step = PruneStep {
                alpha: weakest.max(0.0),
                leaves,
                risk,
            };
            match steps.last_mut() {
                Some(last) if (last.alpha - step.alpha).abs() <= EPS => *last = step,
                _ => steps.push(step),
            }
        }
        steps
    }

    /// Collects (node, g) for every active internal node and returns the
    /// subtree (risk, leaves)
    fn link_strengths(&self, id: usize, collapsed: &[bool], out: &mut Vec<(usize, f64)>) -> (f64, usize) {
        let node = &self.nodes[id];
        match node.split {
            Some(split) if !collapsed[id] => {
                let (left_risk, left_leaves) = self.link_strengths(split.left, collapsed, out);
                let (right_risk, right_leaves) = self.link_strengths(split.right, collapsed, out);
                let risk = left_risk + right_risk;
                let leaves = left_leaves + right_leaves;
                out.push((id, (node.risk() - risk) / (leaves - 1) as f64));
                (risk, leaves)
            }
            _ => (node.risk(), 1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PruneStep {
    alpha: f64,
    leaves: usize,
    risk: f64,
}

struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

fn best_split(
    data: &CallDataset,
    rows: &[usize],
    positives: usize,
    params: &GrowParams,
    rng: &mut StdRng,
) -> Option<Candidate> {
    let n = rows.len();
    let n_features = data.n_features();
    let parent = n as f64 * gini(n, positives);

    let mut features: Vec<usize> = (0..n_features).collect();
    if let Some(m) = params.max_features {
        if m < n_features {
            features.shuffle(rng);
            features.truncate(m.max(1));
        }
    }

    let min_leaf = params.min_leaf.max(1);
    let mut best: Option<Candidate> = None;
    let mut pairs: Vec<(f64, bool)> = Vec::with_capacity(n);

    for &feature in &features {
        pairs.clear();
        pairs.extend(
            rows.iter()
                .map(|&i| (data.features.rows[i][feature], data.labels[i] >= 0.5)),
        );
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_pos = 0;
        for i in 0..n - 1 {
            if pairs[i].1 {
                left_pos += 1;
            }
            if pairs[i].0 == pairs[i + 1].0 {
                continue;
            }
            let n_left = i + 1;
            let n_right = n - n_left;
            if n_left < min_leaf || n_right < min_leaf {
                continue;
            }

            let children = n_left as f64 * gini(n_left, left_pos)
                + n_right as f64 * gini(n_right, positives - left_pos);
            let gain = parent - children;
            if gain > EPS && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(Candidate {
                    feature,
                    threshold: (pairs[i].0 + pairs[i + 1].0) / 2.0,
                    gain,
                });
            }
        }
    }
    best
}

/// One row of the complexity table
#[derive(Debug, Clone, Serialize)]
pub struct CpRow {
    pub cp: f64,
    pub n_splits: usize,
    /// Training risk relative to the root
    pub rel_error: f64,
    /// Cross-validated risk relative to the root; absent without CV
    pub xerror: Option<f64>,
}

/// Decision tree capability
pub struct DecisionTreeClassifier {
    config: TreeConfig,
}

impl DecisionTreeClassifier {
    pub fn new(config: TreeConfig) -> Self {
        DecisionTreeClassifier { config }
    }

    fn params(&self) -> GrowParams {
        GrowParams {
            min_split: self.config.min_split.max(2),
            min_leaf: ((self.config.min_split as f64) / 3.0).round().max(1.0) as usize,
            max_depth: self.config.max_depth,
            max_features: None,
        }
    }

    /// Complexity table, largest cp first, with k-fold error for each row
    fn cp_table(&self, tree: &Tree, data: &CallDataset, rng: &mut StdRng) -> Vec<CpRow> {
        let root_risk = tree.root_risk();
        let steps = tree.weakest_links();
        let cps: Vec<f64> = steps
            .iter()
            .map(|s| (s.alpha / root_risk).max(self.config.cp))
            .collect();

        // Representative cp inside each row's interval
        let candidates: Vec<f64> = (0..cps.len())
            .map(|k| match cps.get(k + 1) {
                Some(next) => (cps[k] * next).sqrt(),
                None => f64::INFINITY,
            })
            .collect();

        let mut errors = vec![0usize; cps.len()];
        let splits = k_fold(data.n_samples(), self.config.folds, rng);
        let params = self.params();
        for split in &splits {
            if split.train_indices.is_empty() {
                continue;
            }
            let fold_tree = Tree::grow(data, &split.train_indices, &params, rng);
            let fold_root = fold_tree.root_risk();
            for (k, &candidate) in candidates.iter().enumerate() {
                let pruned = fold_tree.pruned(candidate * fold_root);
                errors[k] += split
                    .test_indices
                    .iter()
                    .filter(|&&i| {
                        let predicted = pruned.predict_row(&data.features.rows[i]) >= 0.5;
                        predicted != (data.labels[i] >= 0.5)
                    })
                    .count();
            }
        }

        let has_cv = !splits.is_empty();
        let mut table: Vec<CpRow> = steps
            .iter()
            .zip(&cps)
            .zip(&errors)
            .map(|((step, &cp), &err)| CpRow {
                cp,
                n_splits: step.leaves - 1,
                rel_error: step.risk / root_risk,
                xerror: has_cv.then(|| err as f64 / root_risk),
            })
            .collect();
        table.reverse();
        table
    }
}

impl Classifier for DecisionTreeClassifier {
    fn kind(&self) -> ModelKind {
        ModelKind::DecisionTree
    }

    fn fit(&self, data: &CallDataset, rng: &mut StdRng) -> Result<Box<dyn FittedModel>> {
        check_training_data(data)?;

        let rows: Vec<usize> = (0..data.n_samples()).collect();
        let grown = Tree::grow(data, &rows, &self.params(), rng);
        let root_risk = grown.root_risk();
        log::debug!("Grown tree: {} leaves", grown.n_leaves());

        if root_risk == 0.0 {
            log::warn!("Training rows hold a single class; tree is a single leaf");
            let tree = grown.pruned(f64::INFINITY);
            return Ok(Box::new(FittedTree {
                feature_names: data.features.column_names(),
                chosen_cp: self.config.cp,
                cp_table: vec![CpRow {
                    cp: self.config.cp,
                    n_splits: 0,
                    rel_error: 0.0,
                    xerror: None,
                }],
                tree,
            }));
        }

        let floor = grown.pruned(self.config.cp * root_risk);
        let cp_table = self.cp_table(&floor, data, rng);

        // Lowest cross-validated error; ties go to the smaller tree
        let chosen = cp_table
            .iter()
            .fold(None::<&CpRow>, |best, row| match (best, row.xerror) {
                (Some(b), Some(x)) if x >= b.xerror.unwrap_or(f64::INFINITY) => Some(b),
                (Some(b), None) => Some(b),
                _ => Some(row),
            })
            .map(|row| row.cp)
            .unwrap_or(self.config.cp);

        let tree = floor.pruned(chosen * root_risk);
        log::info!(
            "Decision tree: cp={:.5}, {} splits, {} leaves",
            chosen,
            tree.n_splits(),
            tree.n_leaves()
        );

        Ok(Box::new(FittedTree {
            feature_names: data.features.column_names(),
            chosen_cp: chosen,
            cp_table,
            tree,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct FittedTree {
    feature_names: Vec<String>,
    tree: Tree,
    chosen_cp: f64,
    cp_table: Vec<CpRow>,
}

impl FittedTree {
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn cp_table(&self) -> &[CpRow] {
        &self.cp_table
    }
}

impl FittedModel for FittedTree {
    fn kind(&self) -> ModelKind {
        ModelKind::DecisionTree
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        check_width(self.feature_names.len(), features)?;
        Ok(features
            .rows
            .iter()
            .map(|row| self.tree.predict_row(row))
            .collect())
    }

    fn importances(&self) -> Vec<f64> {
        normalize(self.tree.raw_importances())
    }

    fn details(&self) -> ModelDetails {
        ModelDetails::DecisionTree {
            chosen_cp: self.chosen_cp,
            n_leaves: self.tree.n_leaves(),
            cp_table: self.cp_table.clone(),
        }
    }
}
