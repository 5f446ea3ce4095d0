//! Tree growing.
//!
//! Two strategies produce one decision tree from a node's example subset:
//!
//! - **Local** (depth-first): recursively split until the depth bound,
//!   `min_examples`, or the lack of a viable split turns a node into a leaf.
//! - **Best-first global**: a priority queue of candidate leaves keyed by
//!   split score; the best leaf is expanded until the queue empties or the
//!   node budget is reached, ties broken by insertion order.
//!
//! Leaf values are delegated to the caller through a set-leaf callback: a
//! Newton step for gradient boosting, a weighted mean or class distribution
//! for random forests.

use std::collections::BinaryHeap;
use std::collections::HashMap;

use rand_xoshiro::Xoshiro256PlusPlus;

use crate::dataset::{RowIdx, VerticalDataset};
use crate::error::{Error, Result};
use crate::tree::split::{find_best_split, SplitCandidate, SplitterInputs, TargetStats};
use crate::tree::{GrowingStrategy, InternalNode, LeafPayload, Node, Tree};

/// Computes the payload of a leaf from its examples and statistics.
pub type SetLeafFn<'a> = dyn Fn(&[RowIdx], &TargetStats) -> LeafPayload + 'a;

/// A grown tree plus the training examples that reached each leaf.
pub struct GrownTree {
    pub tree: Tree,
    /// `(leaf node index, examples)` pairs, ordered by node index.
    pub leaf_examples: Vec<(u32, Vec<RowIdx>)>,
}

// =============================================================================
// Grower
// =============================================================================

/// Grows one tree over a node subset using the configured strategy.
pub struct TreeGrower<'a> {
    pub inputs: SplitterInputs<'a>,
}

impl<'a> TreeGrower<'a> {
    pub fn new(inputs: SplitterInputs<'a>) -> Self {
        Self { inputs }
    }

    pub fn grow(
        &self,
        selected: Vec<RowIdx>,
        rng: &mut Xoshiro256PlusPlus,
        set_leaf: &SetLeafFn<'_>,
    ) -> Result<GrownTree> {
        if selected.is_empty() {
            return Err(Error::internal("cannot grow a tree from zero examples"));
        }
        match self.inputs.params.growing_strategy {
            GrowingStrategy::Local => self.grow_local(selected, rng, set_leaf),
            GrowingStrategy::BestFirstGlobal => self.grow_best_first(selected, rng, set_leaf),
        }
    }

    fn node_stats(&self, selected: &[RowIdx]) -> TargetStats {
        TargetStats::from_examples(
            &self.inputs.targets,
            selected.iter().copied(),
            self.inputs.weights,
        )
    }

    /// Route the node's examples through a split condition.
    fn partition(
        &self,
        selected: &[RowIdx],
        split: &SplitCandidate,
    ) -> Result<(Vec<RowIdx>, Vec<RowIdx>)> {
        let mut neg = Vec::new();
        let mut pos = Vec::new();
        for &row in selected {
            let side = match split.condition.evaluate(self.inputs.dataset, row as usize)? {
                Some(result) => result,
                None => split.missing_to_positive,
            };
            if side {
                pos.push(row);
            } else {
                neg.push(row);
            }
        }
        Ok((neg, pos))
    }

    // -------------------------------------------------------------------------
    // Local (depth-first) strategy
    // -------------------------------------------------------------------------

    fn grow_local(
        &self,
        selected: Vec<RowIdx>,
        rng: &mut Xoshiro256PlusPlus,
        set_leaf: &SetLeafFn<'_>,
    ) -> Result<GrownTree> {
        let mut tree = Tree::new();
        let mut leaves = Vec::new();
        self.grow_local_node(&mut tree, selected, 0, rng, set_leaf, &mut leaves)?;
        leaves.sort_by_key(|(node, _)| *node);
        Ok(GrownTree { tree, leaf_examples: leaves })
    }

    fn grow_local_node(
        &self,
        tree: &mut Tree,
        selected: Vec<RowIdx>,
        depth: u32,
        rng: &mut Xoshiro256PlusPlus,
        set_leaf: &SetLeafFn<'_>,
        leaves: &mut Vec<(u32, Vec<RowIdx>)>,
    ) -> Result<u32> {
        let stats = self.node_stats(&selected);
        let params = self.inputs.params;

        let split = if depth >= params.max_depth
            || selected.len() < params.min_examples as usize
        {
            None
        } else {
            find_best_split(&self.inputs, &selected, &stats, rng)?
        };

        match split {
            None => {
                let idx = tree.push_node(Node::Leaf(set_leaf(&selected, &stats)));
                leaves.push((idx, selected));
                Ok(idx)
            }
            Some(split) => {
                let (neg, pos) = self.partition(&selected, &split)?;
                if neg.is_empty() || pos.is_empty() {
                    let idx = tree.push_node(Node::Leaf(set_leaf(&selected, &stats)));
                    leaves.push((idx, selected));
                    return Ok(idx);
                }
                // Parent slot first so children always follow it.
                let idx = tree.push_node(Node::Leaf(LeafPayload::regressor(0.0)));
                let negative_child =
                    self.grow_local_node(tree, neg, depth + 1, rng, set_leaf, leaves)?;
                let positive_child =
                    self.grow_local_node(tree, pos, depth + 1, rng, set_leaf, leaves)?;
                *tree.node_mut(idx) = Node::Internal(InternalNode {
                    condition: split.condition,
                    missing_to_positive: split.missing_to_positive,
                    split_score: split.score as f32,
                    negative_child,
                    positive_child,
                });
                Ok(idx)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Best-first global strategy
    // -------------------------------------------------------------------------

    fn grow_best_first(
        &self,
        selected: Vec<RowIdx>,
        rng: &mut Xoshiro256PlusPlus,
        set_leaf: &SetLeafFn<'_>,
    ) -> Result<GrownTree> {
        let params = self.inputs.params;
        let mut tree = Tree::new();
        let mut leaf_examples: HashMap<u32, Vec<RowIdx>> = HashMap::new();
        let mut heap: BinaryHeap<CandidateLeaf> = BinaryHeap::new();
        let mut insertion_counter = 0u64;

        let root_stats = self.node_stats(&selected);
        let root = tree.push_node(Node::Leaf(set_leaf(&selected, &root_stats)));
        if selected.len() >= params.min_examples as usize {
            if let Some(split) = find_best_split(&self.inputs, &selected, &root_stats, rng)? {
                heap.push(CandidateLeaf {
                    score: split.score,
                    order: insertion_counter,
                    node: root,
                    depth: 0,
                    selected: selected.clone(),
                    split,
                });
                insertion_counter += 1;
            }
        }
        leaf_examples.insert(root, selected);

        let mut num_nodes = 1u32;
        while let Some(candidate) = heap.pop() {
            if num_nodes + 2 > params.max_num_nodes {
                break;
            }
            let (neg, pos) = self.partition(&candidate.selected, &candidate.split)?;
            if neg.is_empty() || pos.is_empty() {
                continue;
            }

            let neg_stats = self.node_stats(&neg);
            let pos_stats = self.node_stats(&pos);
            let negative_child = tree.push_node(Node::Leaf(set_leaf(&neg, &neg_stats)));
            let positive_child = tree.push_node(Node::Leaf(set_leaf(&pos, &pos_stats)));
            *tree.node_mut(candidate.node) = Node::Internal(InternalNode {
                condition: candidate.split.condition,
                missing_to_positive: candidate.split.missing_to_positive,
                split_score: candidate.split.score as f32,
                negative_child,
                positive_child,
            });
            num_nodes += 2;
            leaf_examples.remove(&candidate.node);

            for (child, child_selected, child_stats) in [
                (negative_child, neg, neg_stats),
                (positive_child, pos, pos_stats),
            ] {
                let child_depth = candidate.depth + 1;
                if child_depth < params.max_depth
                    && child_selected.len() >= params.min_examples as usize
                {
                    if let Some(split) =
                        find_best_split(&self.inputs, &child_selected, &child_stats, rng)?
                    {
                        heap.push(CandidateLeaf {
                            score: split.score,
                            order: insertion_counter,
                            node: child,
                            depth: child_depth,
                            selected: child_selected.clone(),
                            split,
                        });
                        insertion_counter += 1;
                    }
                }
                leaf_examples.insert(child, child_selected);
            }
        }

        let mut leaves: Vec<(u32, Vec<RowIdx>)> = leaf_examples.into_iter().collect();
        leaves.sort_by_key(|(node, _)| *node);
        Ok(GrownTree { tree, leaf_examples: leaves })
    }
}

/// Heap entry of the best-first strategy: ordered by score, ties broken by
/// earlier insertion.
struct CandidateLeaf {
    score: f64,
    order: u64,
    node: u32,
    depth: u32,
    selected: Vec<RowIdx>,
    split: SplitCandidate,
}

impl PartialEq for CandidateLeaf {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.order == other.order
    }
}

impl Eq for CandidateLeaf {}

impl PartialOrd for CandidateLeaf {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CandidateLeaf {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| other.order.cmp(&self.order))
    }
}

// =============================================================================
// Validation pruning
// =============================================================================

/// Validation objective of the pruning pass.
pub enum PruneObjective<'a> {
    /// Classification accuracy over categorical labels.
    Accuracy { labels: &'a [i32] },
    /// Regression mean squared error over numerical labels.
    MeanSquaredError { labels: &'a [f32] },
}

impl PruneObjective<'_> {
    /// Validation loss of predicting `payload` for `row` (lower is better).
    fn loss(&self, payload: &LeafPayload, row: usize, weight: f64) -> f64 {
        match self {
            PruneObjective::Accuracy { labels } => {
                let predicted = match payload {
                    LeafPayload::Classifier { top_class, .. } => *top_class,
                    LeafPayload::Regressor { .. } => 0,
                };
                if predicted == labels[row] { 0.0 } else { weight }
            }
            PruneObjective::MeanSquaredError { labels } => {
                let residual = labels[row] as f64 - payload.top_value() as f64;
                weight * residual * residual
            }
        }
    }
}

/// Reduced-error pruning against a held-out validation slice.
///
/// Bottom-up over the arena (children always follow their parent), each
/// internal node is collapsed to a leaf when the leaf's validation loss does
/// not exceed the subtree's.
pub fn prune_with_validation(
    grown: &mut GrownTree,
    dataset: &VerticalDataset,
    validation_rows: &[RowIdx],
    objective: &PruneObjective<'_>,
    weights: &[f32],
    targets: &crate::tree::split::SplitTargets<'_>,
    set_leaf: &SetLeafFn<'_>,
) -> Result<()> {
    let tree = &mut grown.tree;
    let num_nodes = tree.num_nodes();

    // Training examples per node: leaves from the grower, internal nodes by
    // merging children bottom-up.
    let mut train_examples: Vec<Vec<RowIdx>> = vec![Vec::new(); num_nodes];
    for (node, examples) in &grown.leaf_examples {
        train_examples[*node as usize] = examples.clone();
    }
    for idx in (0..num_nodes).rev() {
        if let Node::Internal(node) = tree.node(idx as u32) {
            let mut merged = train_examples[node.negative_child as usize].clone();
            merged.extend_from_slice(&train_examples[node.positive_child as usize]);
            merged.sort_unstable();
            train_examples[idx] = merged;
        }
    }

    // Validation rows per node, following the stored routing.
    let mut validation: Vec<Vec<RowIdx>> = vec![Vec::new(); num_nodes];
    for &row in validation_rows {
        let mut idx = 0u32;
        loop {
            validation[idx as usize].push(row);
            match tree.node(idx) {
                Node::Leaf(_) => break,
                Node::Internal(node) => {
                    let side = match node.condition.evaluate(dataset, row as usize)? {
                        Some(result) => result,
                        None => node.missing_to_positive,
                    };
                    idx = if side { node.positive_child } else { node.negative_child };
                }
            }
        }
    }

    let row_weight = |row: RowIdx| {
        if weights.is_empty() { 1.0 } else { weights[row as usize] as f64 }
    };

    // Subtree validation loss with the current (already pruned) structure.
    fn subtree_loss(
        tree: &Tree,
        start: u32,
        rows: &[RowIdx],
        dataset: &VerticalDataset,
        objective: &PruneObjective<'_>,
        weights: &[f32],
    ) -> Result<f64> {
        let mut total = 0.0;
        for &row in rows {
            let mut idx = start;
            let payload = loop {
                match tree.node(idx) {
                    Node::Leaf(payload) => break payload,
                    Node::Internal(node) => {
                        let side = match node.condition.evaluate(dataset, row as usize)? {
                            Some(result) => result,
                            None => node.missing_to_positive,
                        };
                        idx = if side { node.positive_child } else { node.negative_child };
                    }
                }
            };
            let weight = if weights.is_empty() { 1.0 } else { weights[row as usize] as f64 };
            total += objective.loss(payload, row as usize, weight);
        }
        Ok(total)
    }

    for idx in (0..num_nodes as u32).rev() {
        if !matches!(tree.node(idx), Node::Internal(_)) {
            continue;
        }
        let examples = &train_examples[idx as usize];
        if examples.is_empty() {
            continue;
        }
        let stats = TargetStats::from_examples(targets, examples.iter().copied(), weights);
        let as_leaf = set_leaf(examples, &stats);

        let rows = &validation[idx as usize];
        let keep = subtree_loss(tree, idx, rows, dataset, objective, weights)?;
        let collapse: f64 = rows
            .iter()
            .map(|&row| objective.loss(&as_leaf, row as usize, row_weight(row)))
            .sum();

        if collapse <= keep {
            *tree.node_mut(idx) = Node::Leaf(as_leaf);
        }
    }

    // Rebuild the leaf example lists for the pruned structure.
    let mut leaves: Vec<(u32, Vec<RowIdx>)> = Vec::new();
    let mut stack = vec![0u32];
    while let Some(idx) = stack.pop() {
        match tree.node(idx) {
            Node::Leaf(_) => leaves.push((idx, train_examples[idx as usize].clone())),
            Node::Internal(node) => {
                stack.push(node.negative_child);
                stack.push(node.positive_child);
            }
        }
    }
    leaves.sort_by_key(|(node, _)| *node);
    grown.leaf_examples = leaves;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::spec::{ColumnSpec, DataSpec, NumericalStats};
    use crate::dataset::DatasetBuilder;
    use crate::tree::split::SplitTargets;
    use crate::tree::{GrowingStrategy, TreeParams};
    use rand::SeedableRng;

    fn line_dataset(n: usize) -> VerticalDataset {
        let spec = DataSpec::new(vec![ColumnSpec::numerical(
            "x",
            NumericalStats { mean: n as f64 / 2.0, ..Default::default() },
        )]);
        let mut builder = DatasetBuilder::new(spec);
        for i in 0..n {
            builder.push_value(0, &format!("{i}")).unwrap();
        }
        builder.build().unwrap()
    }

    fn mean_leaf(targets: SplitTargets<'_>) -> impl Fn(&[RowIdx], &TargetStats) -> LeafPayload + '_ {
        move |examples, _| {
            let mean = match targets {
                SplitTargets::Regression { values } => {
                    examples.iter().map(|&r| values[r as usize] as f64).sum::<f64>()
                        / examples.len() as f64
                }
                _ => 0.0,
            };
            LeafPayload::regressor(mean as f32)
        }
    }

    #[test]
    fn local_growth_fits_a_step_function() {
        let dataset = line_dataset(8);
        let labels = [0.0f32, 0.0, 0.0, 0.0, 5.0, 5.0, 5.0, 5.0];
        let targets = SplitTargets::Regression { values: &labels };
        let params = TreeParams { min_examples: 1, max_depth: 3, ..Default::default() };
        let grower = TreeGrower::new(SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0],
            params: &params,
            presort: None,
        });
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let set_leaf = mean_leaf(targets);
        let grown = grower.grow((0..8).collect(), &mut rng, &set_leaf).unwrap();
        grown.tree.validate().unwrap();
        for row in 0..8 {
            let value = grown.tree.regressor_value_for_row(&dataset, row).unwrap();
            assert_eq!(value, labels[row]);
        }
    }

    #[test]
    fn max_depth_zero_yields_a_single_leaf() {
        let dataset = line_dataset(4);
        let labels = [0.0f32, 1.0, 2.0, 3.0];
        let targets = SplitTargets::Regression { values: &labels };
        let params = TreeParams { max_depth: 0, ..Default::default() };
        let grower = TreeGrower::new(SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0],
            params: &params,
            presort: None,
        });
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let set_leaf = mean_leaf(targets);
        let grown = grower.grow((0..4).collect(), &mut rng, &set_leaf).unwrap();
        assert_eq!(grown.tree.num_nodes(), 1);
        assert_eq!(grown.leaf_examples.len(), 1);
    }

    #[test]
    fn best_first_respects_the_node_budget() {
        let dataset = line_dataset(16);
        let labels: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let targets = SplitTargets::Regression { values: &labels };
        let params = TreeParams {
            min_examples: 1,
            max_depth: 10,
            growing_strategy: GrowingStrategy::BestFirstGlobal,
            max_num_nodes: 5,
            ..Default::default()
        };
        let grower = TreeGrower::new(SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0],
            params: &params,
            presort: None,
        });
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let set_leaf = mean_leaf(targets);
        let grown = grower.grow((0..16).collect(), &mut rng, &set_leaf).unwrap();
        grown.tree.validate().unwrap();
        assert!(grown.tree.num_nodes() <= 5);
        assert_eq!(grown.tree.num_nodes(), 5);
    }

    #[test]
    fn best_first_expands_highest_score_first() {
        // Labels where the right half carries all the variance: the second
        // split must land on the right side.
        let dataset = line_dataset(8);
        let labels = [0.0f32, 0.0, 0.0, 0.0, 0.0, 0.0, 50.0, 100.0];
        let targets = SplitTargets::Regression { values: &labels };
        let params = TreeParams {
            min_examples: 1,
            max_depth: 10,
            growing_strategy: GrowingStrategy::BestFirstGlobal,
            max_num_nodes: 5,
            ..Default::default()
        };
        let grower = TreeGrower::new(SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0],
            params: &params,
            presort: None,
        });
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let set_leaf = mean_leaf(targets);
        let grown = grower.grow((0..8).collect(), &mut rng, &set_leaf).unwrap();
        // Rows 6 and 7 must be separated from each other or from the rest.
        let v6 = grown.tree.regressor_value_for_row(&dataset, 6).unwrap();
        let v7 = grown.tree.regressor_value_for_row(&dataset, 7).unwrap();
        assert_ne!(v6, v7);
    }

    #[test]
    fn leaf_example_lists_cover_all_examples() {
        let dataset = line_dataset(8);
        let labels = [0.0f32, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0];
        let targets = SplitTargets::Regression { values: &labels };
        let params = TreeParams { min_examples: 1, max_depth: 2, ..Default::default() };
        let grower = TreeGrower::new(SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0],
            params: &params,
            presort: None,
        });
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let set_leaf = mean_leaf(targets);
        let grown = grower.grow((0..8).collect(), &mut rng, &set_leaf).unwrap();
        let mut all: Vec<RowIdx> =
            grown.leaf_examples.iter().flat_map(|(_, rows)| rows.clone()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn pruning_collapses_overfit_splits() {
        // Train on noise: the validation slice disagrees with the split, so
        // pruning should collapse the tree to its root.
        let dataset = line_dataset(8);
        let labels = [1.0f32, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0];
        let targets = SplitTargets::Regression { values: &labels };
        let params = TreeParams { min_examples: 1, max_depth: 4, ..Default::default() };
        let grower = TreeGrower::new(SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0],
            params: &params,
            presort: None,
        });
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let set_leaf = mean_leaf(targets);
        let mut grown = grower.grow((0..6).collect(), &mut rng, &set_leaf).unwrap();

        let validation_labels = [1.0f32; 8];
        let objective = PruneObjective::MeanSquaredError { labels: &validation_labels };
        prune_with_validation(
            &mut grown,
            &dataset,
            &[6, 7],
            &objective,
            &[],
            &targets,
            &set_leaf,
        )
        .unwrap();
        grown.tree.validate().unwrap();
        // Training rows 0..6 all share label 1.0, so any split on them had
        // zero gain anyway; the pruned tree must be a single leaf.
        assert_eq!(grown.tree.num_nodes(), 1);
    }
}
