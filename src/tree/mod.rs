//! Decision trees.
//!
//! A tree is a flat arena of nodes addressed by `u32` indices: internal
//! nodes store a [`Condition`] and the indices of their two children, leaves
//! store a payload. The arena is laid out in prefix order (children always
//! after their parent), which keeps inference cache-friendly and makes the
//! serialized form a plain node stream.
//!
//! Routing convention: the child reached when the condition holds is the
//! *positive* child; missing values follow the stored
//! `missing_to_positive` direction.

pub mod grower;
pub mod split;

use fixedbitset::FixedBitSet;
use serde::{Deserialize, Serialize};

use crate::dataset::{ColumnType, RowIdx, VerticalDataset};
use crate::error::{Error, Result};

// =============================================================================
// Conditions
// =============================================================================

/// Split condition of an internal node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// `value(attribute) >= threshold` on a numerical or boolean column.
    HigherThan { attribute: u32, threshold: f32 },
    /// `value(attribute) ∈ mask` on a categorical column.
    ContainsMask { attribute: u32, mask: FixedBitSet },
    /// `set(attribute) ∩ positive ≠ ∅` on a categorical-set column. The
    /// categories examined but left out are kept in `negative`.
    ContainsSet {
        attribute: u32,
        positive: Vec<i32>,
        negative: Vec<i32>,
    },
    /// `Σ weights[i] · value(attributes[i]) >= threshold`; a missing value
    /// is replaced by its `na_replacements` entry.
    ObliqueSparse {
        attributes: Vec<u32>,
        weights: Vec<f32>,
        na_replacements: Vec<f32>,
        threshold: f32,
    },
    /// `value(attribute)` is missing.
    IsMissing { attribute: u32 },
}

impl Condition {
    /// Primary attribute, used for tie-breaking and feature accounting.
    pub fn attribute(&self) -> u32 {
        match self {
            Condition::HigherThan { attribute, .. }
            | Condition::ContainsMask { attribute, .. }
            | Condition::ContainsSet { attribute, .. }
            | Condition::IsMissing { attribute } => *attribute,
            Condition::ObliqueSparse { attributes, .. } => {
                attributes.first().copied().unwrap_or(u32::MAX)
            }
        }
    }

    /// Number of attributes involved; oblique conditions prefer fewer.
    pub fn num_attributes(&self) -> usize {
        match self {
            Condition::ObliqueSparse { attributes, .. } => attributes.len(),
            _ => 1,
        }
    }

    /// Evaluate on one example. `None` means the attribute is missing and
    /// the caller must follow the node's missing direction.
    pub fn evaluate(&self, dataset: &VerticalDataset, row: usize) -> Result<Option<bool>> {
        match self {
            Condition::HigherThan { attribute, threshold } => {
                let value = numeric_value(dataset, *attribute as usize, row)?;
                Ok(value.map(|v| v >= *threshold))
            }
            Condition::ContainsMask { attribute, mask } => {
                let value = dataset.categorical(*attribute as usize)?[row];
                if value < 0 {
                    Ok(None)
                } else {
                    let bit = value as usize;
                    Ok(Some(bit < mask.len() && mask.contains(bit)))
                }
            }
            Condition::ContainsSet { attribute, positive, .. } => {
                let values = &dataset.categorical_set(*attribute as usize)?[row];
                // Both sides are sorted; scan for any shared element.
                let mut a = values.iter().peekable();
                let mut b = positive.iter().peekable();
                while let (Some(&&x), Some(&&y)) = (a.peek(), b.peek()) {
                    match x.cmp(&y) {
                        std::cmp::Ordering::Less => {
                            a.next();
                        }
                        std::cmp::Ordering::Greater => {
                            b.next();
                        }
                        std::cmp::Ordering::Equal => return Ok(Some(true)),
                    }
                }
                Ok(Some(false))
            }
            Condition::ObliqueSparse { attributes, weights, na_replacements, threshold } => {
                let mut dot = 0.0f32;
                for ((&attribute, &weight), &na) in
                    attributes.iter().zip(weights).zip(na_replacements)
                {
                    let value = numeric_value(dataset, attribute as usize, row)?.unwrap_or(na);
                    dot += weight * value;
                }
                Ok(Some(dot >= *threshold))
            }
            Condition::IsMissing { attribute } => {
                let col = *attribute as usize;
                let missing = match dataset.spec().column(col)?.col_type {
                    ColumnType::Numerical => dataset.numerical(col)?[row].is_nan(),
                    ColumnType::Boolean => dataset.boolean(col)?[row] < 0,
                    ColumnType::Categorical => dataset.categorical(col)?[row] < 0,
                    ColumnType::CategoricalSet => dataset.categorical_set(col)?[row].is_empty(),
                    ColumnType::Hash => false,
                };
                Ok(Some(missing))
            }
        }
    }

    /// One-line description using column names from the dataspec.
    pub fn describe(&self, dataset_spec: &crate::dataset::DataSpec) -> String {
        let name = |attribute: u32| {
            dataset_spec
                .columns
                .get(attribute as usize)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| format!("#{attribute}"))
        };
        match self {
            Condition::HigherThan { attribute, threshold } => {
                format!("\"{}\" >= {threshold}", name(*attribute))
            }
            Condition::ContainsMask { attribute, mask } => {
                let items: Vec<String> = mask.ones().map(|b| b.to_string()).collect();
                format!("\"{}\" in {{{}}}", name(*attribute), items.join(", "))
            }
            Condition::ContainsSet { attribute, positive, .. } => {
                let items: Vec<String> = positive.iter().map(|b| b.to_string()).collect();
                format!("\"{}\" intersects {{{}}}", name(*attribute), items.join(", "))
            }
            Condition::ObliqueSparse { attributes, weights, threshold, .. } => {
                let terms: Vec<String> = attributes
                    .iter()
                    .zip(weights)
                    .map(|(a, w)| format!("{w}*\"{}\"", name(*a)))
                    .collect();
                format!("{} >= {threshold}", terms.join(" + "))
            }
            Condition::IsMissing { attribute } => {
                format!("\"{}\" is missing", name(*attribute))
            }
        }
    }
}

/// Numeric view of a numerical or boolean column value; `None` when missing.
pub(crate) fn numeric_value(
    dataset: &VerticalDataset,
    col: usize,
    row: usize,
) -> Result<Option<f32>> {
    match dataset.spec().column(col)?.col_type {
        ColumnType::Numerical => {
            let value = dataset.numerical(col)?[row];
            Ok(if value.is_nan() { None } else { Some(value) })
        }
        ColumnType::Boolean => {
            let value = dataset.boolean(col)?[row];
            Ok(if value < 0 { None } else { Some(value as f32) })
        }
        other => Err(Error::internal(format!(
            "column {col} of type {} used as a numeric split attribute",
            other.as_str()
        ))),
    }
}

// =============================================================================
// Leaves and nodes
// =============================================================================

/// Leaf payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LeafPayload {
    /// Regression output, also used by every gradient-boosted tree.
    Regressor {
        top_value: f32,
        sum_gradients: f64,
        sum_hessians: f64,
        sum_weights: f64,
    },
    /// Class distribution for random-forest classification. The vector is
    /// indexed by categorical label index (slot 0 = OOV, always zero) and
    /// holds unnormalized weights.
    Classifier { distribution: Vec<f64>, top_class: i32 },
}

impl LeafPayload {
    pub fn regressor(top_value: f32) -> Self {
        LeafPayload::Regressor {
            top_value,
            sum_gradients: 0.0,
            sum_hessians: 0.0,
            sum_weights: 0.0,
        }
    }

    /// Value added to the prediction accumulator by this leaf.
    pub fn top_value(&self) -> f32 {
        match self {
            LeafPayload::Regressor { top_value, .. } => *top_value,
            LeafPayload::Classifier { .. } => 0.0,
        }
    }
}

/// Internal node: a condition, its two children, and routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalNode {
    pub condition: Condition,
    /// Direction taken when the condition cannot be evaluated.
    pub missing_to_positive: bool,
    /// Score achieved by the split, kept for analysis and display.
    pub split_score: f32,
    pub negative_child: u32,
    pub positive_child: u32,
}

/// One node of the arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Internal(InternalNode),
    Leaf(LeafPayload),
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }
}

// =============================================================================
// Tree
// =============================================================================

/// A rooted binary decision tree stored as a flat node arena.
///
/// The root is node 0. A tree is immutable once appended to a forest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn push_node(&mut self, node: Node) -> u32 {
        let idx = self.nodes.len() as u32;
        self.nodes.push(node);
        idx
    }

    pub fn node(&self, idx: u32) -> &Node {
        &self.nodes[idx as usize]
    }

    pub fn node_mut(&mut self, idx: u32) -> &mut Node {
        &mut self.nodes[idx as usize]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Index of the leaf an example routes to.
    pub fn leaf_index_for_row(&self, dataset: &VerticalDataset, row: usize) -> Result<u32> {
        let mut idx = 0u32;
        loop {
            match &self.nodes[idx as usize] {
                Node::Leaf(_) => return Ok(idx),
                Node::Internal(node) => {
                    let side = match node.condition.evaluate(dataset, row)? {
                        Some(result) => result,
                        None => node.missing_to_positive,
                    };
                    idx = if side { node.positive_child } else { node.negative_child };
                }
            }
        }
    }

    pub fn leaf_for_row(&self, dataset: &VerticalDataset, row: usize) -> Result<&LeafPayload> {
        let idx = self.leaf_index_for_row(dataset, row)?;
        match &self.nodes[idx as usize] {
            Node::Leaf(payload) => Ok(payload),
            Node::Internal(_) => Err(Error::internal("leaf routing reached an internal node")),
        }
    }

    /// Regressor value an example routes to.
    pub fn regressor_value_for_row(&self, dataset: &VerticalDataset, row: usize) -> Result<f32> {
        Ok(self.leaf_for_row(dataset, row)?.top_value())
    }

    /// Multiply every regressor leaf by `factor`.
    pub fn scale_leaf_values(&mut self, factor: f32) {
        for node in &mut self.nodes {
            if let Node::Leaf(LeafPayload::Regressor { top_value, .. }) = node {
                *top_value *= factor;
            }
        }
    }

    /// Structural invariants: every node reachable exactly once from the
    /// root, internal nodes have two children, leaf values are finite.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::internal("empty tree"));
        }
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![0u32];
        while let Some(idx) = stack.pop() {
            let slot = idx as usize;
            if slot >= self.nodes.len() {
                return Err(Error::internal(format!("child index {idx} out of range")));
            }
            if visited[slot] {
                return Err(Error::internal(format!("node {idx} reached twice")));
            }
            visited[slot] = true;
            match &self.nodes[slot] {
                Node::Internal(node) => {
                    stack.push(node.negative_child);
                    stack.push(node.positive_child);
                }
                Node::Leaf(LeafPayload::Regressor { top_value, .. }) => {
                    if !top_value.is_finite() {
                        return Err(Error::internal(format!(
                            "leaf {idx} has a non-finite value {top_value}"
                        )));
                    }
                }
                Node::Leaf(LeafPayload::Classifier { .. }) => {}
            }
        }
        if visited.iter().any(|&v| !v) {
            return Err(Error::internal("unreachable node in tree"));
        }
        Ok(())
    }

    /// Indented description of the full tree.
    pub fn describe(&self, spec: &crate::dataset::DataSpec) -> String {
        let mut out = String::new();
        self.describe_node(0, 0, spec, &mut out);
        out
    }

    fn describe_node(&self, idx: u32, depth: usize, spec: &crate::dataset::DataSpec, out: &mut String) {
        use std::fmt::Write as _;
        let indent = "    ".repeat(depth);
        match &self.nodes[idx as usize] {
            Node::Leaf(LeafPayload::Regressor { top_value, .. }) => {
                let _ = writeln!(out, "{indent}leaf value={top_value}");
            }
            Node::Leaf(LeafPayload::Classifier { distribution, top_class }) => {
                let _ = writeln!(out, "{indent}leaf class={top_class} distribution={distribution:?}");
            }
            Node::Internal(node) => {
                let _ = writeln!(
                    out,
                    "{indent}{} score={:.6} missing-to-{}",
                    node.condition.describe(spec),
                    node.split_score,
                    if node.missing_to_positive { "positive" } else { "negative" }
                );
                self.describe_node(node.positive_child, depth + 1, spec, out);
                self.describe_node(node.negative_child, depth + 1, spec, out);
            }
        }
    }
}

// =============================================================================
// Tree hyper-parameters
// =============================================================================

/// How trees are expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrowingStrategy {
    /// Recursive depth-first expansion bounded by `max_depth`.
    Local,
    /// Best-first expansion of the leaf with the highest split score,
    /// bounded by `max_num_nodes`.
    BestFirstGlobal,
}

/// How numerical features are sorted for split scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortingStrategy {
    /// Sort the node subset per feature in every node. O(N) peak memory.
    InNode,
    /// One pre-computed permutation per numerical feature. Faster per node
    /// at an O(F·N) memory cost.
    Presort,
}

/// Algorithm used to grow categorical splits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CategoricalAlgorithm {
    /// Sort categories by mean target and take the best prefix cut. Exact
    /// for binary classification, regression and ranking.
    Cart,
    /// Try `attribute == category` for every category.
    OneHot,
    /// Monte-Carlo CART: sample random category subsets, keep the best.
    Random { max_num_trials: u32 },
}

/// Where missing values are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingValuePolicy {
    /// Substitute the column mean from the dataspec.
    GlobalImputation,
    /// Substitute the mean of the node's present values.
    LocalImputation,
    /// Substitute a randomly sampled present value of the node.
    RandomLocalImputation,
}

/// Per-feature normalization applied to oblique projection weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObliqueNormalization {
    None,
    StandardDeviation,
    MinMax,
}

/// Split-axis selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SplitAxis {
    AxisAligned,
    /// Sparse oblique projections with ±1 weights.
    SparseOblique {
        /// `num_projections = ceil(F ^ exponent)`.
        num_projections_exponent: f32,
        /// Each coordinate is nonzero with probability `density / F`.
        projection_density_factor: f32,
        normalization: ObliqueNormalization,
        max_num_projections: u32,
    },
}

/// Regularization applied while scoring splits and setting leaves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainParams {
    pub l1_regularization: f32,
    pub l2_regularization: f32,
    /// Bias added to the denominator of per-category means during
    /// categorical ordering.
    pub l2_categorical_regularization: f32,
    /// Minimum gain (gamma) a split must clear.
    pub min_gain: f32,
    /// Score splits with the Newton gain instead of the impurity score.
    pub use_hessian_gain: bool,
}

impl Default for GainParams {
    fn default() -> Self {
        Self {
            l1_regularization: 0.0,
            l2_regularization: 0.0,
            l2_categorical_regularization: 1.0,
            min_gain: 0.0,
            use_hessian_gain: false,
        }
    }
}

/// Hyper-parameters of the tree grower and split finder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: u32,
    pub min_examples: u32,
    pub growing_strategy: GrowingStrategy,
    /// Node budget of the best-first strategy.
    pub max_num_nodes: u32,
    pub sorting_strategy: SortingStrategy,
    /// Number of features examined per node. 0 selects the task default
    /// (`ceil(sqrt(F))` for classification, `F/3` for regression), negative
    /// values select all features.
    pub num_candidate_attributes: i32,
    /// When in (0, 1], overrides `num_candidate_attributes` as a ratio of F.
    pub num_candidate_attributes_ratio: f32,
    pub categorical: CategoricalAlgorithm,
    pub missing_value_policy: MissingValuePolicy,
    /// Also consider `IsMissing` conditions.
    pub allow_na_conditions: bool,
    /// Enforce `min_examples` on both sides of a candidate split.
    pub in_split_min_examples_check: bool,
    /// Probability for a category to enter the greedy categorical-set
    /// selection of a node.
    pub categorical_set_greedy_sampling: f32,
    /// Cap on the categories examined by the greedy selection, by frequency.
    pub categorical_set_max_num_items: u32,
    pub split_axis: SplitAxis,
    pub gain: GainParams,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_examples: 5,
            growing_strategy: GrowingStrategy::Local,
            max_num_nodes: 31,
            sorting_strategy: SortingStrategy::InNode,
            num_candidate_attributes: 0,
            num_candidate_attributes_ratio: -1.0,
            categorical: CategoricalAlgorithm::Cart,
            missing_value_policy: MissingValuePolicy::GlobalImputation,
            allow_na_conditions: false,
            in_split_min_examples_check: true,
            categorical_set_greedy_sampling: 0.1,
            categorical_set_max_num_items: u32::MAX,
            split_axis: SplitAxis::AxisAligned,
            gain: GainParams::default(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
