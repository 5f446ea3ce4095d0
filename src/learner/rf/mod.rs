//! The random-forest learner.
//!
//! Each tree is grown CART-style on a bootstrap sample drawn with
//! replacement; rows left out of a tree's bootstrap are its out-of-bag
//! (OOB) examples and feed a free generalization estimate. Trees are
//! embarrassingly parallel: workers share the read-only dataset and each
//! tree owns an RNG seeded from `random_seed + tree_index`, so the forest
//! does not depend on the number of threads.

use std::time::Instant;

use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::config::{DeploymentConfig, TrainingConfig};
use crate::dataset::{ColumnType, RowIdx, VerticalDataset};
use crate::error::{Error, Result};
use crate::learner::logger::{TrainingLogger, Verbosity};
use crate::learner::{derive_seed, resolve_columns, Learner};
use crate::model::rf::{OobEvaluation, RandomForestModel, VariableImportance};
use crate::model::{ForestModel, ModelHeader, Task};
use crate::tree::grower::{prune_with_validation, GrownTree, PruneObjective, TreeGrower};
use crate::tree::split::{PresortIndex, SplitTargets, SplitterInputs, TargetStats};
use crate::tree::{LeafPayload, SortingStrategy, Tree, TreeParams};

/// Registry key of the learner.
pub const LEARNER_NAME: &str = "RANDOM_FOREST";

// =============================================================================
// Parameters
// =============================================================================

/// Hyper-parameters of the random-forest learner.
#[derive(Debug, Clone)]
pub struct RfParams {
    pub num_trees: u32,
    /// Bootstrap sample size as a ratio of the training rows; sampling is
    /// always with replacement.
    pub bootstrap_size_ratio: f32,
    /// Classification voting: majority votes when true, averaged leaf
    /// distributions when false.
    pub winner_take_all: bool,
    pub compute_oob_performances: bool,
    pub compute_oob_variable_importances: bool,
    /// Rows held out for reduced-error pruning; 0 disables pruning (the
    /// plain random forest). `num_trees: 1` with a positive ratio is the
    /// classic pruned CART.
    pub validation_ratio: f32,
    pub tree: TreeParams,
}

impl Default for RfParams {
    fn default() -> Self {
        Self {
            num_trees: 300,
            bootstrap_size_ratio: 1.0,
            winner_take_all: true,
            compute_oob_performances: true,
            compute_oob_variable_importances: false,
            validation_ratio: 0.0,
            tree: TreeParams {
                max_depth: 16,
                // 0 selects sqrt(F) for classification, F/3 for regression.
                num_candidate_attributes: 0,
                ..Default::default()
            },
        }
    }
}

// =============================================================================
// OOB accumulators
// =============================================================================

/// Accumulated OOB predictions, merged in tree-index order.
enum OobAccumulator {
    Classification {
        /// Per row, per class: votes or summed distributions.
        votes: Vec<Vec<f64>>,
    },
    Regression {
        sums: Vec<f64>,
        counts: Vec<u32>,
    },
}

impl OobAccumulator {
    fn new(task: Task, n_rows: usize, num_classes: usize) -> Self {
        match task {
            Task::Classification => OobAccumulator::Classification {
                votes: vec![vec![0.0; num_classes]; n_rows],
            },
            _ => OobAccumulator::Regression { sums: vec![0.0; n_rows], counts: vec![0; n_rows] },
        }
    }

    fn add(
        &mut self,
        tree: &Tree,
        dataset: &VerticalDataset,
        rows: &[RowIdx],
        winner_take_all: bool,
    ) -> Result<()> {
        for &row in rows {
            match (&mut *self, tree.leaf_for_row(dataset, row as usize)?) {
                (
                    OobAccumulator::Classification { votes },
                    LeafPayload::Classifier { distribution, top_class },
                ) => {
                    let slot = &mut votes[row as usize];
                    if winner_take_all {
                        let class = (*top_class).clamp(0, slot.len() as i32 - 1) as usize;
                        slot[class] += 1.0;
                    } else {
                        let total: f64 = distribution.iter().sum();
                        if total > 0.0 {
                            for (class, &weight) in distribution.iter().enumerate() {
                                slot[class] += weight / total;
                            }
                        }
                    }
                }
                (
                    OobAccumulator::Regression { sums, counts },
                    LeafPayload::Regressor { top_value, .. },
                ) => {
                    sums[row as usize] += *top_value as f64;
                    counts[row as usize] += 1;
                }
                _ => return Err(Error::internal("leaf payload does not match the task")),
            }
        }
        Ok(())
    }

    /// Final OOB metric: accuracy for classification, RMSE for regression.
    fn evaluate(
        &self,
        dataset: &VerticalDataset,
        label_col: usize,
        weights: &[f32],
    ) -> Result<Option<OobEvaluation>> {
        match self {
            OobAccumulator::Classification { votes } => {
                let labels = dataset.categorical(label_col)?;
                let mut correct = 0.0f64;
                let mut total = 0.0f64;
                let mut evaluated = 0u64;
                for (row, slot) in votes.iter().enumerate() {
                    if slot.iter().all(|&v| v == 0.0) {
                        continue;
                    }
                    let predicted = slot
                        .iter()
                        .enumerate()
                        .skip(1)
                        .max_by(|a, b| {
                            a.1.partial_cmp(b.1)
                                .unwrap_or(std::cmp::Ordering::Equal)
                                .then_with(|| b.0.cmp(&a.0))
                        })
                        .map(|(class, _)| class as i32)
                        .unwrap_or(0);
                    let weight = if weights.is_empty() { 1.0 } else { weights[row] as f64 };
                    total += weight;
                    evaluated += 1;
                    if predicted == labels[row] {
                        correct += weight;
                    }
                }
                if evaluated == 0 {
                    return Ok(None);
                }
                Ok(Some(OobEvaluation {
                    metric: "accuracy".to_string(),
                    value: (correct / total) as f32,
                    num_examples: evaluated,
                }))
            }
            OobAccumulator::Regression { sums, counts } => {
                let labels = dataset.numerical(label_col)?;
                let mut sum_squared = 0.0f64;
                let mut total = 0.0f64;
                let mut evaluated = 0u64;
                for row in 0..sums.len() {
                    if counts[row] == 0 {
                        continue;
                    }
                    let prediction = sums[row] / counts[row] as f64;
                    let weight = if weights.is_empty() { 1.0 } else { weights[row] as f64 };
                    let residual = labels[row] as f64 - prediction;
                    sum_squared += weight * residual * residual;
                    total += weight;
                    evaluated += 1;
                }
                if evaluated == 0 {
                    return Ok(None);
                }
                Ok(Some(OobEvaluation {
                    metric: "rmse".to_string(),
                    value: (sum_squared / total).sqrt() as f32,
                    num_examples: evaluated,
                }))
            }
        }
    }
}

// =============================================================================
// Learner
// =============================================================================

/// See the module documentation.
pub struct RandomForestLearner {
    config: TrainingConfig,
    deployment: DeploymentConfig,
    deadline: Option<Instant>,
    verbosity: Verbosity,
}

impl RandomForestLearner {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        if config.task == Task::Ranking {
            return Err(Error::invalid_argument(
                "the random forest learner does not support ranking tasks",
            ));
        }
        Ok(Self {
            config,
            deployment: DeploymentConfig::default(),
            deadline: None,
            verbosity: Verbosity::Silent,
        })
    }
}

/// Labels of the training dataset, typed by task.
enum RfLabels<'a> {
    Classification { labels: &'a [i32], num_classes: usize },
    Regression { labels: &'a [f32] },
}

impl<'a> RfLabels<'a> {
    fn resolve(
        dataset: &'a VerticalDataset,
        label_col: usize,
        task: Task,
    ) -> Result<Self> {
        match task {
            Task::Classification => {
                let spec = dataset.spec().column(label_col)?;
                if spec.col_type != ColumnType::Categorical {
                    return Err(Error::invalid_argument(format!(
                        "classification label \"{}\" must be CATEGORICAL",
                        spec.name
                    )));
                }
                Ok(RfLabels::Classification {
                    labels: dataset.categorical(label_col)?,
                    num_classes: spec.dict()?.number_of_unique_values(),
                })
            }
            Task::Regression => {
                Ok(RfLabels::Regression { labels: dataset.numerical(label_col)? })
            }
            Task::Ranking => Err(Error::internal("ranking rejected at construction")),
        }
    }

    fn targets(&self) -> SplitTargets<'a> {
        match self {
            RfLabels::Classification { labels, num_classes } => {
                SplitTargets::Classification { labels, num_classes: *num_classes }
            }
            RfLabels::Regression { labels } => SplitTargets::Regression { values: labels },
        }
    }

    fn num_classes(&self) -> usize {
        match self {
            RfLabels::Classification { num_classes, .. } => *num_classes,
            RfLabels::Regression { .. } => 0,
        }
    }
}

/// Leaf payload from the node statistics: the class distribution for
/// classification, the weighted mean for regression.
fn rf_set_leaf(stats: &TargetStats) -> LeafPayload {
    match stats {
        TargetStats::Classification { class_weights, .. } => {
            let top_class = class_weights
                .iter()
                .enumerate()
                .skip(1)
                .max_by(|a, b| {
                    a.1.partial_cmp(b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| b.0.cmp(&a.0))
                })
                .map(|(class, _)| class as i32)
                .unwrap_or(1);
            LeafPayload::Classifier { distribution: class_weights.clone(), top_class }
        }
        TargetStats::Regression { sum, weight, count, .. } => {
            let mean = if *weight > 0.0 { sum / weight } else { 0.0 };
            LeafPayload::Regressor {
                top_value: mean as f32,
                sum_gradients: *sum,
                sum_hessians: *count as f64,
                sum_weights: *weight,
            }
        }
        TargetStats::Newton { .. } => {
            unreachable!("random forests never grow on Newton statistics")
        }
    }
}

impl Learner for RandomForestLearner {
    fn name(&self) -> &'static str {
        LEARNER_NAME
    }

    fn set_deployment(&mut self, deployment: DeploymentConfig) {
        self.deployment = deployment;
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    fn train(&self, dataset: &VerticalDataset) -> Result<Box<dyn ForestModel>> {
        match self.deployment.num_threads {
            0 | 1 => self.train_impl(dataset, false),
            threads => {
                let pool = ThreadPoolBuilder::new().num_threads(threads).build().map_err(
                    |err| Error::internal(format!("cannot build the thread pool: {err}")),
                )?;
                pool.install(|| self.train_impl(dataset, true))
            }
        }
    }
}

impl RandomForestLearner {
    fn train_impl(
        &self,
        dataset: &VerticalDataset,
        parallel: bool,
    ) -> Result<Box<dyn ForestModel>> {
        let params = &self.config.rf;
        let resolved = resolve_columns(&self.config, dataset.spec())?;
        let labels = RfLabels::resolve(dataset, resolved.label_col, self.config.task)?;
        let weights = dataset.weights(resolved.weights_col)?;
        let n = dataset.num_rows() as usize;
        if n < 2 {
            return Err(Error::invalid_argument("at least two examples are required"));
        }

        // Pruning holdout, drawn once for every tree.
        let holdout: Vec<RowIdx> = if params.validation_ratio > 0.0 {
            let target = (params.validation_ratio as f64 * n as f64) as usize;
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(derive_seed(
                self.config.random_seed,
                0x9001,
            ));
            let mut order: Vec<RowIdx> = (0..n as RowIdx).collect();
            for i in (1..n).rev() {
                let j = rng.gen_range(0..=i);
                order.swap(i, j);
            }
            let mut rows: Vec<RowIdx> = order.into_iter().take(target).collect();
            rows.sort_unstable();
            rows
        } else {
            Vec::new()
        };
        let in_holdout = {
            let mut mask = vec![false; n];
            for &row in &holdout {
                mask[row as usize] = true;
            }
            mask
        };
        let bag_rows: Vec<RowIdx> =
            (0..n as RowIdx).filter(|&r| !in_holdout[r as usize]).collect();
        if bag_rows.is_empty() {
            return Err(Error::invalid_argument(
                "validation_ratio leaves no example to train on",
            ));
        }
        let bootstrap_size =
            ((bag_rows.len() as f64 * params.bootstrap_size_ratio as f64) as usize).max(1);

        let presort = match params.tree.sorting_strategy {
            SortingStrategy::Presort => {
                Some(PresortIndex::build(dataset, &resolved.input_features)?)
            }
            SortingStrategy::InNode => None,
        };

        let logger = TrainingLogger::new(self.verbosity, &[]);
        logger.start(LEARNER_NAME, dataset.num_rows(), resolved.input_features.len());

        // ---- Grow the trees. ----
        let train_one = |tree_idx: u32| -> Result<Option<(Tree, Vec<RowIdx>)>> {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
            }
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(
                self.config.random_seed + tree_idx as u64,
            );
            // Bootstrap with replacement over the non-holdout rows.
            let mut in_bag = vec![false; n];
            let mut selected: Vec<RowIdx> = (0..bootstrap_size)
                .map(|_| {
                    let row = bag_rows[rng.gen_range(0..bag_rows.len())];
                    in_bag[row as usize] = true;
                    row
                })
                .collect();
            selected.sort_unstable();

            let inputs = SplitterInputs {
                dataset,
                targets: labels.targets(),
                weights: &weights,
                input_features: &resolved.input_features,
                params: &params.tree,
                presort: presort.as_ref(),
            };
            let grower = TreeGrower::new(inputs);
            let set_leaf =
                |_examples: &[RowIdx], stats: &TargetStats| rf_set_leaf(stats);
            let mut grown: GrownTree = grower.grow(selected, &mut rng, &set_leaf)?;

            if !holdout.is_empty() {
                let objective = match &labels {
                    RfLabels::Classification { labels, .. } => {
                        PruneObjective::Accuracy { labels }
                    }
                    RfLabels::Regression { labels } => {
                        PruneObjective::MeanSquaredError { labels }
                    }
                };
                prune_with_validation(
                    &mut grown,
                    dataset,
                    &holdout,
                    &objective,
                    &weights,
                    &labels.targets(),
                    &set_leaf,
                )?;
            }

            let oob_rows: Vec<RowIdx> = bag_rows
                .iter()
                .copied()
                .filter(|&row| !in_bag[row as usize])
                .collect();
            Ok(Some((grown.tree, oob_rows)))
        };

        let outcomes: Vec<Option<(Tree, Vec<RowIdx>)>> = if parallel {
            (0..params.num_trees)
                .into_par_iter()
                .map(train_one)
                .collect::<Result<Vec<_>>>()?
        } else {
            (0..params.num_trees)
                .map(train_one)
                .collect::<Result<Vec<_>>>()?
        };

        // Deadline hits leave a prefix of completed trees.
        let mut trees: Vec<Tree> = Vec::new();
        let mut oob_per_tree: Vec<Vec<RowIdx>> = Vec::new();
        for outcome in outcomes {
            match outcome {
                Some((tree, oob_rows)) => {
                    trees.push(tree);
                    oob_per_tree.push(oob_rows);
                }
                None => break,
            }
        }
        if trees.is_empty() {
            return Err(Error::cancelled(
                "training deadline reached before the first tree",
            ));
        }

        // ---- OOB evaluation, merged in tree-index order. ----
        let mut oob_evaluation = None;
        let mut variable_importances = Vec::new();
        if params.compute_oob_performances {
            let mut accumulator =
                OobAccumulator::new(self.config.task, n, labels.num_classes());
            for (tree, oob_rows) in trees.iter().zip(&oob_per_tree) {
                accumulator.add(tree, dataset, oob_rows, params.winner_take_all)?;
            }
            oob_evaluation = accumulator.evaluate(dataset, resolved.label_col, &weights)?;

            if params.compute_oob_variable_importances {
                if let Some(base) = &oob_evaluation {
                    for &feature in &resolved.input_features {
                        let mut rng = Xoshiro256PlusPlus::seed_from_u64(derive_seed(
                            self.config.random_seed,
                            0xfea7_0000 + feature as u64,
                        ));
                        let mut permutation: Vec<RowIdx> = (0..n as RowIdx).collect();
                        for i in (1..n).rev() {
                            let j = rng.gen_range(0..=i);
                            permutation.swap(i, j);
                        }
                        let permuted =
                            dataset.with_permuted_column(feature as usize, &permutation);
                        let mut accumulator =
                            OobAccumulator::new(self.config.task, n, labels.num_classes());
                        for (tree, oob_rows) in trees.iter().zip(&oob_per_tree) {
                            accumulator.add(tree, &permuted, oob_rows, params.winner_take_all)?;
                        }
                        let metric =
                            accumulator.evaluate(&permuted, resolved.label_col, &weights)?;
                        let importance = match metric {
                            // Accuracy drops, error rises: both count as a
                            // positive importance.
                            Some(metric) if metric.metric == "accuracy" => {
                                base.value - metric.value
                            }
                            Some(metric) => metric.value - base.value,
                            None => 0.0,
                        };
                        variable_importances
                            .push(VariableImportance { attribute: feature, importance });
                    }
                }
            }
        }

        logger.finish(LEARNER_NAME, trees.len());

        let model = RandomForestModel {
            header: ModelHeader {
                name: crate::model::rf::MODEL_NAME.to_string(),
                task: self.config.task,
                label_col: resolved.label_col as u32,
                ranking_group_col: None,
                weights_col: resolved.weights_col.map(|c| c as u32),
                input_features: resolved.input_features.clone(),
            },
            data_spec: dataset.spec().clone(),
            trees,
            winner_take_all: params.winner_take_all,
            num_label_classes: labels.num_classes() as u32,
            oob_evaluation,
            variable_importances,
        };
        model.validate()?;
        Ok(Box::new(model))
    }
}

// =============================================================================
// Tests
// =============================================================================
