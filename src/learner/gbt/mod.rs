//! The gradient-boosted-trees learner.
//!
//! Each boosting iteration samples a training slice, computes gradients and
//! hessians through the loss, grows one tree per gradient channel, and adds
//! the shrunk leaf values to the accumulated predictions. A held-out
//! validation slice drives early stopping. Training is deterministic for a
//! fixed seed: every iteration derives its own RNG from the seed and the
//! iteration index.

pub mod early_stopping;
pub mod gradients;
pub mod loss;
pub mod sampling;

use std::time::Instant;

use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::ThreadPoolBuilder;

use crate::config::{DeploymentConfig, TrainingConfig};
use crate::dataset::ranking::RankingGroups;
use crate::dataset::{RowIdx, VerticalDataset};
use crate::error::{Error, Result};
use crate::learner::logger::{TrainingLogger, Verbosity};
use crate::learner::{derive_seed, resolve_columns, Learner, ResolvedColumns};
use crate::model::gbt::{GradientBoostedTreesModel, TrainingLogEntry};
use crate::model::{ForestModel, ModelHeader};
use crate::tree::grower::TreeGrower;
use crate::tree::split::{PresortIndex, SplitTargets, SplitterInputs, TargetStats};
use crate::tree::{GainParams, SortingStrategy, Tree, TreeParams};

use early_stopping::{
    adapted_subsample, EarlyStopping, EarlyStoppingPolicy, StopDecision,
};
use gradients::GradientBuffer;
use loss::{create_loss, LeafConfig, LeafContext, Loss, LossKind};
use sampling::{sample_iteration, SamplingMethod};

/// Registry key of the learner.
pub const LEARNER_NAME: &str = "GRADIENT_BOOSTED_TREES";

// =============================================================================
// Parameters
// =============================================================================

/// Which sampling method draws the per-iteration training slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingKind {
    None,
    Random,
    Goss,
    Selgb,
}

/// How trees accumulate into the forest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ForestExtraction {
    /// Plain boosting.
    Mart,
    /// Dropout boosting: each iteration drops a random set `D` of existing
    /// trees for gradient computation, then rescales the dropped trees and
    /// the new tree by `1 / (1 + |D|)`.
    Dart { dropout: f32 },
}

/// Hyper-parameters of the gradient-boosted-trees learner.
#[derive(Debug, Clone)]
pub struct GbtParams {
    pub num_trees: u32,
    pub shrinkage: f32,
    /// Rate of the RANDOM sampling method; also the base rate adapted under
    /// a training-duration budget.
    pub subsample: f32,
    pub sampling_method: SamplingKind,
    pub goss_alpha: f32,
    pub goss_beta: f32,
    pub selgb_ratio: f32,
    pub validation_set_ratio: f32,
    pub early_stopping: EarlyStoppingPolicy,
    pub early_stopping_num_trees_look_ahead: u32,
    pub use_hessian_gain: bool,
    pub l1_regularization: f32,
    pub l2_regularization: f32,
    pub l2_categorical_regularization: f32,
    pub clamp_leaf_logit: f32,
    /// Sigmoid slope of the LambdaMART pairwise loss.
    pub lambda_loss: f32,
    pub loss: LossKind,
    pub forest_extraction: ForestExtraction,
    pub adapt_subsample_for_maximum_training_duration: bool,
    pub tree: TreeParams,
}

impl Default for GbtParams {
    fn default() -> Self {
        Self {
            num_trees: 300,
            shrinkage: 0.1,
            subsample: 1.0,
            sampling_method: SamplingKind::None,
            goss_alpha: 0.2,
            goss_beta: 0.1,
            selgb_ratio: 0.01,
            validation_set_ratio: 0.1,
            early_stopping: EarlyStoppingPolicy::LossIncrease,
            early_stopping_num_trees_look_ahead: 30,
            use_hessian_gain: false,
            l1_regularization: 0.0,
            l2_regularization: 0.0,
            l2_categorical_regularization: 1.0,
            clamp_leaf_logit: 5.0,
            lambda_loss: 1.0,
            loss: LossKind::Auto,
            forest_extraction: ForestExtraction::Mart,
            adapt_subsample_for_maximum_training_duration: false,
            tree: TreeParams {
                // Boosted trees examine every feature by default.
                num_candidate_attributes: -1,
                ..Default::default()
            },
        }
    }
}

impl GbtParams {
    /// Concrete sampling method at the current (possibly adapted) rate.
    fn effective_sampling(&self, subsample: f32) -> SamplingMethod {
        match self.sampling_method {
            SamplingKind::None => {
                if subsample < 1.0 {
                    SamplingMethod::Random { subsample }
                } else {
                    SamplingMethod::None
                }
            }
            SamplingKind::Random => SamplingMethod::Random { subsample },
            SamplingKind::Goss => {
                SamplingMethod::Goss { alpha: self.goss_alpha, beta: self.goss_beta }
            }
            SamplingKind::Selgb => SamplingMethod::Selgb { ratio: self.selgb_ratio },
        }
    }

    /// Tree parameters with the learner's regularization folded in.
    fn tree_params(&self) -> TreeParams {
        TreeParams {
            gain: GainParams {
                l1_regularization: self.l1_regularization,
                l2_regularization: self.l2_regularization,
                l2_categorical_regularization: self.l2_categorical_regularization,
                min_gain: self.tree.gain.min_gain,
                use_hessian_gain: self.use_hessian_gain,
            },
            ..self.tree.clone()
        }
    }

    fn leaf_config(&self) -> LeafConfig {
        LeafConfig {
            shrinkage: self.shrinkage,
            l1_regularization: self.l1_regularization,
            l2_regularization: self.l2_regularization,
            clamp_leaf_logit: self.clamp_leaf_logit,
        }
    }
}

// =============================================================================
// Learner
// =============================================================================

/// See the module documentation.
pub struct GradientBoostedTreesLearner {
    config: TrainingConfig,
    deployment: DeploymentConfig,
    deadline: Option<Instant>,
    verbosity: Verbosity,
}

impl GradientBoostedTreesLearner {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        Ok(Self {
            config,
            deployment: DeploymentConfig::default(),
            deadline: None,
            verbosity: Verbosity::Silent,
        })
    }

    /// Split row ids into (train, validation). Ranking tasks move whole
    /// groups so no group straddles the split.
    fn validation_split(
        &self,
        dataset: &VerticalDataset,
        resolved: &ResolvedColumns,
    ) -> Result<(Vec<RowIdx>, Vec<RowIdx>)> {
        let n = dataset.num_rows() as usize;
        let ratio = self.config.gbt.validation_set_ratio;
        let target = (ratio as f64 * n as f64) as usize;
        if target == 0 {
            return Ok(((0..n as RowIdx).collect(), Vec::new()));
        }
        let mut rng =
            Xoshiro256PlusPlus::seed_from_u64(derive_seed(self.config.random_seed, 0x5eed));
        let mut in_validation = vec![false; n];
        if let Some(group_col) = resolved.ranking_group_col {
            let groups = RankingGroups::build(dataset, resolved.label_col, group_col)?;
            let mut order: Vec<usize> = (0..groups.groups().len()).collect();
            for i in (1..order.len()).rev() {
                let j = rng.gen_range(0..=i);
                order.swap(i, j);
            }
            let mut count = 0usize;
            for group_idx in order {
                if count >= target {
                    break;
                }
                for item in &groups.groups()[group_idx].items {
                    in_validation[item.example_idx as usize] = true;
                    count += 1;
                }
            }
        } else {
            let mut order: Vec<usize> = (0..n).collect();
            for i in (1..n).rev() {
                let j = rng.gen_range(0..=i);
                order.swap(i, j);
            }
            for &row in order.iter().take(target) {
                in_validation[row] = true;
            }
        }
        let train = (0..n as RowIdx).filter(|&r| !in_validation[r as usize]).collect();
        let validation = (0..n as RowIdx).filter(|&r| in_validation[r as usize]).collect();
        Ok((train, validation))
    }
}

/// Fill a column-major prediction buffer with per-channel constants.
fn fill_initial(predictions: &mut Vec<f32>, initial: &[f32], n_rows: usize) {
    predictions.clear();
    for &value in initial {
        predictions.extend(std::iter::repeat(value).take(n_rows));
    }
}

/// Add one tree's leaves to a channel of a prediction buffer.
fn add_tree_predictions(
    tree: &Tree,
    dataset: &VerticalDataset,
    channel: usize,
    predictions: &mut [f32],
) -> Result<()> {
    let n = dataset.num_rows() as usize;
    for row in 0..n {
        predictions[channel * n + row] += tree.regressor_value_for_row(dataset, row)?;
    }
    Ok(())
}

impl Learner for GradientBoostedTreesLearner {
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
            0 | 1 => self.train_impl(dataset),
            threads => {
                let pool = ThreadPoolBuilder::new().num_threads(threads).build().map_err(
                    |err| Error::internal(format!("cannot build the thread pool: {err}")),
                )?;
                pool.install(|| self.train_impl(dataset))
            }
        }
    }
}

impl GradientBoostedTreesLearner {
    fn train_impl(&self, dataset: &VerticalDataset) -> Result<Box<dyn ForestModel>> {
        let params = &self.config.gbt;
        let resolved = resolve_columns(&self.config, dataset.spec())?;
        let label_spec = dataset.spec().column(resolved.label_col)?;
        let loss = create_loss(params.loss, self.config.task, label_spec, params.lambda_loss)?;
        let dim = loss.dimension();

        // ---- Validation split. ----
        let (train_rows, validation_rows) = self.validation_split(dataset, &resolved)?;
        let owned_train;
        let train_dataset: &VerticalDataset = if validation_rows.is_empty() {
            dataset
        } else {
            owned_train = dataset.extract_rows(&train_rows);
            &owned_train
        };
        let validation_dataset = if validation_rows.is_empty() {
            None
        } else {
            Some(dataset.extract_rows(&validation_rows))
        };
        let n_train = train_dataset.num_rows() as usize;
        if n_train == 0 {
            return Err(Error::invalid_argument("no training example"));
        }

        let weights = train_dataset.weights(resolved.weights_col)?;
        let validation_weights = validation_dataset
            .as_ref()
            .map(|ds| ds.weights(resolved.weights_col))
            .transpose()?;

        // ---- Ranking indexes. ----
        let train_ranking = resolved
            .ranking_group_col
            .map(|group_col| RankingGroups::build(train_dataset, resolved.label_col, group_col))
            .transpose()?;
        let validation_ranking = match (&validation_dataset, resolved.ranking_group_col) {
            (Some(ds), Some(group_col)) => {
                Some(RankingGroups::build(ds, resolved.label_col, group_col)?)
            }
            _ => None,
        };

        // ---- Buffers. ----
        let tree_params = params.tree_params();
        let presort = match tree_params.sorting_strategy {
            SortingStrategy::Presort => {
                Some(PresortIndex::build(train_dataset, &resolved.input_features)?)
            }
            SortingStrategy::InNode => None,
        };
        let initial_predictions =
            loss.initial_predictions(train_dataset, resolved.label_col, &weights)?;
        let mut predictions: Vec<f32> = Vec::new();
        fill_initial(&mut predictions, &initial_predictions, n_train);
        let mut validation_predictions: Vec<f32> = Vec::new();
        if let Some(ds) = &validation_dataset {
            fill_initial(
                &mut validation_predictions,
                &initial_predictions,
                ds.num_rows() as usize,
            );
        }

        let mut gradients = GradientBuffer::new(n_train, dim);
        let mut trees: Vec<Tree> = Vec::new();
        let mut training_logs: Vec<TrainingLogEntry> = Vec::new();
        let mut stopper = EarlyStopping::new(
            params.early_stopping,
            params.early_stopping_num_trees_look_ahead as usize,
        );
        let mut current_subsample = params.subsample;
        let leaf_config = params.leaf_config();
        let logger = TrainingLogger::new(self.verbosity, loss.secondary_metric_names());
        logger.start(LEARNER_NAME, dataset.num_rows(), resolved.input_features.len());
        let started_at = Instant::now();
        let mut validation_loss: Option<f32> = None;

        // ---- Boosting iterations. ----
        for iteration in 0..params.num_trees as usize {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    logger.note("training deadline reached; keeping the partial forest");
                    break;
                }
            }
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(derive_seed(
                self.config.random_seed,
                iteration as u64 + 1,
            ));

            // DART: drop a random subset of the existing trees from the
            // gradient predictions.
            let dropped: Vec<usize> = match params.forest_extraction {
                ForestExtraction::Mart => Vec::new(),
                ForestExtraction::Dart { dropout } => (0..trees.len())
                    .filter(|_| rng.gen_bool(dropout.clamp(0.0, 1.0) as f64))
                    .collect(),
            };
            let mut dart_scratch: Vec<f32>;
            let effective_predictions: &[f32] = if dropped.is_empty() {
                &predictions
            } else {
                dart_scratch = predictions.clone();
                for &tree_idx in &dropped {
                    let channel = tree_idx % dim;
                    for row in 0..n_train {
                        dart_scratch[channel * n_train + row] -=
                            trees[tree_idx].regressor_value_for_row(train_dataset, row)?;
                    }
                }
                &dart_scratch
            };

            loss.update_gradients(
                train_dataset,
                resolved.label_col,
                effective_predictions,
                train_ranking.as_ref(),
                &mut gradients,
                &mut rng,
            )?;

            let sample = sample_iteration(
                params.effective_sampling(current_subsample),
                n_train,
                &gradients,
                train_ranking.as_ref(),
                &mut rng,
            )?;
            for &(row, factor) in &sample.amplification {
                gradients.scale_example(row as usize, factor);
            }

            // Grow one tree per channel against the same prediction
            // snapshot.
            let mut new_trees: Vec<Tree> = Vec::with_capacity(dim);
            for channel in 0..dim {
                let targets = if params.use_hessian_gain {
                    SplitTargets::Newton {
                        gradients: gradients.grad(channel),
                        hessians: gradients.hess(channel),
                    }
                } else {
                    SplitTargets::Regression { values: gradients.grad(channel) }
                };
                let grower = TreeGrower::new(SplitterInputs {
                    dataset: train_dataset,
                    targets,
                    weights: &weights,
                    input_features: &resolved.input_features,
                    params: &tree_params,
                    presort: presort.as_ref(),
                });
                let leaf_ctx = LeafContext {
                    dataset: train_dataset,
                    label_col: resolved.label_col,
                    weights: &weights,
                    predictions: effective_predictions,
                    gradients: &gradients,
                    leaf: leaf_config,
                };
                let set_leaf = |examples: &[RowIdx], _stats: &TargetStats| {
                    loss.set_leaf(channel, examples, &leaf_ctx)
                };
                let mut grown = grower.grow(sample.rows.clone(), &mut rng, &set_leaf)?;
                if !dropped.is_empty() {
                    grown.tree.scale_leaf_values(1.0 / (1.0 + dropped.len() as f32));
                }
                new_trees.push(grown.tree);
            }

            // Rescale the dropped trees, then bring the prediction buffers
            // up to date.
            if dropped.is_empty() {
                for (channel, tree) in new_trees.iter().enumerate() {
                    add_tree_predictions(tree, train_dataset, channel, &mut predictions)?;
                    if let Some(ds) = &validation_dataset {
                        add_tree_predictions(tree, ds, channel, &mut validation_predictions)?;
                    }
                }
                trees.append(&mut new_trees);
            } else {
                let factor = 1.0 / (1.0 + dropped.len() as f32);
                for &tree_idx in &dropped {
                    trees[tree_idx].scale_leaf_values(factor);
                }
                trees.append(&mut new_trees);
                // Dropped trees changed value: recompute from scratch.
                fill_initial(&mut predictions, &initial_predictions, n_train);
                for (tree_idx, tree) in trees.iter().enumerate() {
                    add_tree_predictions(tree, train_dataset, tree_idx % dim, &mut predictions)?;
                }
                if let Some(ds) = &validation_dataset {
                    fill_initial(
                        &mut validation_predictions,
                        &initial_predictions,
                        ds.num_rows() as usize,
                    );
                    for (tree_idx, tree) in trees.iter().enumerate() {
                        add_tree_predictions(tree, ds, tree_idx % dim, &mut validation_predictions)?;
                    }
                }
            }

            // ---- Losses, logs, early stopping. ----
            let training_value = loss.loss(
                train_dataset,
                resolved.label_col,
                &predictions,
                &weights,
                train_ranking.as_ref(),
            )?;
            let validation_value = match (&validation_dataset, &validation_weights) {
                (Some(ds), Some(validation_weights)) => Some(loss.loss(
                    ds,
                    resolved.label_col,
                    &validation_predictions,
                    validation_weights,
                    validation_ranking.as_ref(),
                )?),
                _ => None,
            };
            logger.iteration(iteration, &training_value, validation_value.as_ref());
            training_logs.push(TrainingLogEntry {
                iteration: iteration as u32,
                training_loss: training_value.loss,
                validation_loss: validation_value.as_ref().map(|v| v.loss),
                secondary_metrics: training_value.secondary.clone(),
            });

            if let Some(validation_value) = &validation_value {
                validation_loss = Some(validation_value.loss);
                if stopper.observe(iteration, validation_value.loss) == StopDecision::Stop {
                    logger.note(&format!(
                        "early stopping at iteration {iteration}; best was {}",
                        stopper.best_iteration().unwrap_or(0)
                    ));
                    break;
                }
            }

            if self.deadline.is_some() && params.adapt_subsample_for_maximum_training_duration {
                let elapsed = started_at.elapsed().as_secs_f64();
                let remaining_time = self
                    .deadline
                    .map(|deadline| {
                        deadline.saturating_duration_since(Instant::now()).as_secs_f64()
                    })
                    .unwrap_or(f64::INFINITY);
                current_subsample = adapted_subsample(
                    current_subsample,
                    elapsed,
                    remaining_time,
                    iteration + 1,
                    params.num_trees as usize - iteration - 1,
                );
            }
        }

        // ---- Truncate to the best validation iteration. ----
        if validation_dataset.is_some() && stopper.truncate_to_best() {
            if let Some(best) = stopper.best_iteration() {
                let keep = (best + 1) * dim;
                if keep < trees.len() {
                    trees.truncate(keep);
                    validation_loss = Some(stopper.best_loss());
                }
            }
        }

        logger.finish(LEARNER_NAME, trees.len());

        let resolved_loss = match params.loss {
            LossKind::Auto => loss.kind(),
            other => other,
        };
        let model = GradientBoostedTreesModel {
            header: ModelHeader {
                name: crate::model::gbt::MODEL_NAME.to_string(),
                task: self.config.task,
                label_col: resolved.label_col as u32,
                ranking_group_col: resolved.ranking_group_col.map(|c| c as u32),
                weights_col: resolved.weights_col.map(|c| c as u32),
                input_features: resolved.input_features.clone(),
            },
            data_spec: dataset.spec().clone(),
            trees,
            loss: resolved_loss,
            num_trees_per_iter: dim as u32,
            initial_predictions,
            validation_loss,
            training_logs,
        };
        model.validate()?;
        Ok(Box::new(model))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Prediction, Task};
    use crate::testing;
    use approx::assert_relative_eq;

    fn d1_config() -> TrainingConfig {
        let mut config = TrainingConfig::default();
        config.label = "y".to_string();
        config.task = Task::Classification;
        config.random_seed = 42;
        config.gbt.num_trees = 1;
        config.gbt.shrinkage = 0.1;
        config.gbt.validation_set_ratio = 0.0;
        config.gbt.tree.max_depth = 1;
        config.gbt.tree.min_examples = 1;
        config
    }

    #[test]
    fn single_binomial_tree_on_d1() {
        let dataset = testing::dataset_d1();
        let learner = GradientBoostedTreesLearner::new(d1_config()).unwrap();
        let model = learner.train(&dataset).unwrap();
        assert_eq!(model.trees().len(), 1);

        // Initial prediction is log(0.5 / 0.5) = 0; the single stump must
        // classify every row of D1 correctly.
        for row in 0..4 {
            match model.predict_row(&dataset, row).unwrap() {
                Prediction::Classification { class, .. } => {
                    assert_eq!(class, if row < 2 { 1 } else { 2 });
                }
                other => panic!("unexpected prediction {other:?}"),
            }
        }
    }

    #[test]
    fn regression_converges_on_a_line() {
        let dataset = testing::regression_dataset(&[1.0, 2.0, 3.0, 4.0]);
        let mut config = TrainingConfig::default();
        config.label = "y".to_string();
        config.task = Task::Regression;
        config.gbt.num_trees = 100;
        config.gbt.shrinkage = 0.1;
        config.gbt.validation_set_ratio = 0.0;
        config.gbt.tree.max_depth = 6;
        config.gbt.tree.min_examples = 1;
        let learner = GradientBoostedTreesLearner::new(config).unwrap();
        let model = learner.train(&dataset).unwrap();

        let labels = [1.0f32, 2.0, 3.0, 4.0];
        let mut sum_squared = 0.0f64;
        for row in 0..4 {
            match model.predict_row(&dataset, row).unwrap() {
                Prediction::Regression { value } => {
                    sum_squared += ((value - labels[row]) as f64).powi(2);
                }
                other => panic!("unexpected prediction {other:?}"),
            }
        }
        let rmse = (sum_squared / 4.0).sqrt();
        assert!(rmse <= 0.05, "training RMSE {rmse} above 0.05");
    }

    #[test]
    fn same_seed_trains_identical_forests() {
        let dataset = testing::dataset_d1();
        let mut config = d1_config();
        config.gbt.num_trees = 5;
        let first = GradientBoostedTreesLearner::new(config.clone())
            .unwrap()
            .train(&dataset)
            .unwrap();
        let second = GradientBoostedTreesLearner::new(config)
            .unwrap()
            .train(&dataset)
            .unwrap();
        let first_bytes = postcard::to_allocvec(first.trees()).unwrap();
        let second_bytes = postcard::to_allocvec(second.trees()).unwrap();
        assert_eq!(first_bytes, second_bytes);
    }

    #[test]
    fn multinomial_trains_num_classes_trees_per_iteration() {
        let dataset = testing::dataset_with_labels(&["a", "b", "c", "a", "b", "c"]);
        let mut config = TrainingConfig::default();
        config.label = "y".to_string();
        config.task = Task::Classification;
        config.gbt.num_trees = 4;
        config.gbt.validation_set_ratio = 0.0;
        config.gbt.tree.min_examples = 1;
        let learner = GradientBoostedTreesLearner::new(config).unwrap();
        let model = learner.train(&dataset).unwrap();
        assert_eq!(model.trees().len() % 3, 0);
        assert_eq!(model.trees().len(), 12);
    }

    #[test]
    fn shrinkage_scales_leaf_values_linearly() {
        let dataset = testing::regression_dataset(&[1.0, 2.0, 3.0, 4.0]);
        let mut base = TrainingConfig::default();
        base.label = "y".to_string();
        base.task = Task::Regression;
        base.gbt.num_trees = 1;
        base.gbt.validation_set_ratio = 0.0;
        base.gbt.tree.min_examples = 1;

        let mut full = base.clone();
        full.gbt.shrinkage = 1.0;
        let full_model = GradientBoostedTreesLearner::new(full).unwrap().train(&dataset).unwrap();

        let mut small = base;
        small.gbt.shrinkage = 0.25;
        let small_model =
            GradientBoostedTreesLearner::new(small).unwrap().train(&dataset).unwrap();

        for row in 0..4 {
            let full_leaf =
                full_model.trees()[0].regressor_value_for_row(&dataset, row).unwrap();
            let small_leaf =
                small_model.trees()[0].regressor_value_for_row(&dataset, row).unwrap();
            assert_relative_eq!(small_leaf, 0.25 * full_leaf, epsilon = 1e-6);
        }
    }

    #[test]
    fn lambda_mart_reaches_perfect_ndcg() {
        let dataset = testing::ranking_dataset();
        let mut config = TrainingConfig::default();
        config.label = "relevance".to_string();
        config.ranking_group = Some("group".to_string());
        config.task = Task::Ranking;
        config.gbt.num_trees = 50;
        config.gbt.validation_set_ratio = 0.0;
        config.gbt.tree.min_examples = 1;
        let learner = GradientBoostedTreesLearner::new(config).unwrap();
        let model = learner.train(&dataset).unwrap();

        let mut predictions = vec![0.0f32; 6];
        for row in 0..6 {
            match model.predict_row(&dataset, row).unwrap() {
                Prediction::Ranking { relevance } => predictions[row] = relevance,
                other => panic!("unexpected prediction {other:?}"),
            }
        }
        let groups = RankingGroups::build(&dataset, 0, 1).unwrap();
        let ndcg = groups.ndcg(&predictions, &[], 5);
        assert_relative_eq!(ndcg, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn early_stopping_produces_a_prefix_of_the_unstopped_forest() {
        // 20 rows so the validation split is non-trivial.
        let labels: Vec<f32> = (0..20).map(|i| (i % 5) as f32).collect();
        let dataset = testing::regression_dataset(&labels);
        let mut base = TrainingConfig::default();
        base.label = "y".to_string();
        base.task = Task::Regression;
        base.random_seed = 7;
        base.gbt.num_trees = 30;
        base.gbt.validation_set_ratio = 0.3;
        base.gbt.tree.min_examples = 1;

        let mut unstopped = base.clone();
        unstopped.gbt.early_stopping = EarlyStoppingPolicy::None;
        let full = GradientBoostedTreesLearner::new(unstopped)
            .unwrap()
            .train(&dataset)
            .unwrap();

        let mut stopped = base;
        stopped.gbt.early_stopping = EarlyStoppingPolicy::LossIncrease;
        stopped.gbt.early_stopping_num_trees_look_ahead = 3;
        let pruned = GradientBoostedTreesLearner::new(stopped)
            .unwrap()
            .train(&dataset)
            .unwrap();

        assert!(pruned.trees().len() <= full.trees().len());
        for (a, b) in pruned.trees().iter().zip(full.trees()) {
            assert_eq!(
                postcard::to_allocvec(a).unwrap(),
                postcard::to_allocvec(b).unwrap()
            );
        }
    }

    #[test]
    fn dart_keeps_the_forest_shape() {
        let dataset = testing::regression_dataset(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let mut config = TrainingConfig::default();
        config.label = "y".to_string();
        config.task = Task::Regression;
        config.gbt.num_trees = 10;
        config.gbt.validation_set_ratio = 0.0;
        config.gbt.forest_extraction = ForestExtraction::Dart { dropout: 0.5 };
        config.gbt.tree.min_examples = 1;
        let learner = GradientBoostedTreesLearner::new(config).unwrap();
        let model = learner.train(&dataset).unwrap();
        assert_eq!(model.trees().len(), 10);
        model.validate().unwrap();
    }
}
