//! Learners: training algorithms that turn a dataset into a forest model.

pub mod gbt;
pub mod logger;
pub mod rf;

use std::time::Instant;

use crate::config::{DeploymentConfig, TrainingConfig};
use crate::dataset::{ColumnType, DataSpec, VerticalDataset};
use crate::error::{Error, Result};
use crate::model::registry::{LearnerFactory, Registry};
use crate::model::ForestModel;

// =============================================================================
// Learner trait
// =============================================================================

/// A training algorithm.
///
/// Learners are configured once from a [`TrainingConfig`], optionally given
/// a deployment config and a deadline, and then train on a read-only
/// dataset. Hitting the deadline ends training cleanly with the partial
/// forest.
pub trait Learner: Send {
    /// Registered learner name.
    fn name(&self) -> &'static str;

    fn set_deployment(&mut self, deployment: DeploymentConfig);

    fn set_deadline(&mut self, deadline: Option<Instant>);

    fn set_verbosity(&mut self, verbosity: logger::Verbosity);

    fn train(&self, dataset: &VerticalDataset) -> Result<Box<dyn ForestModel>>;
}

/// Registry of the learners compiled into this binary.
pub fn learner_registry() -> Registry<LearnerFactory> {
    let mut registry: Registry<LearnerFactory> = Registry::new("learner");
    registry.register(gbt::LEARNER_NAME, |config| {
        Ok(Box::new(gbt::GradientBoostedTreesLearner::new(config)?))
    });
    registry.register(rf::LEARNER_NAME, |config| {
        Ok(Box::new(rf::RandomForestLearner::new(config)?))
    });
    registry
}

/// Build the learner named by `config.learner`, with its deployment and
/// deadline applied.
pub fn create_learner(
    config: TrainingConfig,
    deployment: DeploymentConfig,
) -> Result<Box<dyn Learner>> {
    let registry = learner_registry();
    let factory = registry.get(&config.learner)?;
    let deadline = if config.maximum_training_duration_seconds > 0.0 {
        Some(
            Instant::now()
                + std::time::Duration::from_secs_f32(config.maximum_training_duration_seconds),
        )
    } else {
        None
    };
    let mut learner = factory(config)?;
    learner.set_deployment(deployment);
    learner.set_deadline(deadline);
    Ok(learner)
}

// =============================================================================
// Column resolution
// =============================================================================

/// Dataset columns resolved from a training config.
#[derive(Debug, Clone)]
pub struct ResolvedColumns {
    pub label_col: usize,
    pub ranking_group_col: Option<usize>,
    pub weights_col: Option<usize>,
    pub input_features: Vec<u32>,
}

/// Resolve the label, group, weight, and feature columns against a spec.
///
/// An empty feature list selects every column except the label, the group,
/// the weights, and HASH columns (which cannot be split on).
pub fn resolve_columns(config: &TrainingConfig, spec: &DataSpec) -> Result<ResolvedColumns> {
    config.validate()?;
    let label_col = spec.column_index_or_err(&config.label)?;
    let ranking_group_col = config
        .ranking_group
        .as_deref()
        .map(|name| spec.column_index_or_err(name))
        .transpose()?;
    let weights_col = config
        .weights
        .as_deref()
        .map(|name| spec.column_index_or_err(name))
        .transpose()?;

    let input_features: Vec<u32> = if config.features.is_empty() {
        (0..spec.num_columns())
            .filter(|&col| {
                col != label_col
                    && Some(col) != ranking_group_col
                    && Some(col) != weights_col
                    && spec.columns[col].col_type != ColumnType::Hash
            })
            .map(|col| col as u32)
            .collect()
    } else {
        let mut features = Vec::with_capacity(config.features.len());
        for name in &config.features {
            let col = spec.column_index_or_err(name)?;
            if col == label_col {
                return Err(Error::invalid_argument(format!(
                    "the label column \"{name}\" cannot be an input feature"
                )));
            }
            features.push(col as u32);
        }
        features
    };
    if input_features.is_empty() {
        return Err(Error::invalid_argument("no input feature"));
    }
    Ok(ResolvedColumns { label_col, ranking_group_col, weights_col, input_features })
}

// =============================================================================
// Deterministic seeding
// =============================================================================

/// Derive an independent seed from a base seed and a stream index
/// (SplitMix64 over their combination).
pub fn derive_seed(seed: u64, stream: u64) -> u64 {
    let mut z = seed ^ stream.wrapping_mul(0x9e3779b97f4a7c15);
    z = z.wrapping_add(0x9e3779b97f4a7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

// =============================================================================
// Tests
// =============================================================================
