//! Loss functions for gradient-boosted trees.
//!
//! Each loss provides the initial predictions, per-iteration gradients and
//! hessians, the Newton leaf value, and the training loss with its secondary
//! metrics. The set of losses is closed and dispatched through [`LossKind`].
//!
//! | Loss | Task | Gradient channels |
//! |---|---|---|
//! | [`BinomialLogLikelihood`] | 2-class classification | 1 |
//! | [`MultinomialLogLikelihood`] | K-class classification | K |
//! | [`SquaredError`] | regression / ranking | 1 |
//! | [`LambdaMartNdcg`] | ranking | 1 |
//! | [`XeNdcgMart`] | ranking | 1 |

mod binomial;
mod multinomial;
mod ndcg;
mod squared;

pub use binomial::BinomialLogLikelihood;
pub use multinomial::MultinomialLogLikelihood;
pub use ndcg::{LambdaMartNdcg, XeNdcgMart, NDCG_TRUNCATION};
pub use squared::SquaredError;

use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::dataset::ranking::RankingGroups;
use crate::dataset::spec::{ColumnSpec, ColumnType};
use crate::dataset::{RowIdx, VerticalDataset};
use crate::error::{Error, Result};
use crate::learner::gbt::gradients::GradientBuffer;
use crate::model::Task;
use crate::tree::split::l1_threshold;
use crate::tree::LeafPayload;

/// Floor of the hessian (denominator) in every Newton leaf step.
pub const MIN_HESSIAN_FOR_NEWTON_STEP: f64 = 1e-3;

// =============================================================================
// Leaf configuration
// =============================================================================

/// Regularization applied when a loss sets a leaf value.
#[derive(Debug, Clone, Copy)]
pub struct LeafConfig {
    pub shrinkage: f32,
    pub l1_regularization: f32,
    pub l2_regularization: f32,
    /// Leaf logits of classification losses are clamped to this magnitude.
    pub clamp_leaf_logit: f32,
}

impl Default for LeafConfig {
    fn default() -> Self {
        Self {
            shrinkage: 0.1,
            l1_regularization: 0.0,
            l2_regularization: 0.0,
            clamp_leaf_logit: 5.0,
        }
    }
}

/// Inputs shared by every `set_leaf` implementation.
pub struct LeafContext<'a> {
    pub dataset: &'a VerticalDataset,
    pub label_col: usize,
    /// Per-row weights; empty means uniform.
    pub weights: &'a [f32],
    /// Column-major predictions, `dimension * n_rows`.
    pub predictions: &'a [f32],
    pub gradients: &'a GradientBuffer,
    pub leaf: LeafConfig,
}

impl LeafContext<'_> {
    #[inline]
    pub fn weight(&self, row: usize) -> f64 {
        if self.weights.is_empty() { 1.0 } else { self.weights[row] as f64 }
    }

    /// Prediction slice of one gradient channel.
    pub fn predictions_of(&self, channel: usize) -> &[f32] {
        let n = self.gradients.n_rows();
        &self.predictions[channel * n..(channel + 1) * n]
    }
}

/// Newton leaf shared by the hessian-driven losses: threshold the gradient
/// sum, damp the floored hessian sum, shrink.
pub(crate) fn newton_leaf(
    sum_gradients: f64,
    sum_hessians: f64,
    sum_weights: f64,
    leaf: &LeafConfig,
    clamp: bool,
) -> LeafPayload {
    let denominator = sum_hessians.max(MIN_HESSIAN_FOR_NEWTON_STEP);
    let mut value = leaf.shrinkage as f64
        * l1_threshold(sum_gradients, leaf.l1_regularization as f64)
        / (denominator + leaf.l2_regularization as f64);
    if clamp {
        value = value.clamp(-leaf.clamp_leaf_logit as f64, leaf.clamp_leaf_logit as f64);
    }
    LeafPayload::Regressor {
        top_value: value as f32,
        sum_gradients,
        sum_hessians: denominator,
        sum_weights,
    }
}

// =============================================================================
// Loss trait
// =============================================================================

/// Loss value and its secondary metrics, in the order named by
/// [`Loss::secondary_metric_names`].
#[derive(Debug, Clone, PartialEq)]
pub struct LossValue {
    pub loss: f32,
    pub secondary: Vec<f32>,
}

/// A gradient-boosting loss.
pub trait Loss: Send + Sync {
    fn kind(&self) -> LossKind;

    /// Number of gradient channels, hence trees per boosting iteration.
    fn dimension(&self) -> usize {
        1
    }

    /// The constant predictions before any tree is added, one per channel.
    fn initial_predictions(
        &self,
        dataset: &VerticalDataset,
        label_col: usize,
        weights: &[f32],
    ) -> Result<Vec<f32>>;

    /// Fill `gradients` from the labels and the current `predictions`
    /// (column-major, `dimension * n_rows`).
    fn update_gradients(
        &self,
        dataset: &VerticalDataset,
        label_col: usize,
        predictions: &[f32],
        ranking: Option<&RankingGroups>,
        gradients: &mut GradientBuffer,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<()>;

    /// Leaf payload for the examples of one leaf on one channel.
    fn set_leaf(&self, channel: usize, examples: &[RowIdx], ctx: &LeafContext<'_>) -> LeafPayload;

    /// Training loss and secondary metrics over a dataset.
    fn loss(
        &self,
        dataset: &VerticalDataset,
        label_col: usize,
        predictions: &[f32],
        weights: &[f32],
        ranking: Option<&RankingGroups>,
    ) -> Result<LossValue>;

    fn secondary_metric_names(&self) -> &'static [&'static str];
}

// =============================================================================
// Loss kinds
// =============================================================================

/// Identifier of a loss, used in configs and model headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossKind {
    /// Pick the default loss of the task at training time.
    Auto,
    BinomialLogLikelihood,
    MultinomialLogLikelihood,
    SquaredError,
    LambdaMartNdcg5,
    XeNdcgMart,
}

impl LossKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LossKind::Auto => "AUTO",
            LossKind::BinomialLogLikelihood => "BINOMIAL_LOG_LIKELIHOOD",
            LossKind::MultinomialLogLikelihood => "MULTINOMIAL_LOG_LIKELIHOOD",
            LossKind::SquaredError => "SQUARED_ERROR",
            LossKind::LambdaMartNdcg5 => "LAMBDA_MART_NDCG5",
            LossKind::XeNdcgMart => "XE_NDCG_MART",
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "AUTO" => Ok(LossKind::Auto),
            "BINOMIAL_LOG_LIKELIHOOD" => Ok(LossKind::BinomialLogLikelihood),
            "MULTINOMIAL_LOG_LIKELIHOOD" => Ok(LossKind::MultinomialLogLikelihood),
            "SQUARED_ERROR" => Ok(LossKind::SquaredError),
            "LAMBDA_MART_NDCG5" => Ok(LossKind::LambdaMartNdcg5),
            "XE_NDCG_MART" => Ok(LossKind::XeNdcgMart),
            other => Err(Error::invalid_argument(format!("unknown loss \"{other}\""))),
        }
    }

    /// Default loss of a task.
    pub fn default_for(task: Task, label: &ColumnSpec) -> Result<LossKind> {
        match task {
            Task::Classification => {
                let classes = label.dict()?.number_of_unique_values();
                if classes == 3 {
                    Ok(LossKind::BinomialLogLikelihood)
                } else {
                    Ok(LossKind::MultinomialLogLikelihood)
                }
            }
            Task::Regression => Ok(LossKind::SquaredError),
            Task::Ranking => Ok(LossKind::LambdaMartNdcg5),
        }
    }
}

/// Instantiate a loss, validating it against the task and the label column.
pub fn create_loss(
    kind: LossKind,
    task: Task,
    label: &ColumnSpec,
    lambda_loss: f32,
) -> Result<Box<dyn Loss>> {
    let kind = match kind {
        LossKind::Auto => LossKind::default_for(task, label)?,
        other => other,
    };
    match kind {
        LossKind::Auto => unreachable!("resolved above"),
        LossKind::BinomialLogLikelihood => {
            if task != Task::Classification {
                return Err(Error::invalid_argument(
                    "binomial log-likelihood requires a classification task",
                ));
            }
            if label.col_type != ColumnType::Categorical
                || label.dict()?.number_of_unique_values() != 3
            {
                return Err(Error::invalid_argument(
                    "binomial log-likelihood requires a binary categorical label",
                ));
            }
            Ok(Box::new(BinomialLogLikelihood))
        }
        LossKind::MultinomialLogLikelihood => {
            if task != Task::Classification {
                return Err(Error::invalid_argument(
                    "multinomial log-likelihood requires a classification task",
                ));
            }
            let classes = label.dict()?.number_of_unique_values();
            if classes < 3 {
                return Err(Error::invalid_argument(
                    "multinomial log-likelihood requires at least two classes",
                ));
            }
            Ok(Box::new(MultinomialLogLikelihood::new(classes - 1)))
        }
        LossKind::SquaredError => {
            if task != Task::Regression && task != Task::Ranking {
                return Err(Error::invalid_argument(
                    "squared error requires a regression or ranking task",
                ));
            }
            Ok(Box::new(SquaredError::new(task)))
        }
        LossKind::LambdaMartNdcg5 => {
            if task != Task::Ranking {
                return Err(Error::invalid_argument("NDCG loss requires a ranking task"));
            }
            Ok(Box::new(LambdaMartNdcg::new(lambda_loss)))
        }
        LossKind::XeNdcgMart => {
            if task != Task::Ranking {
                return Err(Error::invalid_argument(
                    "cross-entropy NDCG loss requires a ranking task",
                ));
            }
            Ok(Box::new(XeNdcgMart))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::spec::{CategoricalDict, NumericalStats};
    use std::collections::HashMap;

    fn binary_label() -> ColumnSpec {
        let mut frequencies = HashMap::new();
        frequencies.insert("a".to_string(), 2);
        frequencies.insert("b".to_string(), 2);
        ColumnSpec::categorical("y", CategoricalDict::from_frequencies(&frequencies, 1, 100))
    }

    fn three_class_label() -> ColumnSpec {
        let mut frequencies = HashMap::new();
        for token in ["a", "b", "c"] {
            frequencies.insert(token.to_string(), 2);
        }
        ColumnSpec::categorical("y", CategoricalDict::from_frequencies(&frequencies, 1, 100))
    }

    #[test]
    fn auto_picks_the_task_default() {
        assert_eq!(
            LossKind::default_for(Task::Classification, &binary_label()).unwrap(),
            LossKind::BinomialLogLikelihood
        );
        assert_eq!(
            LossKind::default_for(Task::Classification, &three_class_label()).unwrap(),
            LossKind::MultinomialLogLikelihood
        );
        let numeric = ColumnSpec::numerical("y", NumericalStats::default());
        assert_eq!(
            LossKind::default_for(Task::Regression, &numeric).unwrap(),
            LossKind::SquaredError
        );
        assert_eq!(
            LossKind::default_for(Task::Ranking, &numeric).unwrap(),
            LossKind::LambdaMartNdcg5
        );
    }

    #[test]
    fn binomial_rejects_multiclass_labels() {
        let err = match create_loss(
            LossKind::BinomialLogLikelihood,
            Task::Classification,
            &three_class_label(),
            1.0,
        ) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn multinomial_dimension_is_num_classes() {
        let loss = create_loss(
            LossKind::MultinomialLogLikelihood,
            Task::Classification,
            &three_class_label(),
            1.0,
        )
        .unwrap();
        assert_eq!(loss.dimension(), 3);
    }

    #[test]
    fn ranking_losses_require_the_ranking_task() {
        let numeric = ColumnSpec::numerical("y", NumericalStats::default());
        assert!(create_loss(LossKind::LambdaMartNdcg5, Task::Regression, &numeric, 1.0).is_err());
        assert!(create_loss(LossKind::XeNdcgMart, Task::Regression, &numeric, 1.0).is_err());
        assert!(create_loss(LossKind::SquaredError, Task::Ranking, &numeric, 1.0).is_ok());
    }

    #[test]
    fn kind_round_trips_through_parse() {
        for kind in [
            LossKind::Auto,
            LossKind::BinomialLogLikelihood,
            LossKind::MultinomialLogLikelihood,
            LossKind::SquaredError,
            LossKind::LambdaMartNdcg5,
            LossKind::XeNdcgMart,
        ] {
            assert_eq!(LossKind::parse(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn newton_leaf_floors_the_hessian() {
        let leaf = LeafConfig { shrinkage: 1.0, ..Default::default() };
        let payload = newton_leaf(1.0, 0.0, 1.0, &leaf, false);
        match payload {
            LeafPayload::Regressor { top_value, sum_hessians, .. } => {
                assert_eq!(sum_hessians, MIN_HESSIAN_FOR_NEWTON_STEP);
                assert!((top_value - (1.0 / MIN_HESSIAN_FOR_NEWTON_STEP) as f32).abs() < 1e-3);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn newton_leaf_clamps_classification_logits() {
        let leaf = LeafConfig { shrinkage: 1.0, clamp_leaf_logit: 2.0, ..Default::default() };
        let payload = newton_leaf(100.0, 1.0, 1.0, &leaf, true);
        assert_eq!(payload.top_value(), 2.0);
    }
}
