//! Squared-error loss for regression and ranking.

use rand_xoshiro::Xoshiro256PlusPlus;

use crate::dataset::ranking::RankingGroups;
use crate::dataset::{RowIdx, VerticalDataset};
use crate::error::{Error, Result};
use crate::learner::gbt::gradients::GradientBuffer;
use crate::metric::rmse;
use crate::model::Task;
use crate::tree::LeafPayload;

use super::{LeafContext, Loss, LossKind, LossValue, NDCG_TRUNCATION};

/// See the module documentation.
#[derive(Debug, Clone, Copy)]
pub struct SquaredError {
    task: Task,
}

impl SquaredError {
    pub fn new(task: Task) -> Self {
        Self { task }
    }
}

impl Loss for SquaredError {
    fn kind(&self) -> LossKind {
        LossKind::SquaredError
    }

    /// The weighted mean of the labels.
    fn initial_predictions(
        &self,
        dataset: &VerticalDataset,
        label_col: usize,
        weights: &[f32],
    ) -> Result<Vec<f32>> {
        let labels = dataset.numerical(label_col)?;
        let mut weighted_sum = 0.0f64;
        let mut sum_weights = 0.0f64;
        for (row, &label) in labels.iter().enumerate() {
            let weight = if weights.is_empty() { 1.0 } else { weights[row] as f64 };
            weighted_sum += weight * label as f64;
            sum_weights += weight;
        }
        if sum_weights <= 0.0 {
            return Err(Error::invalid_argument(
                "the sum of weights is zero; the dataset is empty or every weight is zero",
            ));
        }
        Ok(vec![(weighted_sum / sum_weights) as f32])
    }

    /// `gradient = label - prediction`, unit hessian.
    fn update_gradients(
        &self,
        dataset: &VerticalDataset,
        label_col: usize,
        predictions: &[f32],
        _ranking: Option<&RankingGroups>,
        gradients: &mut GradientBuffer,
        _rng: &mut Xoshiro256PlusPlus,
    ) -> Result<()> {
        let labels = dataset.numerical(label_col)?;
        let (grad, hess) = gradients.channel_mut(0);
        for (row, &label) in labels.iter().enumerate() {
            grad[row] = label - predictions[row];
            hess[row] = 1.0;
        }
        Ok(())
    }

    /// Mean residual `Σw(y - f) / (Σw + l2/2)`.
    ///
    /// The denominator keeps an implicit 2x factor folded into the
    /// shrinkage; normalizing it would change every existing model.
    fn set_leaf(&self, channel: usize, examples: &[RowIdx], ctx: &LeafContext<'_>) -> LeafPayload {
        debug_assert_eq!(channel, 0);
        let labels = ctx
            .dataset
            .numerical(ctx.label_col)
            .expect("squared-error label column");
        let predictions = ctx.predictions_of(0);
        let mut sum_weighted_residuals = 0.0f64;
        let mut sum_weights = 0.0f64;
        for &row in examples {
            let row = row as usize;
            let weight = ctx.weight(row);
            sum_weighted_residuals += weight * (labels[row] - predictions[row]) as f64;
            sum_weights += weight;
        }
        let leaf = &ctx.leaf;
        let value = leaf.shrinkage as f64 * sum_weighted_residuals
            / (sum_weights + leaf.l2_regularization as f64 / 2.0);
        LeafPayload::Regressor {
            top_value: value as f32,
            sum_gradients: sum_weighted_residuals,
            sum_hessians: sum_weights,
            sum_weights,
        }
    }

    /// RMSE; on a ranking task NDCG@5 is reported as a second metric.
    fn loss(
        &self,
        dataset: &VerticalDataset,
        label_col: usize,
        predictions: &[f32],
        weights: &[f32],
        ranking: Option<&RankingGroups>,
    ) -> Result<LossValue> {
        let labels = dataset.numerical(label_col)?;
        let value = rmse(labels, predictions, weights);
        let secondary = match (self.task, ranking) {
            (Task::Ranking, Some(index)) => {
                vec![value, index.ndcg(predictions, weights, NDCG_TRUNCATION) as f32]
            }
            _ => vec![value],
        };
        Ok(LossValue { loss: value, secondary })
    }

    fn secondary_metric_names(&self) -> &'static [&'static str] {
        match self.task {
            Task::Ranking => &["rmse", "NDCG@5"],
            _ => &["rmse"],
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::gbt::loss::LeafConfig;
    use crate::testing;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    #[test]
    fn initial_prediction_is_the_weighted_mean() {
        let dataset = testing::regression_dataset(&[1.0, 2.0, 3.0, 4.0]);
        let loss = SquaredError::new(Task::Regression);
        let initial = loss.initial_predictions(&dataset, 1, &[]).unwrap();
        assert_relative_eq!(initial[0], 2.5);

        let weighted = loss
            .initial_predictions(&dataset, 1, &[0.0, 0.0, 1.0, 1.0])
            .unwrap();
        assert_relative_eq!(weighted[0], 3.5);
    }

    #[test]
    fn zero_weights_are_rejected() {
        let dataset = testing::regression_dataset(&[1.0, 2.0]);
        let loss = SquaredError::new(Task::Regression);
        assert!(loss.initial_predictions(&dataset, 1, &[0.0, 0.0]).is_err());
    }

    #[test]
    fn gradient_is_the_residual() {
        let dataset = testing::regression_dataset(&[1.0, 2.0, 3.0, 4.0]);
        let loss = SquaredError::new(Task::Regression);
        let predictions = vec![2.5f32; 4];
        let mut gradients = GradientBuffer::new(4, 1);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        loss.update_gradients(&dataset, 1, &predictions, None, &mut gradients, &mut rng)
            .unwrap();
        assert_eq!(gradients.grad(0), &[-1.5, -0.5, 0.5, 1.5]);
    }

    #[test]
    fn leaf_divides_by_weight_plus_half_l2() {
        let dataset = testing::regression_dataset(&[1.0, 2.0, 3.0, 4.0]);
        let loss = SquaredError::new(Task::Regression);
        let predictions = vec![0.0f32; 4];
        let gradients = GradientBuffer::new(4, 1);
        let ctx = LeafContext {
            dataset: &dataset,
            label_col: 1,
            weights: &[],
            predictions: &predictions,
            gradients: &gradients,
            leaf: LeafConfig { shrinkage: 1.0, l2_regularization: 2.0, ..Default::default() },
        };
        let payload = loss.set_leaf(0, &[2, 3], &ctx);
        // (3 + 4) / (2 + 2/2) = 7/3.
        assert_relative_eq!(payload.top_value(), 7.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn loss_is_rmse() {
        let dataset = testing::regression_dataset(&[1.0, 2.0, 3.0, 4.0]);
        let loss = SquaredError::new(Task::Regression);
        let predictions = vec![1.0f32, 2.0, 3.0, 4.0];
        let value = loss.loss(&dataset, 1, &predictions, &[], None).unwrap();
        assert_relative_eq!(value.loss, 0.0);
        assert_eq!(loss.secondary_metric_names(), &["rmse"]);
    }
}
