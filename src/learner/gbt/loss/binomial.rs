//! Binomial log-likelihood loss for binary classification.
//!
//! Labels are categorical indices {1, 2}; the positive class is index 2.
//! Predictions are log-odds of the positive class.

use rand_xoshiro::Xoshiro256PlusPlus;

use crate::dataset::ranking::RankingGroups;
use crate::dataset::{RowIdx, VerticalDataset};
use crate::error::{Error, Result};
use crate::learner::gbt::gradients::GradientBuffer;
use crate::metric::log1p_exp;
use crate::tree::LeafPayload;

use super::{newton_leaf, LeafContext, Loss, LossKind, LossValue};

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// See the module documentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinomialLogLikelihood;

impl Loss for BinomialLogLikelihood {
    fn kind(&self) -> LossKind {
        LossKind::BinomialLogLikelihood
    }

    /// `log(p / (1 - p))` with `p` the weighted ratio of positive labels.
    /// All-negative or all-positive labels produce the `±f32::MAX` sentinel.
    fn initial_predictions(
        &self,
        dataset: &VerticalDataset,
        label_col: usize,
        weights: &[f32],
    ) -> Result<Vec<f32>> {
        let labels = dataset.categorical(label_col)?;
        let mut weighted_positive = 0.0f64;
        let mut sum_weights = 0.0f64;
        for (row, &label) in labels.iter().enumerate() {
            let weight = if weights.is_empty() { 1.0 } else { weights[row] as f64 };
            sum_weights += weight;
            if label == 2 {
                weighted_positive += weight;
            }
        }
        if sum_weights <= 0.0 {
            return Err(Error::invalid_argument("the sum of weights is zero"));
        }
        let ratio = weighted_positive / sum_weights;
        Ok(vec![if ratio == 0.0 {
            -f32::MAX
        } else if ratio == 1.0 {
            f32::MAX
        } else {
            (ratio / (1.0 - ratio)).ln() as f32
        }])
    }

    /// `gradient = label - sigmoid(prediction)`.
    fn update_gradients(
        &self,
        dataset: &VerticalDataset,
        label_col: usize,
        predictions: &[f32],
        _ranking: Option<&RankingGroups>,
        gradients: &mut GradientBuffer,
        _rng: &mut Xoshiro256PlusPlus,
    ) -> Result<()> {
        let labels = dataset.categorical(label_col)?;
        let (grad, hess) = gradients.channel_mut(0);
        for (row, &label) in labels.iter().enumerate() {
            let label = if label == 2 { 1.0f32 } else { 0.0 };
            let probability = sigmoid(predictions[row]);
            grad[row] = label - probability;
            hess[row] = probability * (1.0 - probability);
        }
        Ok(())
    }

    /// Newton step `Σw(y - p) / Σw·p(1-p)`, clamped in logit space.
    fn set_leaf(&self, channel: usize, examples: &[RowIdx], ctx: &LeafContext<'_>) -> LeafPayload {
        debug_assert_eq!(channel, 0);
        let labels = ctx
            .dataset
            .categorical(ctx.label_col)
            .expect("binomial label column");
        let predictions = ctx.predictions_of(0);
        let mut numerator = 0.0f64;
        let mut denominator = 0.0f64;
        let mut sum_weights = 0.0f64;
        for &row in examples {
            let row = row as usize;
            let weight = ctx.weight(row);
            let label = if labels[row] == 2 { 1.0f64 } else { 0.0 };
            let probability = sigmoid(predictions[row]) as f64;
            numerator += weight * (label - probability);
            denominator += weight * probability * (1.0 - probability);
            sum_weights += weight;
        }
        newton_leaf(numerator, denominator, sum_weights, &ctx.leaf, true)
    }

    /// `-2 · mean(y·f - ln(1 + e^f))`; secondary metric is accuracy with
    /// the decision boundary at `f = 0`.
    fn loss(
        &self,
        dataset: &VerticalDataset,
        label_col: usize,
        predictions: &[f32],
        weights: &[f32],
        _ranking: Option<&RankingGroups>,
    ) -> Result<LossValue> {
        let labels = dataset.categorical(label_col)?;
        let mut sum_loss = 0.0f64;
        let mut correct = 0.0f64;
        let mut sum_weights = 0.0f64;
        for (row, &label) in labels.iter().enumerate() {
            let weight = if weights.is_empty() { 1.0 } else { weights[row] as f64 };
            let positive = label == 2;
            let y = if positive { 1.0f64 } else { 0.0 };
            let prediction = predictions[row] as f64;
            sum_weights += weight;
            if positive == (prediction >= 0.0) {
                correct += weight;
            }
            sum_loss -= 2.0 * weight * (y * prediction - log1p_exp(prediction));
        }
        if sum_weights > 0.0 {
            Ok(LossValue {
                loss: (sum_loss / sum_weights) as f32,
                secondary: vec![(correct / sum_weights) as f32],
            })
        } else {
            Ok(LossValue { loss: f32::NAN, secondary: vec![f32::NAN] })
        }
    }

    fn secondary_metric_names(&self) -> &'static [&'static str] {
        &["accuracy"]
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
    fn balanced_labels_start_at_zero() {
        let dataset = testing::dataset_d1();
        let loss = BinomialLogLikelihood;
        let initial = loss.initial_predictions(&dataset, 1, &[]).unwrap();
        assert_eq!(initial.len(), 1);
        assert_relative_eq!(initial[0], 0.0);
    }

    #[test]
    fn one_sided_labels_produce_the_sentinel() {
        let vocab = ["a", "b"];
        let dataset = testing::dataset_with_label_vocab(&vocab, &["a", "a", "a", "a"]);
        let loss = BinomialLogLikelihood;
        let initial = loss.initial_predictions(&dataset, 1, &[]).unwrap();
        assert_eq!(initial[0], -f32::MAX);

        let dataset = testing::dataset_with_label_vocab(&vocab, &["b", "b", "b", "b"]);
        let initial = loss.initial_predictions(&dataset, 1, &[]).unwrap();
        assert_eq!(initial[0], f32::MAX);
    }

    #[test]
    fn gradient_is_label_minus_probability() {
        let dataset = testing::dataset_d1();
        let loss = BinomialLogLikelihood;
        let predictions = vec![0.0f32; 4];
        let mut gradients = GradientBuffer::new(4, 1);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        loss.update_gradients(&dataset, 1, &predictions, None, &mut gradients, &mut rng)
            .unwrap();
        // Labels are a, a, b, b -> 0, 0, 1, 1; sigmoid(0) = 0.5.
        assert_eq!(gradients.grad(0), &[-0.5, -0.5, 0.5, 0.5]);
        for &h in gradients.hess(0) {
            assert_relative_eq!(h, 0.25);
        }
    }

    #[test]
    fn leaf_value_is_a_shrunk_newton_step() {
        let dataset = testing::dataset_d1();
        let loss = BinomialLogLikelihood;
        let predictions = vec![0.0f32; 4];
        let mut gradients = GradientBuffer::new(4, 1);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        loss.update_gradients(&dataset, 1, &predictions, None, &mut gradients, &mut rng)
            .unwrap();
        let ctx = LeafContext {
            dataset: &dataset,
            label_col: 1,
            weights: &[],
            predictions: &predictions,
            gradients: &gradients,
            leaf: LeafConfig { shrinkage: 0.1, ..Default::default() },
        };
        // Positive-class rows 2 and 3: numerator = 1.0, denominator = 0.5.
        let payload = loss.set_leaf(0, &[2, 3], &ctx);
        assert_relative_eq!(payload.top_value(), 0.1 * 1.0 / 0.5, epsilon = 1e-6);
    }

    #[test]
    fn perfect_separation_reaches_accuracy_one() {
        let dataset = testing::dataset_d1();
        let loss = BinomialLogLikelihood;
        let predictions = vec![-2.0f32, -2.0, 2.0, 2.0];
        let value = loss.loss(&dataset, 1, &predictions, &[], None).unwrap();
        assert_relative_eq!(value.secondary[0], 1.0);
        assert!(value.loss > 0.0);
    }

    #[test]
    fn loss_matches_the_closed_form_at_zero() {
        let dataset = testing::dataset_d1();
        let loss = BinomialLogLikelihood;
        let predictions = vec![0.0f32; 4];
        let value = loss.loss(&dataset, 1, &predictions, &[], None).unwrap();
        // -2 * (0 - ln 2) per example.
        assert_relative_eq!(value.loss, 2.0 * (2.0f32).ln(), epsilon = 1e-5);
    }
}
