//! Multinomial log-likelihood loss for multi-class classification.
//!
//! One gradient channel per class. Labels are categorical indices `1..=K`;
//! channel `k` is class `k + 1`'s one-vs-all logit and the per-example
//! probabilities come from a softmax over the channels.

use rand_xoshiro::Xoshiro256PlusPlus;

use crate::dataset::ranking::RankingGroups;
use crate::dataset::{RowIdx, VerticalDataset};
use crate::error::{Error, Result};
use crate::learner::gbt::gradients::GradientBuffer;
use crate::tree::split::l1_threshold;
use crate::tree::LeafPayload;

use super::{LeafContext, Loss, LossKind, LossValue, MIN_HESSIAN_FOR_NEWTON_STEP};

/// See the module documentation.
#[derive(Debug, Clone, Copy)]
pub struct MultinomialLogLikelihood {
    /// Number of classes, hence gradient channels.
    dimension: usize,
}

impl MultinomialLogLikelihood {
    pub fn new(dimension: usize) -> Self {
        debug_assert!(dimension >= 2);
        Self { dimension }
    }

    /// Per-example class probabilities (softmax with max subtraction).
    fn probabilities(&self, predictions: &[f32], n_rows: usize, row: usize, out: &mut [f64]) {
        let mut max_logit = f64::NEG_INFINITY;
        for channel in 0..self.dimension {
            max_logit = max_logit.max(predictions[channel * n_rows + row] as f64);
        }
        let mut sum_exp = 0.0f64;
        for channel in 0..self.dimension {
            let value = ((predictions[channel * n_rows + row] as f64) - max_logit).exp();
            out[channel] = value;
            sum_exp += value;
        }
        for value in out.iter_mut() {
            *value /= sum_exp;
        }
    }
}

impl Loss for MultinomialLogLikelihood {
    fn kind(&self) -> LossKind {
        LossKind::MultinomialLogLikelihood
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    /// Zero, following Friedman's multi-class algorithm.
    fn initial_predictions(
        &self,
        _dataset: &VerticalDataset,
        _label_col: usize,
        _weights: &[f32],
    ) -> Result<Vec<f32>> {
        Ok(vec![0.0; self.dimension])
    }

    /// `gradient_k = 1{label = k} - p_k`, hessian `|g|(1 - |g|)`.
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
        let n_rows = labels.len();
        let mut probabilities = vec![0.0f64; self.dimension];
        for row in 0..n_rows {
            self.probabilities(predictions, n_rows, row, &mut probabilities);
            let label = labels[row];
            for channel in 0..self.dimension {
                let indicator = if label == (channel + 1) as i32 { 1.0f64 } else { 0.0 };
                let grad = indicator - probabilities[channel];
                let abs_grad = grad.abs();
                let (grad_slice, hess_slice) = gradients.channel_mut(channel);
                grad_slice[row] = grad as f32;
                hess_slice[row] = (abs_grad * (1.0 - abs_grad)) as f32;
            }
        }
        Ok(())
    }

    /// `((K-1)/K) · Σw·g / Σw·|g|(1-|g|)`, thresholded, damped, shrunk,
    /// and clamped in logit space.
    fn set_leaf(&self, channel: usize, examples: &[RowIdx], ctx: &LeafContext<'_>) -> LeafPayload {
        let grad = ctx.gradients.grad(channel);
        let mut numerator = 0.0f64;
        let mut denominator = 0.0f64;
        let mut sum_weights = 0.0f64;
        for &row in examples {
            let row = row as usize;
            let weight = ctx.weight(row);
            let g = grad[row] as f64;
            let abs_grad = g.abs();
            numerator += weight * g;
            denominator += weight * abs_grad * (1.0 - abs_grad);
            sum_weights += weight;
        }
        let denominator = denominator.max(MIN_HESSIAN_FOR_NEWTON_STEP);

        let dim = self.dimension as f64;
        let scaled_numerator = numerator * (dim - 1.0);
        let scaled_denominator = denominator * dim;
        let leaf = &ctx.leaf;
        let value = (leaf.shrinkage as f64
            * l1_threshold(scaled_numerator, leaf.l1_regularization as f64)
            / (scaled_denominator + leaf.l2_regularization as f64))
            .clamp(-leaf.clamp_leaf_logit as f64, leaf.clamp_leaf_logit as f64);
        LeafPayload::Regressor {
            top_value: value as f32,
            sum_gradients: numerator,
            sum_hessians: denominator,
            sum_weights,
        }
    }

    /// Mean categorical cross-entropy; secondary metric is accuracy by
    /// arg-max over the channels.
    fn loss(
        &self,
        dataset: &VerticalDataset,
        label_col: usize,
        predictions: &[f32],
        weights: &[f32],
        _ranking: Option<&RankingGroups>,
    ) -> Result<LossValue> {
        let labels = dataset.categorical(label_col)?;
        let n_rows = labels.len();
        let mut probabilities = vec![0.0f64; self.dimension];
        let mut sum_loss = 0.0f64;
        let mut correct = 0.0f64;
        let mut sum_weights = 0.0f64;
        for row in 0..n_rows {
            let label = labels[row];
            if label < 1 || label > self.dimension as i32 {
                return Err(Error::failed_precondition(format!(
                    "label {label} at row {row} is outside 1..={}",
                    self.dimension
                )));
            }
            let weight = if weights.is_empty() { 1.0 } else { weights[row] as f64 };
            sum_weights += weight;
            self.probabilities(predictions, n_rows, row, &mut probabilities);

            let mut predicted = 0usize;
            for channel in 1..self.dimension {
                if probabilities[channel] > probabilities[predicted] {
                    predicted = channel;
                }
            }
            if label == (predicted + 1) as i32 {
                correct += weight;
            }
            let label_probability = probabilities[(label - 1) as usize].max(1e-300);
            sum_loss -= weight * label_probability.ln();
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
