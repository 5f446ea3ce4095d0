//! Ranking losses: LambdaMART-NDCG@5 and cross-entropy NDCG.
//!
//! LambdaMART accumulates pairwise "forces" between the items of each
//! ranking group, weighted by the NDCG@5 swap delta. Items are shuffled
//! before sorting by prediction so the expected gradient accounts for
//! tie-breaks. Cross-entropy NDCG pushes a per-group softmax of the scores
//! toward `2^relevance - γ` with γ drawn uniformly in [0, 1).

use rand::seq::SliceRandom;
use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::dataset::ranking::RankingGroups;
use crate::dataset::{RowIdx, VerticalDataset};
use crate::error::{Error, Result};
use crate::learner::gbt::gradients::GradientBuffer;
use crate::metric::NdcgCalculator;
use crate::tree::LeafPayload;

use super::{newton_leaf, LeafContext, Loss, LossKind, LossValue};

/// Truncation of the NDCG objective and metric.
pub const NDCG_TRUNCATION: usize = 5;

fn require_ranking<'a>(ranking: Option<&'a RankingGroups>) -> Result<&'a RankingGroups> {
    ranking.ok_or_else(|| Error::failed_precondition("missing ranking group index"))
}

/// Newton step over the accumulated gradient/hessian channel; shared by
/// both ranking losses.
fn ranking_set_leaf(examples: &[RowIdx], ctx: &LeafContext<'_>) -> LeafPayload {
    let grad = ctx.gradients.grad(0);
    let hess = ctx.gradients.hess(0);
    let mut sum_gradients = 0.0f64;
    let mut sum_hessians = 0.0f64;
    let mut sum_weights = 0.0f64;
    for &row in examples {
        let row = row as usize;
        let weight = ctx.weight(row);
        sum_gradients += weight * grad[row] as f64;
        sum_hessians += weight * hess[row] as f64;
        sum_weights += weight;
    }
    newton_leaf(sum_gradients, sum_hessians, sum_weights, &ctx.leaf, false)
}

// =============================================================================
// LambdaMART NDCG@5
// =============================================================================

/// See the module documentation.
#[derive(Debug, Clone, Copy)]
pub struct LambdaMartNdcg {
    /// Slope of the pairwise sigmoid ("lambda loss").
    lambda_loss: f32,
}

impl LambdaMartNdcg {
    pub fn new(lambda_loss: f32) -> Self {
        Self { lambda_loss }
    }
}

impl Loss for LambdaMartNdcg {
    fn kind(&self) -> LossKind {
        LossKind::LambdaMartNdcg5
    }

    fn initial_predictions(
        &self,
        _dataset: &VerticalDataset,
        _label_col: usize,
        _weights: &[f32],
    ) -> Result<Vec<f32>> {
        Ok(vec![0.0])
    }

    fn update_gradients(
        &self,
        _dataset: &VerticalDataset,
        _label_col: usize,
        predictions: &[f32],
        ranking: Option<&RankingGroups>,
        gradients: &mut GradientBuffer,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<()> {
        let ranking = require_ranking(ranking)?;
        let calculator = NdcgCalculator::new(NDCG_TRUNCATION);
        let lambda_loss = self.lambda_loss as f64;
        let lambda_loss_squared = lambda_loss * lambda_loss;

        let (grad, hess) = gradients.channel_mut(0);
        grad.fill(0.0);
        hess.fill(0.0);

        // `(prediction, rank in the relevance-sorted group)` pairs.
        let mut pred_and_ground: Vec<(f32, usize)> = Vec::new();
        for group in ranking.groups() {
            let group_size = group.items.len();
            if group_size <= 1 {
                // A single item exerts no pairwise force.
                continue;
            }
            pred_and_ground.clear();
            pred_and_ground.extend(
                group
                    .items
                    .iter()
                    .enumerate()
                    .map(|(ground_idx, item)| {
                        (predictions[item.example_idx as usize], ground_idx)
                    }),
            );

            // NDCG normalization over the ideal (relevance-sorted) order.
            let max_rank = NDCG_TRUNCATION.min(group_size);
            let mut max_ndcg = 0.0f64;
            for rank in 0..max_rank {
                max_ndcg += calculator.term(group.items[rank].relevance, rank);
            }
            if max_ndcg <= 0.0 {
                continue;
            }
            let norm_factor = 1.0 / max_ndcg;

            // Shuffle then sort by decreasing prediction: tied predictions
            // land in random order, so the expected gradient matches the
            // tie-aware metric.
            pred_and_ground.shuffle(rng);
            pred_and_ground.sort_by(|a, b| {
                b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal)
            });

            for item_1 in 0..group_size {
                let (pred_1, ground_1) = pred_and_ground[item_1];
                let relevance_1 = group.items[ground_1].relevance;
                let example_1 = group.items[ground_1].example_idx as usize;

                for item_2 in item_1 + 1..group_size {
                    let (pred_2, ground_2) = pred_and_ground[item_2];
                    let relevance_2 = group.items[ground_2].relevance;
                    let example_2 = group.items[ground_2].example_idx as usize;

                    // Equal relevances exert no force.
                    if relevance_1 == relevance_2 {
                        continue;
                    }

                    // NDCG delta of swapping the two display positions.
                    let mut delta_utility = 0.0f64;
                    if item_1 < NDCG_TRUNCATION {
                        delta_utility += calculator.term(relevance_2, item_1)
                            - calculator.term(relevance_1, item_1);
                    }
                    if item_2 < NDCG_TRUNCATION {
                        delta_utility += calculator.term(relevance_1, item_2)
                            - calculator.term(relevance_2, item_2);
                    }
                    let delta_utility = delta_utility.abs() * norm_factor;

                    // Sign of the lambda term: positive when item 1 is the
                    // more relevant of the pair.
                    let signed_lambda = if ground_1 < ground_2 {
                        lambda_loss
                    } else {
                        -lambda_loss
                    };

                    let sigmoid = 1.0
                        / (1.0 + (signed_lambda * (pred_1 - pred_2) as f64).exp());
                    let unit_grad = signed_lambda * sigmoid * delta_utility;
                    let unit_hess =
                        delta_utility * sigmoid * (1.0 - sigmoid) * lambda_loss_squared;

                    grad[example_1] += unit_grad as f32;
                    hess[example_1] += unit_hess as f32;
                    grad[example_2] -= unit_grad as f32;
                    hess[example_2] += unit_hess as f32;
                }
            }
        }
        Ok(())
    }

    fn set_leaf(&self, channel: usize, examples: &[RowIdx], ctx: &LeafContext<'_>) -> LeafPayload {
        debug_assert_eq!(channel, 0);
        ranking_set_leaf(examples, ctx)
    }

    /// The loss is `-NDCG@5`.
    fn loss(
        &self,
        _dataset: &VerticalDataset,
        _label_col: usize,
        predictions: &[f32],
        weights: &[f32],
        ranking: Option<&RankingGroups>,
    ) -> Result<LossValue> {
        let ranking = require_ranking(ranking)?;
        let ndcg = ranking.ndcg(predictions, weights, NDCG_TRUNCATION) as f32;
        Ok(LossValue { loss: -ndcg, secondary: vec![ndcg] })
    }

    fn secondary_metric_names(&self) -> &'static [&'static str] {
        &["NDCG@5"]
    }
}

// =============================================================================
// Cross-entropy NDCG
// =============================================================================

/// See the module documentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct XeNdcgMart;

impl Loss for XeNdcgMart {
    fn kind(&self) -> LossKind {
        LossKind::XeNdcgMart
    }

    fn initial_predictions(
        &self,
        _dataset: &VerticalDataset,
        _label_col: usize,
        _weights: &[f32],
    ) -> Result<Vec<f32>> {
        Ok(vec![0.0])
    }

    fn update_gradients(
        &self,
        _dataset: &VerticalDataset,
        _label_col: usize,
        predictions: &[f32],
        ranking: Option<&RankingGroups>,
        gradients: &mut GradientBuffer,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<()> {
        let ranking = require_ranking(ranking)?;
        let (grad, hess) = gradients.channel_mut(0);
        grad.fill(0.0);
        hess.fill(0.0);

        let mut probs: Vec<f64> = Vec::new();
        let mut params: Vec<f64> = Vec::new();

        for group in ranking.groups() {
            let group_size = group.items.len();
            if group_size <= 1 {
                continue;
            }
            probs.resize(group_size, 0.0);
            params.resize(group_size, 0.0);

            // γ draws for the smoothed ground-truth distribution.
            for param in params.iter_mut() {
                *param = rng.gen_range(0.0..1.0);
            }

            // Softmax of the scores, clamped away from 0 and 1.
            let mut max_pred = f64::NEG_INFINITY;
            for item in 0..group_size {
                probs[item] = predictions[group.items[item].example_idx as usize] as f64;
                max_pred = max_pred.max(probs[item]);
            }
            let mut sum_exp = 0.0f64;
            for &value in probs.iter() {
                sum_exp += (value - max_pred).exp();
            }
            let log_sum_exp = max_pred + (sum_exp + 1e-20).ln();
            for value in probs.iter_mut() {
                *value = (*value - log_sum_exp).exp().clamp(1e-5, 0.99999);
            }

            // First-order terms toward `2^relevance - γ`.
            let mut inv_denominator = 0.0f64;
            for item in 0..group_size {
                params[item] =
                    (2.0f64).powf(group.items[item].relevance as f64) - params[item];
                inv_denominator += params[item];
            }
            if inv_denominator == 0.0 {
                continue;
            }
            let inv_denominator = 1.0 / inv_denominator;

            let mut sum_l1 = 0.0f64;
            for item in 0..group_size {
                let example = group.items[item].example_idx as usize;
                let term = -params[item] * inv_denominator + probs[item];
                grad[example] = -(term as f32);
                params[item] = term / (1.0 - probs[item]);
                sum_l1 += params[item];
            }

            // Second-order terms.
            let mut sum_l2 = 0.0f64;
            for item in 0..group_size {
                let example = group.items[item].example_idx as usize;
                let term = probs[item] * (sum_l1 - params[item]);
                grad[example] -= term as f32;
                params[item] = term / (1.0 - probs[item]);
                sum_l2 += params[item];
            }

            // Third-order terms and the hessian.
            for item in 0..group_size {
                let example = group.items[item].example_idx as usize;
                grad[example] -= (probs[item] * (sum_l2 - params[item])) as f32;
                hess[example] = (probs[item] * (1.0 - probs[item])) as f32;
            }
        }
        Ok(())
    }

    fn set_leaf(&self, channel: usize, examples: &[RowIdx], ctx: &LeafContext<'_>) -> LeafPayload {
        debug_assert_eq!(channel, 0);
        ranking_set_leaf(examples, ctx)
    }

    fn loss(
        &self,
        _dataset: &VerticalDataset,
        _label_col: usize,
        predictions: &[f32],
        weights: &[f32],
        ranking: Option<&RankingGroups>,
    ) -> Result<LossValue> {
        let ranking = require_ranking(ranking)?;
        let ndcg = ranking.ndcg(predictions, weights, NDCG_TRUNCATION) as f32;
        Ok(LossValue { loss: -ndcg, secondary: Vec::new() })
    }

    fn secondary_metric_names(&self) -> &'static [&'static str] {
        &[]
    }
}

// =============================================================================
// Tests
// =============================================================================
