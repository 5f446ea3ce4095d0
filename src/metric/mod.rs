//! The few metrics the losses use internally.
//!
//! General metric reporting lives outside this crate; training only needs
//! RMSE, accuracy, log-loss, and truncated NDCG.

// =============================================================================
// Regression
// =============================================================================

/// Weighted root mean squared error.
pub fn rmse(labels: &[f32], predictions: &[f32], weights: &[f32]) -> f32 {
    debug_assert_eq!(labels.len(), predictions.len());
    let mut sum_squared = 0.0f64;
    let mut sum_weights = 0.0f64;
    for (idx, (&label, &prediction)) in labels.iter().zip(predictions).enumerate() {
        let weight = if weights.is_empty() { 1.0 } else { weights[idx] as f64 };
        let residual = (label - prediction) as f64;
        sum_squared += weight * residual * residual;
        sum_weights += weight;
    }
    if sum_weights > 0.0 {
        (sum_squared / sum_weights).sqrt() as f32
    } else {
        f32::NAN
    }
}

// =============================================================================
// NDCG
// =============================================================================

/// Truncated Normalized Discounted Cumulative Gain.
///
/// `term(relevance, rank)` is `(2^relevance - 1) / log2(rank + 2)`; discounts
/// are precomputed for the truncation window.
pub struct NdcgCalculator {
    truncation: usize,
    inv_log_discounts: Vec<f64>,
}

impl NdcgCalculator {
    pub fn new(truncation: usize) -> Self {
        let inv_log_discounts = (0..truncation)
            .map(|rank| 1.0 / ((rank as f64) + 2.0).log2())
            .collect();
        Self { truncation, inv_log_discounts }
    }

    pub fn truncation(&self) -> usize {
        self.truncation
    }

    /// DCG contribution of an item with `relevance` at `rank` (0-based).
    #[inline]
    pub fn term(&self, relevance: f32, rank: usize) -> f64 {
        debug_assert!(rank < self.truncation);
        ((2.0f64).powf(relevance as f64) - 1.0) * self.inv_log_discounts[rank]
    }

    /// NDCG of one group given `(prediction, relevance)` pairs.
    ///
    /// Items are ranked by decreasing prediction; prediction ties are broken
    /// by increasing relevance so tied predictions cannot inflate the score.
    pub fn ndcg(&self, items: &[(f32, f32)]) -> f64 {
        if items.is_empty() {
            return 0.0;
        }
        let mut by_prediction: Vec<(f32, f32)> = items.to_vec();
        by_prediction.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        });
        let dcg: f64 = by_prediction
            .iter()
            .take(self.truncation)
            .enumerate()
            .map(|(rank, &(_, relevance))| self.term(relevance, rank))
            .sum();

        let mut relevances: Vec<f32> = items.iter().map(|&(_, relevance)| relevance).collect();
        relevances.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let ideal: f64 = relevances
            .iter()
            .take(self.truncation)
            .enumerate()
            .map(|(rank, &relevance)| self.term(relevance, rank))
            .sum();

        if ideal > 0.0 { dcg / ideal } else { 0.0 }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Numerically stable `ln(1 + exp(x))`.
#[inline]
pub fn log1p_exp(x: f64) -> f64 {
    if x > 30.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}

// =============================================================================
// Tests
// =============================================================================
