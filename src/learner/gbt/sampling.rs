//! Per-iteration example sampling for gradient boosting.
//!
//! Four methods:
//! - [`SamplingMethod::None`]: every row, every iteration.
//! - [`SamplingMethod::Random`]: a uniform `subsample` fraction without
//!   replacement.
//! - [`SamplingMethod::Goss`]: gradient-based one-side sampling. Keep the
//!   top `alpha` fraction by |gradient|, a random `beta` fraction of the
//!   rest, and amplify the kept rest by `(1 - alpha) / beta`.
//! - [`SamplingMethod::Selgb`]: selective gradient boosting for ranking.
//!   Keep every positive item and the top `ratio` hardest negatives per
//!   ranking group.

use std::fmt;

use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::dataset::ranking::RankingGroups;
use crate::dataset::RowIdx;
use crate::error::{Error, Result};
use crate::learner::gbt::gradients::GradientBuffer;

// =============================================================================
// Configuration
// =============================================================================

/// Sampling method of one boosting iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingMethod {
    None,
    /// Uniform sampling without replacement at rate `subsample`.
    Random { subsample: f32 },
    /// Gradient-based one-side sampling.
    Goss { alpha: f32, beta: f32 },
    /// Selective gradient boosting; requires a ranking task.
    Selgb { ratio: f32 },
}

impl Default for SamplingMethod {
    fn default() -> Self {
        SamplingMethod::None
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingMethod::None => write!(f, "NONE"),
            SamplingMethod::Random { subsample } => write!(f, "RANDOM({subsample:.2})"),
            SamplingMethod::Goss { alpha, beta } => write!(f, "GOSS({alpha:.2}, {beta:.2})"),
            SamplingMethod::Selgb { ratio } => write!(f, "SELGB({ratio:.2})"),
        }
    }
}

/// Selected rows plus the gradient amplification applied to some of them.
#[derive(Debug, Clone)]
pub struct IterationSample {
    /// Sorted selected row indices.
    pub rows: Vec<RowIdx>,
    /// `(row, factor)` pairs the caller must apply to the gradient buffer.
    pub amplification: Vec<(RowIdx, f32)>,
}

impl IterationSample {
    fn all_rows(n_rows: usize) -> Self {
        Self { rows: (0..n_rows as RowIdx).collect(), amplification: Vec::new() }
    }

    /// True when every row was kept.
    pub fn is_full(&self, n_rows: usize) -> bool {
        self.rows.len() == n_rows
    }
}

// =============================================================================
// Sampling
// =============================================================================

/// Draw the training slice of one iteration.
pub fn sample_iteration(
    method: SamplingMethod,
    n_rows: usize,
    gradients: &GradientBuffer,
    ranking: Option<&RankingGroups>,
    rng: &mut Xoshiro256PlusPlus,
) -> Result<IterationSample> {
    match method {
        SamplingMethod::None => Ok(IterationSample::all_rows(n_rows)),
        SamplingMethod::Random { subsample } => {
            if !(0.0..=1.0).contains(&subsample) || subsample == 0.0 {
                return Err(Error::invalid_argument(format!(
                    "subsample must be in (0, 1], got {subsample}"
                )));
            }
            if subsample >= 1.0 {
                return Ok(IterationSample::all_rows(n_rows));
            }
            let sample_size = ((n_rows as f64 * subsample as f64).ceil() as usize).max(1);
            let mut rows: Vec<RowIdx> = (0..n_rows as RowIdx).collect();
            // Partial Fisher-Yates.
            for i in 0..sample_size {
                let j = rng.gen_range(i..n_rows);
                rows.swap(i, j);
            }
            rows.truncate(sample_size);
            rows.sort_unstable();
            Ok(IterationSample { rows, amplification: Vec::new() })
        }
        SamplingMethod::Goss { alpha, beta } => {
            if !(0.0..=1.0).contains(&alpha) || !(0.0..=1.0).contains(&beta) || beta == 0.0 {
                return Err(Error::invalid_argument(format!(
                    "GOSS rates must be in (0, 1], got alpha={alpha} beta={beta}"
                )));
            }
            let mut by_magnitude: Vec<(RowIdx, f32)> = (0..n_rows)
                .map(|row| (row as RowIdx, gradients.abs_gradient(row)))
                .collect();
            by_magnitude.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });

            let top_count = ((n_rows as f64 * alpha as f64).ceil() as usize).clamp(1, n_rows);
            let rest = n_rows - top_count;
            let mut rows: Vec<RowIdx> =
                by_magnitude[..top_count].iter().map(|&(row, _)| row).collect();
            let mut amplification = Vec::new();
            if rest > 0 {
                let keep = ((rest as f64 * beta as f64).ceil() as usize).min(rest);
                let mut rest_rows: Vec<RowIdx> =
                    by_magnitude[top_count..].iter().map(|&(row, _)| row).collect();
                for i in 0..keep {
                    let j = rng.gen_range(i..rest_rows.len());
                    rest_rows.swap(i, j);
                }
                let factor = (1.0 - alpha) / beta;
                for &row in &rest_rows[..keep] {
                    rows.push(row);
                    amplification.push((row, factor));
                }
            }
            rows.sort_unstable();
            amplification.sort_unstable_by_key(|&(row, _)| row);
            Ok(IterationSample { rows, amplification })
        }
        SamplingMethod::Selgb { ratio } => {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(Error::invalid_argument(format!(
                    "SELGB ratio must be in [0, 1], got {ratio}"
                )));
            }
            let ranking = ranking.ok_or_else(|| {
                Error::invalid_argument("SELGB sampling requires a ranking task")
            })?;
            let mut rows: Vec<RowIdx> = Vec::new();
            let mut negatives: Vec<(RowIdx, f32)> = Vec::new();
            for group in ranking.groups() {
                negatives.clear();
                for item in &group.items {
                    if item.relevance > 0.0 {
                        rows.push(item.example_idx);
                    } else {
                        negatives.push((
                            item.example_idx,
                            gradients.abs_gradient(item.example_idx as usize),
                        ));
                    }
                }
                // Hardest negatives first.
                negatives.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(&b.0))
                });
                let keep = ((negatives.len() as f64 * ratio as f64).ceil()) as usize;
                rows.extend(negatives.iter().take(keep).map(|&(row, _)| row));
            }
            rows.sort_unstable();
            Ok(IterationSample { rows, amplification: Vec::new() })
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ranking::RankingGroups;
    use crate::testing;
    use rand::SeedableRng;

    fn gradient_buffer(gradients: &[f32]) -> GradientBuffer {
        let mut buffer = GradientBuffer::new(gradients.len(), 1);
        buffer.grad_mut(0).copy_from_slice(gradients);
        buffer
    }

    #[test]
    fn none_keeps_every_row() {
        let gradients = gradient_buffer(&[1.0; 10]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let sample =
            sample_iteration(SamplingMethod::None, 10, &gradients, None, &mut rng).unwrap();
        assert!(sample.is_full(10));
        assert!(sample.amplification.is_empty());
    }

    #[test]
    fn random_samples_the_requested_fraction() {
        let gradients = gradient_buffer(&[1.0; 100]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let sample = sample_iteration(
            SamplingMethod::Random { subsample: 0.5 },
            100,
            &gradients,
            None,
            &mut rng,
        )
        .unwrap();
        assert_eq!(sample.rows.len(), 50);
        assert!(sample.rows.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn random_is_reproducible_per_seed() {
        let gradients = gradient_buffer(&[1.0; 50]);
        let method = SamplingMethod::Random { subsample: 0.4 };
        let first = {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);
            sample_iteration(method, 50, &gradients, None, &mut rng).unwrap()
        };
        let second = {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);
            sample_iteration(method, 50, &gradients, None, &mut rng).unwrap()
        };
        assert_eq!(first.rows, second.rows);
    }

    #[test]
    fn goss_keeps_large_gradients_and_amplifies_the_rest() {
        let gradients =
            gradient_buffer(&[0.1, 0.2, -9.0, 0.3, 8.0, 0.1, -0.2, 0.4, 0.1, 0.2]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let sample = sample_iteration(
            SamplingMethod::Goss { alpha: 0.2, beta: 0.25 },
            10,
            &gradients,
            None,
            &mut rng,
        )
        .unwrap();
        // Rows 2 and 4 carry the largest |gradient| and must be kept.
        assert!(sample.rows.contains(&2));
        assert!(sample.rows.contains(&4));
        // Kept rest rows are amplified by (1 - 0.2) / 0.25 = 3.2.
        for &(row, factor) in &sample.amplification {
            assert_ne!(row, 2);
            assert_ne!(row, 4);
            assert!((factor - 3.2).abs() < 1e-6);
        }
        assert_eq!(sample.rows.len(), 2 + 2);
    }

    #[test]
    fn selgb_keeps_positives_and_hardest_negatives() {
        let dataset = testing::ranking_dataset();
        let index = RankingGroups::build(&dataset, 0, 1).unwrap();
        // Negatives are rows 2 and 5 (relevance 0); give row 5 the larger
        // gradient.
        let gradients = gradient_buffer(&[0.0, 0.0, 0.1, 0.0, 0.0, 0.9]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let sample = sample_iteration(
            SamplingMethod::Selgb { ratio: 0.5 },
            6,
            &gradients,
            Some(&index),
            &mut rng,
        )
        .unwrap();
        // All four positive rows, plus ceil(1 * 0.5) = 1 negative per group.
        assert!(sample.rows.contains(&0));
        assert!(sample.rows.contains(&1));
        assert!(sample.rows.contains(&3));
        assert!(sample.rows.contains(&4));
        assert!(sample.rows.contains(&2));
        assert!(sample.rows.contains(&5));
    }

    #[test]
    fn selgb_without_ranking_index_fails() {
        let gradients = gradient_buffer(&[1.0; 4]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        assert!(sample_iteration(
            SamplingMethod::Selgb { ratio: 0.5 },
            4,
            &gradients,
            None,
            &mut rng,
        )
        .is_err());
    }

    #[test]
    fn invalid_rates_are_rejected() {
        let gradients = gradient_buffer(&[1.0; 4]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        assert!(sample_iteration(
            SamplingMethod::Random { subsample: 0.0 },
            4,
            &gradients,
            None,
            &mut rng,
        )
        .is_err());
        assert!(sample_iteration(
            SamplingMethod::Goss { alpha: 0.5, beta: 0.0 },
            4,
            &gradients,
            None,
            &mut rng,
        )
        .is_err());
    }
}
