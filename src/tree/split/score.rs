//! Split scoring.
//!
//! Target statistics are accumulated in f64 and scored with one of:
//! variance reduction (regression, ranking), Gini (binary classification),
//! information gain (multi-class), or the Newton gain
//! `½[G_L²/(H_L+λ) + G_R²/(H_R+λ) − G²/(H+λ)] − γ` when hessian gain is
//! enabled, with L1 soft-thresholding on the gradient sums.

use crate::tree::GainParams;

// =============================================================================
// Targets
// =============================================================================

/// What a node's split optimizes against.
#[derive(Debug, Clone, Copy)]
pub enum SplitTargets<'a> {
    /// Numeric values: labels for random-forest regression, gradients for
    /// gradient boosting without hessian gain.
    Regression { values: &'a [f32] },
    /// Class labels as categorical indices; `num_classes` counts the OOV
    /// slot.
    Classification { labels: &'a [i32], num_classes: usize },
    /// Per-example gradients and hessians of the boosting loss.
    Newton { gradients: &'a [f32], hessians: &'a [f32] },
}

impl<'a> SplitTargets<'a> {
    /// True when the split score should be the Newton gain.
    pub fn is_newton(&self) -> bool {
        matches!(self, SplitTargets::Newton { .. })
    }
}

/// L1 soft-thresholding.
#[inline]
pub fn l1_threshold(value: f64, l1: f64) -> f64 {
    if value > l1 {
        value - l1
    } else if value < -l1 {
        value + l1
    } else {
        0.0
    }
}

// =============================================================================
// Target statistics
// =============================================================================

/// Accumulated statistics of a set of examples, matching the target kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetStats {
    Regression {
        sum: f64,
        sum_squares: f64,
        weight: f64,
        count: u64,
    },
    Classification {
        class_weights: Vec<f64>,
        weight: f64,
        count: u64,
    },
    Newton {
        sum_gradients: f64,
        sum_hessians: f64,
        weight: f64,
        count: u64,
    },
}

impl TargetStats {
    /// Empty statistics of the shape matching `targets`.
    pub fn empty_for(targets: &SplitTargets<'_>) -> Self {
        match targets {
            SplitTargets::Regression { .. } => TargetStats::Regression {
                sum: 0.0,
                sum_squares: 0.0,
                weight: 0.0,
                count: 0,
            },
            SplitTargets::Classification { num_classes, .. } => TargetStats::Classification {
                class_weights: vec![0.0; *num_classes],
                weight: 0.0,
                count: 0,
            },
            SplitTargets::Newton { .. } => TargetStats::Newton {
                sum_gradients: 0.0,
                sum_hessians: 0.0,
                weight: 0.0,
                count: 0,
            },
        }
    }

    /// Accumulate statistics over a set of examples.
    pub fn from_examples(
        targets: &SplitTargets<'_>,
        examples: impl Iterator<Item = u64>,
        weights: &[f32],
    ) -> Self {
        let mut stats = Self::empty_for(targets);
        for example in examples {
            let weight = if weights.is_empty() { 1.0 } else { weights[example as usize] as f64 };
            stats.add(example as usize, targets, weight);
        }
        stats
    }

    pub fn add(&mut self, example: usize, targets: &SplitTargets<'_>, example_weight: f64) {
        match (self, targets) {
            (
                TargetStats::Regression { sum, sum_squares, weight, count },
                SplitTargets::Regression { values },
            ) => {
                let value = values[example] as f64;
                *sum += example_weight * value;
                *sum_squares += example_weight * value * value;
                *weight += example_weight;
                *count += 1;
            }
            (
                TargetStats::Classification { class_weights, weight, count },
                SplitTargets::Classification { labels, .. },
            ) => {
                let label = labels[example].max(0) as usize;
                if label < class_weights.len() {
                    class_weights[label] += example_weight;
                }
                *weight += example_weight;
                *count += 1;
            }
            (
                TargetStats::Newton { sum_gradients, sum_hessians, weight, count },
                SplitTargets::Newton { gradients, hessians },
            ) => {
                *sum_gradients += example_weight * gradients[example] as f64;
                *sum_hessians += example_weight * hessians[example] as f64;
                *weight += example_weight;
                *count += 1;
            }
            _ => unreachable!("target statistics shape mismatch"),
        }
    }

    pub fn merge(&mut self, other: &TargetStats) {
        match (self, other) {
            (
                TargetStats::Regression { sum, sum_squares, weight, count },
                TargetStats::Regression {
                    sum: other_sum,
                    sum_squares: other_sq,
                    weight: other_weight,
                    count: other_count,
                },
            ) => {
                *sum += other_sum;
                *sum_squares += other_sq;
                *weight += other_weight;
                *count += other_count;
            }
            (
                TargetStats::Classification { class_weights, weight, count },
                TargetStats::Classification {
                    class_weights: other_classes,
                    weight: other_weight,
                    count: other_count,
                },
            ) => {
                for (acc, other_class) in class_weights.iter_mut().zip(other_classes) {
                    *acc += other_class;
                }
                *weight += other_weight;
                *count += other_count;
            }
            (
                TargetStats::Newton { sum_gradients, sum_hessians, weight, count },
                TargetStats::Newton {
                    sum_gradients: other_grad,
                    sum_hessians: other_hess,
                    weight: other_weight,
                    count: other_count,
                },
            ) => {
                *sum_gradients += other_grad;
                *sum_hessians += other_hess;
                *weight += other_weight;
                *count += other_count;
            }
            _ => unreachable!("target statistics shape mismatch"),
        }
    }

    /// `self − other`, used to derive the complement side from the parent.
    pub fn subtract(&self, other: &TargetStats) -> TargetStats {
        match (self, other) {
            (
                TargetStats::Regression { sum, sum_squares, weight, count },
                TargetStats::Regression {
                    sum: other_sum,
                    sum_squares: other_sq,
                    weight: other_weight,
                    count: other_count,
                },
            ) => TargetStats::Regression {
                sum: sum - other_sum,
                sum_squares: sum_squares - other_sq,
                weight: (weight - other_weight).max(0.0),
                count: count.saturating_sub(*other_count),
            },
            (
                TargetStats::Classification { class_weights, weight, count },
                TargetStats::Classification {
                    class_weights: other_classes,
                    weight: other_weight,
                    count: other_count,
                },
            ) => TargetStats::Classification {
                class_weights: class_weights
                    .iter()
                    .zip(other_classes)
                    .map(|(a, b)| (a - b).max(0.0))
                    .collect(),
                weight: (weight - other_weight).max(0.0),
                count: count.saturating_sub(*other_count),
            },
            (
                TargetStats::Newton { sum_gradients, sum_hessians, weight, count },
                TargetStats::Newton {
                    sum_gradients: other_grad,
                    sum_hessians: other_hess,
                    weight: other_weight,
                    count: other_count,
                },
            ) => TargetStats::Newton {
                sum_gradients: sum_gradients - other_grad,
                sum_hessians: sum_hessians - other_hess,
                weight: (weight - other_weight).max(0.0),
                count: count.saturating_sub(*other_count),
            },
            _ => unreachable!("target statistics shape mismatch"),
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            TargetStats::Regression { weight, .. }
            | TargetStats::Classification { weight, .. }
            | TargetStats::Newton { weight, .. } => *weight,
        }
    }

    pub fn count(&self) -> u64 {
        match self {
            TargetStats::Regression { count, .. }
            | TargetStats::Classification { count, .. }
            | TargetStats::Newton { count, .. } => *count,
        }
    }

    /// Ordering key for CART category sorting: the mean target, with the
    /// categorical regularizer biasing the denominator.
    pub fn mean_target(&self, l2_categorical: f64) -> f64 {
        match self {
            TargetStats::Regression { sum, weight, .. } => sum / (weight + l2_categorical),
            TargetStats::Newton { sum_gradients, weight, .. } => {
                sum_gradients / (weight + l2_categorical)
            }
            TargetStats::Classification { class_weights, weight, .. } => {
                // Ratio of the last class; `class_ratio` handles the
                // one-vs-rest orderings of the multi-class case.
                let positive = class_weights.last().copied().unwrap_or(0.0);
                positive / (weight + l2_categorical)
            }
        }
    }

    /// Share of one class, for one-vs-rest category ordering.
    pub fn class_ratio(&self, class: usize, l2_categorical: f64) -> f64 {
        match self {
            TargetStats::Classification { class_weights, weight, .. } => {
                class_weights.get(class).copied().unwrap_or(0.0) / (weight + l2_categorical)
            }
            _ => self.mean_target(l2_categorical),
        }
    }

    /// Impurity of this set under the default score of its target kind.
    fn impurity(&self, multi_class: bool) -> f64 {
        match self {
            TargetStats::Regression { sum, sum_squares, weight, .. } => {
                if *weight > 0.0 {
                    (sum_squares - sum * sum / weight).max(0.0)
                } else {
                    0.0
                }
            }
            TargetStats::Classification { class_weights, weight, .. } => {
                if *weight <= 0.0 {
                    return 0.0;
                }
                if multi_class {
                    // Weighted entropy.
                    -class_weights
                        .iter()
                        .filter(|&&w| w > 0.0)
                        .map(|&w| w * (w / weight).ln())
                        .sum::<f64>()
                } else {
                    // Weighted Gini.
                    weight - class_weights.iter().map(|&w| w * w / weight).sum::<f64>()
                }
            }
            TargetStats::Newton { .. } => 0.0,
        }
    }

    fn newton_objective(&self, gain: &GainParams) -> f64 {
        match self {
            TargetStats::Newton { sum_gradients, sum_hessians, .. } => {
                let g = l1_threshold(*sum_gradients, gain.l1_regularization as f64);
                g * g / (sum_hessians + gain.l2_regularization as f64)
            }
            _ => 0.0,
        }
    }
}

// =============================================================================
// Scores
// =============================================================================

/// Score of splitting `parent` into `neg` and `pos`. Higher is better;
/// `None` means the split is not viable (degenerate side or non-positive
/// gain under the Newton objective's gamma).
pub fn split_score(
    parent: &TargetStats,
    neg: &TargetStats,
    pos: &TargetStats,
    gain: &GainParams,
) -> Option<f64> {
    if neg.count() == 0 || pos.count() == 0 {
        return None;
    }
    let score = match parent {
        TargetStats::Newton { sum_hessians, .. } if gain.use_hessian_gain => {
            let lambda = gain.l2_regularization as f64;
            if sum_hessians + lambda <= 0.0 {
                return None;
            }
            0.5 * (neg.newton_objective(gain) + pos.newton_objective(gain)
                - parent.newton_objective(gain))
                - gain.min_gain as f64
        }
        TargetStats::Newton { .. } => {
            // Newton statistics scored without hessian gain fall back to
            // variance reduction over the gradients.
            let as_regression = |stats: &TargetStats| match stats {
                TargetStats::Newton { sum_gradients, weight, .. } => {
                    if *weight > 0.0 {
                        -(sum_gradients * sum_gradients) / weight
                    } else {
                        0.0
                    }
                }
                _ => 0.0,
            };
            // Impurity up to the constant Σg² term, which cancels in the
            // difference.
            as_regression(parent) - as_regression(neg) - as_regression(pos)
        }
        TargetStats::Classification { class_weights, .. } => {
            let multi_class = class_weights.len() > 3;
            parent.impurity(multi_class) - neg.impurity(multi_class) - pos.impurity(multi_class)
        }
        TargetStats::Regression { .. } => {
            parent.impurity(false) - neg.impurity(false) - pos.impurity(false)
        }
    };
    if score.is_finite() && score > 0.0 {
        Some(score)
    } else {
        None
    }
}

/// Check the `min_examples` constraint on both sides.
///
/// With weighted examples the constraint applies to the side weights,
/// otherwise to the counts. Disabled checks still require non-empty sides.
pub fn sides_large_enough(
    neg: &TargetStats,
    pos: &TargetStats,
    min_examples: u32,
    weighted: bool,
    check_enabled: bool,
) -> bool {
    if neg.count() == 0 || pos.count() == 0 {
        return false;
    }
    if !check_enabled {
        return true;
    }
    if weighted {
        neg.weight() >= min_examples as f64 && pos.weight() >= min_examples as f64
    } else {
        neg.count() >= min_examples as u64 && pos.count() >= min_examples as u64
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn regression_stats(values: &[f32]) -> TargetStats {
        let targets = SplitTargets::Regression { values };
        TargetStats::from_examples(&targets, 0..values.len() as u64, &[])
    }

    #[test]
    fn variance_reduction_of_a_perfect_split() {
        let values = [0.0f32, 0.0, 10.0, 10.0];
        let targets = SplitTargets::Regression { values: &values };
        let parent = TargetStats::from_examples(&targets, 0..4, &[]);
        let neg = TargetStats::from_examples(&targets, 0..2, &[]);
        let pos = parent.subtract(&neg);
        let score = split_score(&parent, &neg, &pos, &GainParams::default()).unwrap();
        // Parent SSE = 100, each side 0.
        assert_relative_eq!(score, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn useless_split_scores_none() {
        let values = [1.0f32, 1.0, 1.0, 1.0];
        let targets = SplitTargets::Regression { values: &values };
        let parent = TargetStats::from_examples(&targets, 0..4, &[]);
        let neg = TargetStats::from_examples(&targets, 0..2, &[]);
        let pos = parent.subtract(&neg);
        assert!(split_score(&parent, &neg, &pos, &GainParams::default()).is_none());
    }

    #[test]
    fn gini_prefers_pure_sides() {
        let labels = [1, 1, 2, 2];
        let targets = SplitTargets::Classification { labels: &labels, num_classes: 3 };
        let parent = TargetStats::from_examples(&targets, 0..4, &[]);
        let pure_neg = TargetStats::from_examples(&targets, 0..2, &[]);
        let pure_pos = parent.subtract(&pure_neg);
        let mixed_neg = TargetStats::from_examples(&targets, [0u64, 2].into_iter(), &[]);
        let mixed_pos = parent.subtract(&mixed_neg);

        let pure = split_score(&parent, &pure_neg, &pure_pos, &GainParams::default()).unwrap();
        let mixed = split_score(&parent, &mixed_neg, &mixed_pos, &GainParams::default());
        assert!(mixed.is_none() || pure > mixed.unwrap());
    }

    #[test]
    fn newton_gain_matches_closed_form() {
        let gradients = [2.0f32, 2.0, -2.0, -2.0];
        let hessians = [1.0f32, 1.0, 1.0, 1.0];
        let targets = SplitTargets::Newton { gradients: &gradients, hessians: &hessians };
        let parent = TargetStats::from_examples(&targets, 0..4, &[]);
        let neg = TargetStats::from_examples(&targets, 0..2, &[]);
        let pos = parent.subtract(&neg);
        let gain = GainParams {
            use_hessian_gain: true,
            l2_regularization: 1.0,
            ..Default::default()
        };
        let score = split_score(&parent, &neg, &pos, &gain).unwrap();
        // 0.5 * (16/3 + 16/3 - 0/5)
        assert_relative_eq!(score, 0.5 * (16.0 / 3.0 + 16.0 / 3.0), epsilon = 1e-9);
    }

    #[test]
    fn l1_thresholding_shrinks_gradient_sums() {
        assert_relative_eq!(l1_threshold(5.0, 2.0), 3.0);
        assert_relative_eq!(l1_threshold(-5.0, 2.0), -3.0);
        assert_relative_eq!(l1_threshold(1.0, 2.0), 0.0);
    }

    #[test]
    fn min_examples_check_by_count_and_weight() {
        let stats = regression_stats(&[1.0, 2.0, 3.0]);
        assert!(sides_large_enough(&stats, &stats, 3, false, true));
        assert!(!sides_large_enough(&stats, &stats, 4, false, true));
        // Weighted: total weight 3.0.
        assert!(sides_large_enough(&stats, &stats, 3, true, true));
        assert!(!sides_large_enough(&stats, &stats, 4, true, true));
        // Disabled check only requires non-empty sides.
        assert!(sides_large_enough(&stats, &stats, 100, false, false));
    }

    #[test]
    fn subtract_recovers_the_complement() {
        let values = [1.0f32, 2.0, 3.0, 4.0];
        let targets = SplitTargets::Regression { values: &values };
        let parent = TargetStats::from_examples(&targets, 0..4, &[]);
        let neg = TargetStats::from_examples(&targets, 0..1, &[]);
        let pos = parent.subtract(&neg);
        let direct = TargetStats::from_examples(&targets, 1..4, &[]);
        assert_relative_eq!(pos.weight(), direct.weight());
        assert_eq!(pos.count(), direct.count());
    }
}
