//! Split finding.
//!
//! For one node, scores candidate conditions over the node's example subset
//! across numerical, categorical, and categorical-set features, plus sparse
//! oblique projections when enabled. Candidate features are drawn uniformly
//! without replacement; ties between candidates break on higher score, then
//! fewer attributes, then lower feature index.

pub mod categorical;
pub mod catset;
pub mod numerical;
pub mod oblique;
pub mod score;

pub use numerical::PresortIndex;
pub use score::{l1_threshold, SplitTargets, TargetStats};

use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::dataset::{ColumnType, RowIdx, VerticalDataset};
use crate::error::Result;
use crate::tree::split::score::{sides_large_enough, split_score};
use crate::tree::{Condition, SplitAxis, TreeParams};

// =============================================================================
// Inputs and outputs
// =============================================================================

/// Everything the split finder needs besides the node itself.
pub struct SplitterInputs<'a> {
    pub dataset: &'a VerticalDataset,
    pub targets: SplitTargets<'a>,
    /// Per-row weights; empty means uniform.
    pub weights: &'a [f32],
    /// Features the model may split on.
    pub input_features: &'a [u32],
    pub params: &'a TreeParams,
    pub presort: Option<&'a PresortIndex>,
}

/// The best condition found for a node, with the statistics of both sides.
#[derive(Debug, Clone)]
pub struct SplitCandidate {
    pub condition: Condition,
    pub missing_to_positive: bool,
    pub score: f64,
    pub neg_stats: TargetStats,
    pub pos_stats: TargetStats,
}

// =============================================================================
// Candidate feature sampling
// =============================================================================

/// Number of features examined in a node.
fn num_candidates(params: &TreeParams, num_features: usize, classification: bool) -> usize {
    if params.num_candidate_attributes_ratio > 0.0 {
        let k = (params.num_candidate_attributes_ratio as f64 * num_features as f64).ceil();
        return (k as usize).clamp(1, num_features);
    }
    match params.num_candidate_attributes {
        0 => {
            if classification {
                (num_features as f64).sqrt().ceil() as usize
            } else {
                (num_features / 3).max(1)
            }
        }
        k if k < 0 => num_features,
        k => (k as usize).min(num_features),
    }
    .clamp(1, num_features)
}

/// Draw `k` features uniformly without replacement (partial Fisher-Yates).
fn sample_features(features: &[u32], k: usize, rng: &mut Xoshiro256PlusPlus) -> Vec<u32> {
    let mut pool: Vec<u32> = features.to_vec();
    let k = k.min(pool.len());
    for i in 0..k {
        let j = rng.gen_range(i..pool.len());
        pool.swap(i, j);
    }
    pool.truncate(k);
    pool
}

// =============================================================================
// IsMissing conditions
// =============================================================================

/// Split on value presence, considered when `allow_na_conditions` is set.
fn find_na_split(
    inputs: &SplitterInputs<'_>,
    selected: &[RowIdx],
    parent: &TargetStats,
    feature: u32,
) -> Result<Option<SplitCandidate>> {
    let condition = Condition::IsMissing { attribute: feature };
    let weighted = !inputs.weights.is_empty();
    let mut pos = TargetStats::empty_for(&inputs.targets);
    for &row in selected {
        if condition.evaluate(inputs.dataset, row as usize)? == Some(true) {
            let weight = if weighted { inputs.weights[row as usize] as f64 } else { 1.0 };
            pos.add(row as usize, &inputs.targets, weight);
        }
    }
    if pos.count() == 0 || pos.count() == parent.count() {
        return Ok(None);
    }
    let neg = parent.subtract(&pos);
    if !sides_large_enough(
        &neg,
        &pos,
        inputs.params.min_examples,
        weighted,
        inputs.params.in_split_min_examples_check,
    ) {
        return Ok(None);
    }
    let Some(score) = split_score(parent, &neg, &pos, &inputs.params.gain) else {
        return Ok(None);
    };
    Ok(Some(SplitCandidate {
        condition,
        missing_to_positive: true,
        score,
        neg_stats: neg,
        pos_stats: pos,
    }))
}

// =============================================================================
// Entry point
// =============================================================================

/// Whether `candidate` beats `best` under the tie-breaking rules.
fn improves(candidate: &SplitCandidate, best: &Option<SplitCandidate>) -> bool {
    match best {
        None => true,
        Some(best) => {
            if candidate.score != best.score {
                return candidate.score > best.score;
            }
            let by_arity = candidate
                .condition
                .num_attributes()
                .cmp(&best.condition.num_attributes());
            if by_arity != std::cmp::Ordering::Equal {
                return by_arity == std::cmp::Ordering::Less;
            }
            candidate.condition.attribute() < best.condition.attribute()
        }
    }
}

/// Find the best condition for one node, or `None` when no viable split
/// exists.
pub fn find_best_split(
    inputs: &SplitterInputs<'_>,
    selected: &[RowIdx],
    parent: &TargetStats,
    rng: &mut Xoshiro256PlusPlus,
) -> Result<Option<SplitCandidate>> {
    if selected.len() < 2 {
        return Ok(None);
    }
    let classification = matches!(inputs.targets, SplitTargets::Classification { .. });
    let k = num_candidates(inputs.params, inputs.input_features.len(), classification);
    let candidates = sample_features(inputs.input_features, k, rng);

    // Node membership mask for the presort path.
    let membership = if inputs.params.sorting_strategy == crate::tree::SortingStrategy::Presort
        && inputs.presort.is_some()
    {
        let mut mask = vec![false; inputs.dataset.num_rows() as usize];
        for &row in selected {
            mask[row as usize] = true;
        }
        Some(mask)
    } else {
        None
    };

    let mut best: Option<SplitCandidate> = None;
    for &feature in &candidates {
        let col_type = inputs.dataset.spec().column(feature as usize)?.col_type;
        let candidate = match col_type {
            ColumnType::Numerical | ColumnType::Boolean => numerical::find_split(
                inputs,
                selected,
                membership.as_deref(),
                parent,
                feature,
                rng,
            )?,
            ColumnType::Categorical => {
                categorical::find_split(inputs, selected, parent, feature, rng)?
            }
            ColumnType::CategoricalSet => {
                catset::find_split(inputs, selected, parent, feature, rng)?
            }
            ColumnType::Hash => None,
        };
        if let Some(candidate) = candidate {
            if improves(&candidate, &best) {
                best = Some(candidate);
            }
        }
        if inputs.params.allow_na_conditions {
            if let Some(candidate) = find_na_split(inputs, selected, parent, feature)? {
                if improves(&candidate, &best) {
                    best = Some(candidate);
                }
            }
        }
    }

    if matches!(inputs.params.split_axis, SplitAxis::SparseOblique { .. }) {
        if let Some(candidate) = oblique::find_split(inputs, selected, parent, &candidates, rng)? {
            if improves(&candidate, &best) {
                best = Some(candidate);
            }
        }
    }

    Ok(best)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::spec::{CategoricalDict, ColumnSpec, DataSpec, NumericalStats};
    use crate::dataset::DatasetBuilder;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn mixed_dataset() -> VerticalDataset {
        let mut frequencies = HashMap::new();
        frequencies.insert("a".to_string(), 2);
        frequencies.insert("b".to_string(), 2);
        let spec = DataSpec::new(vec![
            ColumnSpec::numerical("x", NumericalStats { mean: 1.5, ..Default::default() }),
            ColumnSpec::categorical("y", CategoricalDict::from_frequencies(&frequencies, 1, 100)),
        ]);
        let mut builder = DatasetBuilder::new(spec);
        for (x, y) in [("0.0", "a"), ("1.0", "a"), ("2.0", "b"), ("3.0", "b")] {
            builder.push_value(0, x).unwrap();
            builder.push_value(1, y).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn default_candidate_counts() {
        let params = TreeParams::default();
        // Classification: ceil(sqrt(9)) = 3.
        assert_eq!(num_candidates(&params, 9, true), 3);
        // Regression: 9 / 3 = 3.
        assert_eq!(num_candidates(&params, 9, false), 3);
        // Negative selects everything.
        let all = TreeParams { num_candidate_attributes: -1, ..Default::default() };
        assert_eq!(num_candidates(&all, 9, true), 9);
        // Ratio takes precedence.
        let ratio = TreeParams { num_candidate_attributes_ratio: 0.5, ..Default::default() };
        assert_eq!(num_candidates(&ratio, 9, true), 5);
    }

    #[test]
    fn sampling_is_without_replacement() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(17);
        let features = [0u32, 1, 2, 3, 4];
        let sample = sample_features(&features, 3, &mut rng);
        assert_eq!(sample.len(), 3);
        let mut unique = sample.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn best_split_separates_perfectly_separable_data() {
        let dataset = mixed_dataset();
        let labels = [0.0f32, 0.0, 10.0, 10.0];
        let targets = SplitTargets::Regression { values: &labels };
        let params = TreeParams {
            min_examples: 1,
            num_candidate_attributes: -1,
            ..Default::default()
        };
        let inputs = SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0, 1],
            params: &params,
            presort: None,
        };
        let selected: Vec<RowIdx> = (0..4).collect();
        let parent = TargetStats::from_examples(&targets, selected.iter().copied(), &[]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(23);
        let split = find_best_split(&inputs, &selected, &parent, &mut rng)
            .unwrap()
            .unwrap();
        // Both features separate perfectly with equal score; the tie breaks
        // to the lower feature index.
        assert_eq!(split.condition.attribute(), 0);
        assert_eq!(split.neg_stats.count(), 2);
        assert_eq!(split.pos_stats.count(), 2);
    }

    #[test]
    fn na_condition_used_when_missingness_predicts() {
        let spec = DataSpec::new(vec![
            ColumnSpec::numerical("x", NumericalStats { mean: 1.0, ..Default::default() }),
        ]);
        let mut builder = DatasetBuilder::new(spec);
        for x in ["", "", "1.0", "1.0"] {
            builder.push_value(0, x).unwrap();
        }
        let dataset = builder.build().unwrap();
        let labels = [10.0f32, 10.0, 0.0, 0.0];
        let targets = SplitTargets::Regression { values: &labels };
        let params = TreeParams {
            min_examples: 1,
            allow_na_conditions: true,
            num_candidate_attributes: -1,
            ..Default::default()
        };
        let inputs = SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0],
            params: &params,
            presort: None,
        };
        let selected: Vec<RowIdx> = (0..4).collect();
        let parent = TargetStats::from_examples(&targets, selected.iter().copied(), &[]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(29);
        let split = find_best_split(&inputs, &selected, &parent, &mut rng)
            .unwrap()
            .unwrap();
        // The numerical scan cannot separate (all present values equal), the
        // NA condition can.
        assert!(matches!(split.condition, Condition::IsMissing { .. }));
        assert!(split.missing_to_positive);
    }

    #[test]
    fn too_few_examples_yield_no_split() {
        let dataset = mixed_dataset();
        let labels = [0.0f32, 0.0, 10.0, 10.0];
        let targets = SplitTargets::Regression { values: &labels };
        let params = TreeParams::default();
        let inputs = SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0, 1],
            params: &params,
            presort: None,
        };
        let selected: Vec<RowIdx> = vec![0];
        let parent = TargetStats::from_examples(&targets, selected.iter().copied(), &[]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(31);
        assert!(find_best_split(&inputs, &selected, &parent, &mut rng)
            .unwrap()
            .is_none());
    }
}
