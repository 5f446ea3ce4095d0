//! Categorical splits.
//!
//! Three algorithms:
//! - CART: order categories by mean target and scan prefix cuts; exact for
//!   binary classification, regression, and ranking. For M >= 3 classes the
//!   same ordering is applied per class (one-vs-rest) and the best cut over
//!   all orderings wins.
//! - ONE_HOT: try `attribute == category` for every present category.
//! - RANDOM: score random category subsets, a Monte-Carlo CART.
//!
//! Missing values count as the OOV category; the stored missing direction
//! is the side the OOV category lands on.

use fixedbitset::FixedBitSet;
use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::dataset::{RowIdx, OOV_INDEX};
use crate::error::Result;
use crate::tree::split::score::{sides_large_enough, split_score, SplitTargets, TargetStats};
use crate::tree::split::{SplitCandidate, SplitterInputs};
use crate::tree::{CategoricalAlgorithm, Condition};

/// Per-category statistics of the node's examples.
fn category_stats(
    inputs: &SplitterInputs<'_>,
    selected: &[RowIdx],
    feature: u32,
    num_categories: usize,
) -> Result<Vec<TargetStats>> {
    let values = inputs.dataset.categorical(feature as usize)?;
    let weighted = !inputs.weights.is_empty();
    let mut stats = vec![TargetStats::empty_for(&inputs.targets); num_categories];
    for &row in selected {
        let value = values[row as usize];
        let category = if value < 0 { OOV_INDEX } else { value } as usize;
        if category >= num_categories {
            continue;
        }
        let weight = if weighted { inputs.weights[row as usize] as f64 } else { 1.0 };
        stats[category].add(row as usize, &inputs.targets, weight);
    }
    Ok(stats)
}

/// Mask over the given categories.
fn mask_of(categories: &[usize], num_categories: usize) -> FixedBitSet {
    let mut mask = FixedBitSet::with_capacity(num_categories);
    for &category in categories {
        mask.insert(category);
    }
    mask
}

/// Build a candidate from the positive-category set.
fn candidate_from_mask(
    inputs: &SplitterInputs<'_>,
    parent: &TargetStats,
    stats: &[TargetStats],
    positive_categories: &[usize],
    feature: u32,
) -> Option<SplitCandidate> {
    let mut pos = TargetStats::empty_for(&inputs.targets);
    for &category in positive_categories {
        pos.merge(&stats[category]);
    }
    let neg = parent.subtract(&pos);
    if !sides_large_enough(
        &neg,
        &pos,
        inputs.params.min_examples,
        !inputs.weights.is_empty(),
        inputs.params.in_split_min_examples_check,
    ) {
        return None;
    }
    let score = split_score(parent, &neg, &pos, &inputs.params.gain)?;
    let mask = mask_of(positive_categories, stats.len());
    let missing_to_positive = mask.contains(OOV_INDEX as usize);
    Some(SplitCandidate {
        condition: Condition::ContainsMask { attribute: feature, mask },
        missing_to_positive,
        score,
        neg_stats: neg,
        pos_stats: pos,
    })
}

/// Best prefix cut after ordering categories by `key`.
fn best_prefix_cut(
    inputs: &SplitterInputs<'_>,
    parent: &TargetStats,
    stats: &[TargetStats],
    present: &[usize],
    key: impl Fn(&TargetStats) -> f64,
    feature: u32,
) -> Option<SplitCandidate> {
    let mut ordered: Vec<usize> = present.to_vec();
    ordered.sort_by(|&a, &b| {
        key(&stats[a])
            .partial_cmp(&key(&stats[b]))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });

    let mut best: Option<SplitCandidate> = None;
    // The suffix of the ordering is the positive (high-mean) side.
    for cut in 1..ordered.len() {
        let candidate = candidate_from_mask(inputs, parent, stats, &ordered[cut..], feature);
        if let Some(candidate) = candidate {
            if best.as_ref().map(|b| candidate.score > b.score).unwrap_or(true) {
                best = Some(candidate);
            }
        }
    }
    best
}

/// Best categorical split of one feature over the node's examples.
pub(crate) fn find_split(
    inputs: &SplitterInputs<'_>,
    selected: &[RowIdx],
    parent: &TargetStats,
    feature: u32,
    rng: &mut Xoshiro256PlusPlus,
) -> Result<Option<SplitCandidate>> {
    let num_categories = inputs
        .dataset
        .spec()
        .column(feature as usize)?
        .dict()?
        .number_of_unique_values();
    let stats = category_stats(inputs, selected, feature, num_categories)?;
    let present: Vec<usize> = (0..num_categories).filter(|&c| stats[c].count() > 0).collect();
    if present.len() < 2 {
        return Ok(None);
    }
    let l2_categorical = inputs.params.gain.l2_categorical_regularization as f64;

    let best = match inputs.params.categorical {
        CategoricalAlgorithm::Cart => {
            match inputs.targets {
                SplitTargets::Classification { num_classes, .. } if num_classes > 3 => {
                    // One-vs-rest ordering per class; best cut over all
                    // orderings.
                    let mut best: Option<SplitCandidate> = None;
                    for class in 1..num_classes {
                        let candidate = best_prefix_cut(
                            inputs,
                            parent,
                            &stats,
                            &present,
                            |s| s.class_ratio(class, l2_categorical),
                            feature,
                        );
                        if let Some(candidate) = candidate {
                            if best.as_ref().map(|b| candidate.score > b.score).unwrap_or(true)
                            {
                                best = Some(candidate);
                            }
                        }
                    }
                    best
                }
                _ => best_prefix_cut(
                    inputs,
                    parent,
                    &stats,
                    &present,
                    |s| s.mean_target(l2_categorical),
                    feature,
                ),
            }
        }
        CategoricalAlgorithm::OneHot => {
            let mut best: Option<SplitCandidate> = None;
            for &category in &present {
                let candidate =
                    candidate_from_mask(inputs, parent, &stats, &[category], feature);
                if let Some(candidate) = candidate {
                    if best.as_ref().map(|b| candidate.score > b.score).unwrap_or(true) {
                        best = Some(candidate);
                    }
                }
            }
            best
        }
        CategoricalAlgorithm::Random { max_num_trials } => {
            let mut best: Option<SplitCandidate> = None;
            for _ in 0..max_num_trials {
                let subset: Vec<usize> =
                    present.iter().copied().filter(|_| rng.gen_bool(0.5)).collect();
                if subset.is_empty() || subset.len() == present.len() {
                    continue;
                }
                let candidate = candidate_from_mask(inputs, parent, &stats, &subset, feature);
                if let Some(candidate) = candidate {
                    if best.as_ref().map(|b| candidate.score > b.score).unwrap_or(true) {
                        best = Some(candidate);
                    }
                }
            }
            best
        }
    };
    Ok(best)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::spec::{CategoricalDict, ColumnSpec, DataSpec};
    use crate::dataset::DatasetBuilder;
    use crate::tree::TreeParams;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn dataset(values: &[&str]) -> crate::dataset::VerticalDataset {
        let mut frequencies = HashMap::new();
        for value in values {
            *frequencies.entry(value.to_string()).or_insert(0) += 1;
        }
        let spec = DataSpec::new(vec![ColumnSpec::categorical(
            "c",
            CategoricalDict::from_frequencies(&frequencies, 1, 100),
        )]);
        let mut builder = DatasetBuilder::new(spec);
        for value in values {
            builder.push_value(0, value).unwrap();
        }
        builder.build().unwrap()
    }

    fn run(
        values: &[&str],
        labels: &[f32],
        algorithm: CategoricalAlgorithm,
    ) -> Option<SplitCandidate> {
        let dataset = dataset(values);
        let targets = SplitTargets::Regression { values: labels };
        let params = TreeParams {
            min_examples: 1,
            categorical: algorithm,
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
        let selected: Vec<RowIdx> = (0..values.len() as u64).collect();
        let parent = TargetStats::from_examples(&targets, selected.iter().copied(), &[]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        find_split(&inputs, &selected, &parent, 0, &mut rng).unwrap()
    }

    #[test]
    fn cart_separates_by_mean_target() {
        let split = run(
            &["a", "a", "b", "b", "c", "c"],
            &[0.0, 0.0, 0.0, 0.0, 10.0, 10.0],
            CategoricalAlgorithm::Cart,
        )
        .unwrap();
        match &split.condition {
            Condition::ContainsMask { mask, .. } => {
                // "c" alone on the positive side.
                let positives: Vec<usize> = mask.ones().collect();
                assert_eq!(positives.len(), 1);
            }
            other => panic!("unexpected condition {other:?}"),
        }
        assert_eq!(split.pos_stats.count(), 2);
    }

    #[test]
    fn one_hot_tries_single_categories() {
        let split = run(
            &["a", "a", "b", "b"],
            &[0.0, 0.0, 10.0, 10.0],
            CategoricalAlgorithm::OneHot,
        )
        .unwrap();
        match &split.condition {
            Condition::ContainsMask { mask, .. } => {
                assert_eq!(mask.ones().count(), 1);
            }
            other => panic!("unexpected condition {other:?}"),
        }
    }

    #[test]
    fn random_finds_a_useful_subset() {
        let split = run(
            &["a", "a", "b", "b", "c", "c"],
            &[0.0, 0.0, 10.0, 10.0, 10.0, 10.0],
            CategoricalAlgorithm::Random { max_num_trials: 64 },
        )
        .unwrap();
        assert!(split.score > 0.0);
    }

    #[test]
    fn single_category_yields_no_split() {
        assert!(run(&["a", "a", "a"], &[0.0, 1.0, 2.0], CategoricalAlgorithm::Cart).is_none());
    }

    #[test]
    fn missing_direction_follows_oov_side() {
        let dataset = {
            let mut frequencies = HashMap::new();
            frequencies.insert("a".to_string(), 2);
            frequencies.insert("b".to_string(), 2);
            let spec = DataSpec::new(vec![ColumnSpec::categorical(
                "c",
                CategoricalDict::from_frequencies(&frequencies, 1, 100),
            )]);
            let mut builder = DatasetBuilder::new(spec);
            for value in ["a", "a", "b", "b", "", ""] {
                builder.push_value(0, value).unwrap();
            }
            builder.build().unwrap()
        };
        let labels = [0.0f32, 0.0, 10.0, 10.0, 0.0, 0.0];
        let targets = SplitTargets::Regression { values: &labels };
        let params = TreeParams { min_examples: 1, ..Default::default() };
        let inputs = SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0],
            params: &params,
            presort: None,
        };
        let selected: Vec<RowIdx> = (0..6).collect();
        let parent = TargetStats::from_examples(&targets, selected.iter().copied(), &[]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let split = find_split(&inputs, &selected, &parent, 0, &mut rng)
            .unwrap()
            .unwrap();
        // Missing rows counted as OOV (low target) land on the negative
        // side, so the stored direction is negative.
        assert!(!split.missing_to_positive);
    }
}
