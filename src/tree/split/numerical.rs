//! Numerical splits.
//!
//! Candidate thresholds are midpoints between successive distinct values of
//! the node's examples. Two sorting strategies are supported: IN_NODE sorts
//! the node subset per feature, PRESORT reuses one precomputed permutation
//! per feature and filters it by node membership.
//!
//! Missing values are substituted according to the missing-value policy
//! before scanning, so the chosen threshold also fixes the direction stored
//! for inference.

use std::collections::HashMap;

use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::dataset::{ColumnType, RowIdx, VerticalDataset};
use crate::error::Result;
use crate::tree::split::score::{sides_large_enough, split_score, SplitTargets, TargetStats};
use crate::tree::split::{SplitCandidate, SplitterInputs};
use crate::tree::{numeric_value, Condition, MissingValuePolicy};

// =============================================================================
// Presort index
// =============================================================================

/// One permutation per numerical feature, sorting all rows by value with
/// missing values last. Built once per training; costs O(F·N) memory.
#[derive(Debug, Clone)]
pub struct PresortIndex {
    per_feature: HashMap<u32, Vec<u32>>,
}

impl PresortIndex {
    pub fn build(dataset: &VerticalDataset, features: &[u32]) -> Result<Self> {
        let mut per_feature = HashMap::new();
        for &feature in features {
            let col = feature as usize;
            let col_type = dataset.spec().column(col)?.col_type;
            if !matches!(col_type, ColumnType::Numerical | ColumnType::Boolean) {
                continue;
            }
            let n = dataset.num_rows() as usize;
            let mut order: Vec<u32> = (0..n as u32).collect();
            let keys: Vec<f32> = (0..n)
                .map(|row| numeric_value(dataset, col, row).map(|v| v.unwrap_or(f32::INFINITY)))
                .collect::<Result<_>>()?;
            order.sort_by(|&a, &b| {
                keys[a as usize]
                    .partial_cmp(&keys[b as usize])
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.cmp(&b))
            });
            per_feature.insert(feature, order);
        }
        Ok(Self { per_feature })
    }

    pub fn order(&self, feature: u32) -> Option<&[u32]> {
        self.per_feature.get(&feature).map(|v| v.as_slice())
    }
}

// =============================================================================
// Sorted scan
// =============================================================================

/// Best threshold of a value-sorted example sequence.
pub(crate) struct NumericalScan {
    pub threshold: f32,
    pub score: f64,
    pub neg: TargetStats,
    pub pos: TargetStats,
}

/// Scan `sorted` (ascending by value) for the best midpoint threshold.
pub(crate) fn scan_sorted_values(
    sorted: &[(f32, RowIdx)],
    targets: &SplitTargets<'_>,
    weights: &[f32],
    parent: &TargetStats,
    inputs: &SplitterInputs<'_>,
) -> Option<NumericalScan> {
    if sorted.len() < 2 {
        return None;
    }
    let weighted = !weights.is_empty();
    let mut neg = TargetStats::empty_for(targets);
    let mut best: Option<NumericalScan> = None;

    for window in 0..sorted.len() - 1 {
        let (value, row) = sorted[window];
        let example_weight = if weighted { weights[row as usize] as f64 } else { 1.0 };
        neg.add(row as usize, targets, example_weight);

        let (next_value, _) = sorted[window + 1];
        if next_value <= value {
            continue;
        }
        let pos = parent.subtract(&neg);
        if !sides_large_enough(
            &neg,
            &pos,
            inputs.params.min_examples,
            weighted,
            inputs.params.in_split_min_examples_check,
        ) {
            continue;
        }
        if let Some(score) = split_score(parent, &neg, &pos, &inputs.params.gain) {
            let improves = best.as_ref().map(|b| score > b.score).unwrap_or(true);
            if improves {
                best = Some(NumericalScan {
                    threshold: value + (next_value - value) / 2.0,
                    score,
                    neg: neg.clone(),
                    pos,
                });
            }
        }
    }
    best
}

// =============================================================================
// Per-feature entry point
// =============================================================================

/// Substitution value for missing entries of `feature` in this node.
fn imputed_value(
    inputs: &SplitterInputs<'_>,
    feature: u32,
    present: &[(f32, RowIdx)],
    rng: &mut Xoshiro256PlusPlus,
) -> Result<f32> {
    let global_mean = inputs.dataset.spec().column(feature as usize)?.mean() as f32;
    Ok(match inputs.params.missing_value_policy {
        MissingValuePolicy::GlobalImputation => global_mean,
        MissingValuePolicy::LocalImputation => {
            if present.is_empty() {
                global_mean
            } else {
                let sum: f64 = present.iter().map(|&(v, _)| v as f64).sum();
                (sum / present.len() as f64) as f32
            }
        }
        MissingValuePolicy::RandomLocalImputation => {
            if present.is_empty() {
                global_mean
            } else {
                present[rng.gen_range(0..present.len())].0
            }
        }
    })
}

/// Best numerical split of one feature over the node's examples.
pub(crate) fn find_split(
    inputs: &SplitterInputs<'_>,
    selected: &[RowIdx],
    membership: Option<&[bool]>,
    parent: &TargetStats,
    feature: u32,
    rng: &mut Xoshiro256PlusPlus,
) -> Result<Option<SplitCandidate>> {
    let col = feature as usize;

    // Collect present values and missing rows.
    let mut present: Vec<(f32, RowIdx)> = Vec::with_capacity(selected.len());
    let mut missing: Vec<RowIdx> = Vec::new();

    let presorted = inputs
        .presort
        .filter(|_| inputs.params.sorting_strategy == crate::tree::SortingStrategy::Presort)
        .and_then(|index| index.order(feature));

    match (presorted, membership) {
        (Some(order), Some(mask)) => {
            // PRESORT: walk the global permutation, keep the node's rows.
            // Values come out already sorted; missing rows sort last.
            for &row in order {
                if !mask[row as usize] {
                    continue;
                }
                match numeric_value(inputs.dataset, col, row as usize)? {
                    Some(value) => present.push((value, row as RowIdx)),
                    None => missing.push(row as RowIdx),
                }
            }
        }
        _ => {
            for &row in selected {
                match numeric_value(inputs.dataset, col, row as usize)? {
                    Some(value) => present.push((value, row as RowIdx)),
                    None => missing.push(row as RowIdx),
                }
            }
            present.sort_unstable_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.cmp(&b.1))
            });
        }
    }

    if present.is_empty() {
        return Ok(None);
    }

    let substitute = imputed_value(inputs, feature, &present, rng)?;
    let has_missing = !missing.is_empty();
    if has_missing {
        // Splice the substituted rows at the imputed value's position so the
        // sequence stays sorted.
        let insert_at = present.partition_point(|&(v, _)| v < substitute);
        let block: Vec<(f32, RowIdx)> = missing.iter().map(|&row| (substitute, row)).collect();
        present.splice(insert_at..insert_at, block);
    }

    let Some(scan) = scan_sorted_values(&present, &inputs.targets, inputs.weights, parent, inputs)
    else {
        return Ok(None);
    };

    let direction_value = if has_missing {
        substitute
    } else {
        inputs.dataset.spec().column(col)?.mean() as f32
    };

    Ok(Some(SplitCandidate {
        condition: Condition::HigherThan { attribute: feature, threshold: scan.threshold },
        missing_to_positive: direction_value >= scan.threshold,
        score: scan.score,
        neg_stats: scan.neg,
        pos_stats: scan.pos,
    }))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::spec::{ColumnSpec, DataSpec, NumericalStats};
    use crate::dataset::DatasetBuilder;
    use crate::tree::{SortingStrategy, TreeParams};
    use rand::SeedableRng;

    fn dataset(values: &[&str]) -> VerticalDataset {
        let spec = DataSpec::new(vec![ColumnSpec::numerical(
            "x",
            NumericalStats { mean: 1.5, std_dev: 1.0, min: 0.0, max: 3.0 },
        )]);
        let mut builder = DatasetBuilder::new(spec);
        for value in values {
            builder.push_value(0, value).unwrap();
        }
        builder.build().unwrap()
    }

    fn params() -> TreeParams {
        TreeParams { min_examples: 1, ..Default::default() }
    }

    #[test]
    fn finds_midpoint_threshold() {
        let dataset = dataset(&["0.0", "1.0", "2.0", "3.0"]);
        let labels = [0.0f32, 0.0, 10.0, 10.0];
        let targets = SplitTargets::Regression { values: &labels };
        let tree_params = params();
        let inputs = SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0],
            params: &tree_params,
            presort: None,
        };
        let selected: Vec<RowIdx> = (0..4).collect();
        let parent = TargetStats::from_examples(&targets, selected.iter().copied(), &[]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let split = find_split(&inputs, &selected, None, &parent, 0, &mut rng)
            .unwrap()
            .unwrap();
        match split.condition {
            Condition::HigherThan { threshold, .. } => assert_eq!(threshold, 1.5),
            other => panic!("unexpected condition {other:?}"),
        }
    }

    #[test]
    fn presort_matches_in_node() {
        let dataset = dataset(&["3.0", "0.0", "2.0", "1.0"]);
        let labels = [10.0f32, 0.0, 10.0, 0.0];
        let targets = SplitTargets::Regression { values: &labels };

        let in_node_params = params();
        let selected: Vec<RowIdx> = (0..4).collect();
        let parent = TargetStats::from_examples(&targets, selected.iter().copied(), &[]);

        let inputs = SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0],
            params: &in_node_params,
            presort: None,
        };
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let in_node = find_split(&inputs, &selected, None, &parent, 0, &mut rng)
            .unwrap()
            .unwrap();

        let presort = PresortIndex::build(&dataset, &[0]).unwrap();
        let presort_params = TreeParams {
            sorting_strategy: SortingStrategy::Presort,
            ..params()
        };
        let inputs = SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0],
            params: &presort_params,
            presort: Some(&presort),
        };
        let membership = vec![true; 4];
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let with_presort =
            find_split(&inputs, &selected, Some(&membership), &parent, 0, &mut rng)
                .unwrap()
                .unwrap();

        assert_eq!(in_node.condition, with_presort.condition);
        assert_eq!(in_node.score, with_presort.score);
    }

    #[test]
    fn missing_values_follow_global_imputation() {
        // Mean is 1.5, so the missing row behaves like 1.5 and lands on the
        // positive side of threshold 0.5.
        let dataset = dataset(&["0.0", "", "2.0", "3.0"]);
        let labels = [0.0f32, 10.0, 10.0, 10.0];
        let targets = SplitTargets::Regression { values: &labels };
        let tree_params = params();
        let inputs = SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0],
            params: &tree_params,
            presort: None,
        };
        let selected: Vec<RowIdx> = (0..4).collect();
        let parent = TargetStats::from_examples(&targets, selected.iter().copied(), &[]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let split = find_split(&inputs, &selected, None, &parent, 0, &mut rng)
            .unwrap()
            .unwrap();
        assert!(split.missing_to_positive);
        assert_eq!(split.pos_stats.count(), 3);
    }

    #[test]
    fn min_examples_blocks_small_sides() {
        let dataset = dataset(&["0.0", "1.0", "2.0", "3.0"]);
        let labels = [0.0f32, 10.0, 10.0, 10.0];
        let targets = SplitTargets::Regression { values: &labels };
        let tree_params = TreeParams { min_examples: 2, ..Default::default() };
        let inputs = SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0],
            params: &tree_params,
            presort: None,
        };
        let selected: Vec<RowIdx> = (0..4).collect();
        let parent = TargetStats::from_examples(&targets, selected.iter().copied(), &[]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let split = find_split(&inputs, &selected, None, &parent, 0, &mut rng).unwrap();
        // The best cut (0 vs rest) is blocked; the 2-2 cut survives.
        let split = split.unwrap();
        assert_eq!(split.neg_stats.count(), 2);
        assert_eq!(split.pos_stats.count(), 2);
    }

    #[test]
    fn constant_feature_yields_no_split() {
        let dataset = dataset(&["1.0", "1.0", "1.0", "1.0"]);
        let labels = [0.0f32, 1.0, 0.0, 1.0];
        let targets = SplitTargets::Regression { values: &labels };
        let tree_params = params();
        let inputs = SplitterInputs {
            dataset: &dataset,
            targets,
            weights: &[],
            input_features: &[0],
            params: &tree_params,
            presort: None,
        };
        let selected: Vec<RowIdx> = (0..4).collect();
        let parent = TargetStats::from_examples(&targets, selected.iter().copied(), &[]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        assert!(find_split(&inputs, &selected, None, &parent, 0, &mut rng)
            .unwrap()
            .is_none());
    }
}
