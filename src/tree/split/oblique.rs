//! Sparse oblique splits.
//!
//! Draws `ceil(F ^ num_projections_exponent)` random sparse projections over
//! the node's numerical features. Each coordinate is nonzero with
//! probability `projection_density_factor / F` and carries weight ±1,
//! optionally normalized by the feature's standard deviation or value range.
//! Every projection is scanned with the exact numerical threshold search;
//! ties between projections prefer fewer nonzero weights.

use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::dataset::{ColumnType, RowIdx};
use crate::error::Result;
use crate::tree::split::numerical::scan_sorted_values;
use crate::tree::split::score::TargetStats;
use crate::tree::split::{SplitCandidate, SplitterInputs};
use crate::tree::{numeric_value, Condition, ObliqueNormalization, SplitAxis};

/// One sampled projection: features, weights, and missing replacements.
struct Projection {
    attributes: Vec<u32>,
    weights: Vec<f32>,
    na_replacements: Vec<f32>,
}

fn sample_projection(
    inputs: &SplitterInputs<'_>,
    numerical_features: &[u32],
    density_factor: f32,
    normalization: ObliqueNormalization,
    rng: &mut Xoshiro256PlusPlus,
) -> Result<Projection> {
    let f = numerical_features.len() as f64;
    let density = (density_factor as f64 / f).clamp(0.0, 1.0);

    let mut attributes = Vec::new();
    let mut weights = Vec::new();
    let mut na_replacements = Vec::new();
    for &feature in numerical_features {
        if !rng.gen_bool(density) {
            continue;
        }
        let stats = inputs.dataset.spec().column(feature as usize)?;
        let sign = if rng.gen_bool(0.5) { 1.0f32 } else { -1.0 };
        let scale = match normalization {
            ObliqueNormalization::None => 1.0,
            ObliqueNormalization::StandardDeviation => {
                let std_dev = stats.numerical.as_ref().map(|s| s.std_dev).unwrap_or(0.0);
                if std_dev > 0.0 { 1.0 / std_dev as f32 } else { 1.0 }
            }
            ObliqueNormalization::MinMax => {
                let range = stats
                    .numerical
                    .as_ref()
                    .map(|s| s.max - s.min)
                    .unwrap_or(0.0);
                if range > 0.0 { 1.0 / range as f32 } else { 1.0 }
            }
        };
        attributes.push(feature);
        weights.push(sign * scale);
        na_replacements.push(stats.mean() as f32);
    }
    if attributes.is_empty() {
        // Degenerate draw: force one random coordinate so the projection is
        // never empty.
        let feature = numerical_features[rng.gen_range(0..numerical_features.len())];
        let stats = inputs.dataset.spec().column(feature as usize)?;
        attributes.push(feature);
        weights.push(if rng.gen_bool(0.5) { 1.0 } else { -1.0 });
        na_replacements.push(stats.mean() as f32);
    }
    Ok(Projection { attributes, weights, na_replacements })
}

/// Best oblique split over the node's examples, or `None`.
pub(crate) fn find_split(
    inputs: &SplitterInputs<'_>,
    selected: &[RowIdx],
    parent: &TargetStats,
    candidate_features: &[u32],
    rng: &mut Xoshiro256PlusPlus,
) -> Result<Option<SplitCandidate>> {
    let SplitAxis::SparseOblique {
        num_projections_exponent,
        projection_density_factor,
        normalization,
        max_num_projections,
    } = inputs.params.split_axis
    else {
        return Ok(None);
    };

    let numerical_features: Vec<u32> = candidate_features
        .iter()
        .copied()
        .filter(|&feature| {
            inputs
                .dataset
                .spec()
                .column(feature as usize)
                .map(|c| c.col_type == ColumnType::Numerical)
                .unwrap_or(false)
        })
        .collect();
    if numerical_features.is_empty() {
        return Ok(None);
    }

    let f = numerical_features.len() as f64;
    let num_projections = (f.powf(num_projections_exponent as f64).ceil() as u32)
        .clamp(1, max_num_projections);

    let mut best: Option<SplitCandidate> = None;
    let mut projected: Vec<(f32, RowIdx)> = Vec::with_capacity(selected.len());
    for _ in 0..num_projections {
        let projection = sample_projection(
            inputs,
            &numerical_features,
            projection_density_factor,
            normalization,
            rng,
        )?;

        projected.clear();
        for &row in selected {
            let mut dot = 0.0f32;
            for ((&attribute, &weight), &na) in projection
                .attributes
                .iter()
                .zip(&projection.weights)
                .zip(&projection.na_replacements)
            {
                let value =
                    numeric_value(inputs.dataset, attribute as usize, row as usize)?.unwrap_or(na);
                dot += weight * value;
            }
            projected.push((dot, row));
        }
        projected.sort_unstable_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });

        let Some(scan) =
            scan_sorted_values(&projected, &inputs.targets, inputs.weights, parent, inputs)
        else {
            continue;
        };

        // Missing features are replaced inside the condition, so route an
        // all-missing example by projecting the replacements.
        let na_dot: f32 = projection
            .weights
            .iter()
            .zip(&projection.na_replacements)
            .map(|(w, na)| w * na)
            .sum();

        let candidate = SplitCandidate {
            missing_to_positive: na_dot >= scan.threshold,
            condition: Condition::ObliqueSparse {
                attributes: projection.attributes,
                weights: projection.weights,
                na_replacements: projection.na_replacements,
                threshold: scan.threshold,
            },
            score: scan.score,
            neg_stats: scan.neg,
            pos_stats: scan.pos,
        };
        let replace = match &best {
            None => true,
            Some(current) => {
                candidate.score > current.score
                    || (candidate.score == current.score
                        && candidate.condition.num_attributes()
                            < current.condition.num_attributes())
            }
        };
        if replace {
            best = Some(candidate);
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
    use crate::dataset::spec::{ColumnSpec, DataSpec, NumericalStats};
    use crate::dataset::DatasetBuilder;
    use crate::tree::split::score::SplitTargets;
    use crate::tree::TreeParams;
    use rand::SeedableRng;

    fn dataset() -> crate::dataset::VerticalDataset {
        let spec = DataSpec::new(vec![
            ColumnSpec::numerical("a", NumericalStats { mean: 0.5, std_dev: 0.5, min: 0.0, max: 1.0 }),
            ColumnSpec::numerical("b", NumericalStats { mean: 0.5, std_dev: 0.5, min: 0.0, max: 1.0 }),
        ]);
        let mut builder = DatasetBuilder::new(spec);
        for (a, b) in [("0.0", "0.1"), ("0.2", "0.0"), ("0.9", "1.0"), ("1.0", "0.8")] {
            builder.push_value(0, a).unwrap();
            builder.push_value(1, b).unwrap();
        }
        builder.build().unwrap()
    }

    fn oblique_params(exponent: f32) -> TreeParams {
        TreeParams {
            min_examples: 1,
            split_axis: SplitAxis::SparseOblique {
                num_projections_exponent: exponent,
                projection_density_factor: 2.0,
                normalization: ObliqueNormalization::None,
                max_num_projections: 500,
            },
            ..Default::default()
        }
    }

    #[test]
    fn finds_a_separating_projection() {
        let dataset = dataset();
        let labels = [0.0f32, 0.0, 10.0, 10.0];
        let targets = SplitTargets::Regression { values: &labels };
        let params = oblique_params(2.0);
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

        // The sign draws decide whether a projection separates; over a
        // handful of seeds one of them must.
        let split = (0..10)
            .find_map(|seed| {
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
                find_split(&inputs, &selected, &parent, &[0, 1], &mut rng).unwrap()
            })
            .expect("no projection separated the data");
        match &split.condition {
            Condition::ObliqueSparse { attributes, weights, na_replacements, .. } => {
                assert!(!attributes.is_empty());
                assert_eq!(attributes.len(), weights.len());
                assert_eq!(attributes.len(), na_replacements.len());
            }
            other => panic!("unexpected condition {other:?}"),
        }
        assert!(split.score > 0.0);
    }

    #[test]
    fn axis_aligned_params_return_none() {
        let dataset = dataset();
        let labels = [0.0f32, 0.0, 10.0, 10.0];
        let targets = SplitTargets::Regression { values: &labels };
        let params = TreeParams { min_examples: 1, ..Default::default() };
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
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        assert!(find_split(&inputs, &selected, &parent, &[0, 1], &mut rng)
            .unwrap()
            .is_none());
    }

    #[test]
    fn projection_count_follows_the_exponent() {
        // exponent 1.0 over 2 features: 2 projections, deterministic given
        // the seed; just verify the search completes and is reproducible.
        let dataset = dataset();
        let labels = [0.0f32, 1.0, 2.0, 3.0];
        let targets = SplitTargets::Regression { values: &labels };
        let params = oblique_params(1.0);
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
        let first = {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
            find_split(&inputs, &selected, &parent, &[0, 1], &mut rng).unwrap()
        };
        let second = {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
            find_split(&inputs, &selected, &parent, &[0, 1], &mut rng).unwrap()
        };
        assert_eq!(first.map(|s| s.condition), second.map(|s| s.condition));
    }
}
