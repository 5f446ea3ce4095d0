//! Categorical-set splits.
//!
//! Greedy forward selection: start with every category in the negative set
//! and repeatedly move the category with the largest score gain to the
//! positive set, stopping when no move improves the score. Per node, each
//! category enters the candidate pool with probability
//! `categorical_set_greedy_sampling`; the pool is clamped to
//! `categorical_set_max_num_items` by node frequency.

use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::dataset::RowIdx;
use crate::error::Result;
use crate::tree::split::score::{sides_large_enough, split_score, TargetStats};
use crate::tree::split::{SplitCandidate, SplitterInputs};
use crate::tree::Condition;

/// Best categorical-set split of one feature over the node's examples.
pub(crate) fn find_split(
    inputs: &SplitterInputs<'_>,
    selected: &[RowIdx],
    parent: &TargetStats,
    feature: u32,
    rng: &mut Xoshiro256PlusPlus,
) -> Result<Option<SplitCandidate>> {
    let values = inputs.dataset.categorical_set(feature as usize)?;
    let weighted = !inputs.weights.is_empty();

    // Rows (as positions into `selected`) per category, and node frequency.
    let mut rows_per_category: Vec<(i32, Vec<usize>)> = Vec::new();
    for (position, &row) in selected.iter().enumerate() {
        for &category in &values[row as usize] {
            match rows_per_category.binary_search_by_key(&category, |(c, _)| *c) {
                Ok(found) => rows_per_category[found].1.push(position),
                Err(insert_at) => {
                    rows_per_category.insert(insert_at, (category, vec![position]))
                }
            }
        }
    }
    if rows_per_category.len() < 2 {
        return Ok(None);
    }

    // Sample the candidate pool, then clamp by frequency.
    let sampling = inputs.params.categorical_set_greedy_sampling as f64;
    let mut pool: Vec<usize> = (0..rows_per_category.len())
        .filter(|_| rng.gen_bool(sampling.clamp(0.0, 1.0)))
        .collect();
    if pool.is_empty() {
        return Ok(None);
    }
    pool.sort_by(|&a, &b| {
        rows_per_category[b]
            .1
            .len()
            .cmp(&rows_per_category[a].1.len())
            .then_with(|| rows_per_category[a].0.cmp(&rows_per_category[b].0))
    });
    pool.truncate(inputs.params.categorical_set_max_num_items as usize);

    // Greedy forward selection.
    let mut in_positive_rows = vec![false; selected.len()];
    let mut positive_categories: Vec<i32> = Vec::new();
    let mut pos_stats = TargetStats::empty_for(&inputs.targets);
    let mut current_score = f64::NEG_INFINITY;
    let mut best_candidate: Option<SplitCandidate> = None;

    loop {
        let mut best_move: Option<(usize, f64, TargetStats)> = None;
        for &pool_idx in &pool {
            let (category, rows) = &rows_per_category[pool_idx];
            if positive_categories.contains(category) {
                continue;
            }
            // Stats gained by moving this category's not-yet-positive rows.
            let mut trial_pos = pos_stats.clone();
            let mut moved = 0usize;
            for &position in rows {
                if in_positive_rows[position] {
                    continue;
                }
                let row = selected[position] as usize;
                let weight = if weighted { inputs.weights[row] as f64 } else { 1.0 };
                trial_pos.add(row, &inputs.targets, weight);
                moved += 1;
            }
            if moved == 0 {
                continue;
            }
            let trial_neg = parent.subtract(&trial_pos);
            if !sides_large_enough(
                &trial_neg,
                &trial_pos,
                inputs.params.min_examples,
                weighted,
                inputs.params.in_split_min_examples_check,
            ) {
                continue;
            }
            let Some(score) = split_score(parent, &trial_neg, &trial_pos, &inputs.params.gain)
            else {
                continue;
            };
            if score > current_score
                && best_move.as_ref().map(|(_, s, _)| score > *s).unwrap_or(true)
            {
                best_move = Some((pool_idx, score, trial_pos));
            }
        }

        let Some((pool_idx, score, trial_pos)) = best_move else {
            break;
        };
        let (category, rows) = &rows_per_category[pool_idx];
        for &position in rows {
            in_positive_rows[position] = true;
        }
        positive_categories.push(*category);
        pos_stats = trial_pos;
        current_score = score;

        let neg_stats = parent.subtract(&pos_stats);
        let mut positive = positive_categories.clone();
        positive.sort_unstable();
        let negative: Vec<i32> = rows_per_category
            .iter()
            .map(|(c, _)| *c)
            .filter(|c| !positive.contains(c))
            .collect();
        best_candidate = Some(SplitCandidate {
            condition: Condition::ContainsSet { attribute: feature, positive, negative },
            missing_to_positive: false,
            score,
            neg_stats,
            pos_stats: pos_stats.clone(),
        });
    }

    Ok(best_candidate)
}

// =============================================================================
// Tests
// =============================================================================
