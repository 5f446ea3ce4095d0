//! Ranking group index.
//!
//! For ranking tasks a side index groups rows by a group key (a categorical
//! index or a 64-bit hash). Within a group, items are sorted by decreasing
//! ground-truth relevance, ties broken by descending row index. A group may
//! hold at most [`MAX_ITEMS_IN_GROUP`] items; exceeding it is a
//! configuration error.

use std::collections::HashMap;

use crate::dataset::spec::ColumnType;
use crate::dataset::{RowIdx, VerticalDataset};
use crate::error::{Error, Result};
use crate::metric::NdcgCalculator;

/// Maximum number of items in one ranking group. A larger group is almost
/// certainly a dataset-preparation error.
pub const MAX_ITEMS_IN_GROUP: usize = 2000;

/// One item of a ranking group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingItem {
    pub relevance: f32,
    pub example_idx: RowIdx,
}

/// One ranking group: a key and its items, sorted by decreasing relevance.
#[derive(Debug, Clone)]
pub struct RankingGroup {
    pub group_key: u64,
    pub items: Vec<RankingItem>,
}

/// Index of all ranking groups of a dataset.
#[derive(Debug, Clone)]
pub struct RankingGroups {
    groups: Vec<RankingGroup>,
    num_items: u64,
}

impl RankingGroups {
    /// Build the index from the label column and the group column.
    ///
    /// The group column must be CATEGORICAL or HASH; the label column holds
    /// the relevances.
    pub fn build(dataset: &VerticalDataset, label_col: usize, group_col: usize) -> Result<Self> {
        let relevances = dataset.numerical(label_col)?;
        let group_spec = dataset.spec().column(group_col)?;

        let keys: Vec<u64> = match group_spec.col_type {
            ColumnType::Categorical => dataset
                .categorical(group_col)?
                .iter()
                .map(|&v| v.max(0) as u64)
                .collect(),
            ColumnType::Hash => dataset.hash(group_col)?.to_vec(),
            other => {
                return Err(Error::invalid_argument(format!(
                    "ranking group column \"{}\" must be CATEGORICAL or HASH, got {}",
                    group_spec.name,
                    other.as_str()
                )))
            }
        };

        let mut by_key: HashMap<u64, Vec<RankingItem>> = HashMap::new();
        for (row, &key) in keys.iter().enumerate() {
            by_key.entry(key).or_default().push(RankingItem {
                relevance: relevances[row],
                example_idx: row as RowIdx,
            });
        }

        let mut groups = Vec::with_capacity(by_key.len());
        for (group_key, mut items) in by_key {
            items.sort_by(|a, b| {
                b.relevance
                    .partial_cmp(&a.relevance)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.example_idx.cmp(&a.example_idx))
            });
            if items.len() > MAX_ITEMS_IN_GROUP {
                return Err(Error::resource_exhausted(format!(
                    "ranking group {group_key} holds {} items, more than the maximum of {}",
                    items.len(),
                    MAX_ITEMS_IN_GROUP
                )));
            }
            groups.push(RankingGroup { group_key, items });
        }

        // Order groups by their first row for data locality and determinism.
        groups.sort_by(|a, b| {
            let a_first = a.items.first().map(|i| i.example_idx).unwrap_or(0);
            let b_first = b.items.first().map(|i| i.example_idx).unwrap_or(0);
            a_first.cmp(&b_first).then_with(|| a.group_key.cmp(&b.group_key))
        });

        Ok(Self { groups, num_items: dataset.num_rows() })
    }

    pub fn groups(&self) -> &[RankingGroup] {
        &self.groups
    }

    pub fn num_items(&self) -> u64 {
        self.num_items
    }

    /// Weighted mean NDCG at `truncation` over all groups. The weight of a
    /// group is the weight of its first item.
    pub fn ndcg(&self, predictions: &[f32], weights: &[f32], truncation: usize) -> f64 {
        debug_assert_eq!(predictions.len() as u64, self.num_items);
        let calculator = NdcgCalculator::new(truncation);
        let mut sum_weighted = 0.0f64;
        let mut sum_weights = 0.0f64;
        let mut scratch: Vec<(f32, f32)> = Vec::new();
        for group in &self.groups {
            let weight = group
                .items
                .first()
                .map(|item| {
                    if weights.is_empty() { 1.0 } else { weights[item.example_idx as usize] as f64 }
                })
                .unwrap_or(1.0);
            scratch.clear();
            scratch.extend(group.items.iter().map(|item| {
                (predictions[item.example_idx as usize], item.relevance)
            }));
            sum_weighted += weight * calculator.ndcg(&scratch);
            sum_weights += weight;
        }
        if sum_weights > 0.0 { sum_weighted / sum_weights } else { 0.0 }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::spec::{
        CategoricalDict, ColumnSpec, DataSpec, NumericalStats,
    };
    use crate::dataset::DatasetBuilder;
    use approx::assert_relative_eq;
    use std::collections::HashMap as StdHashMap;

    fn ranking_dataset() -> VerticalDataset {
        let mut frequencies = StdHashMap::new();
        frequencies.insert("g1".to_string(), 3);
        frequencies.insert("g2".to_string(), 3);
        let spec = DataSpec::new(vec![
            ColumnSpec::numerical("relevance", NumericalStats::default()),
            ColumnSpec::categorical("group", CategoricalDict::from_frequencies(&frequencies, 1, 100)),
        ]);
        let mut builder = DatasetBuilder::new(spec);
        for (relevance, group) in [
            ("4", "g1"),
            ("2", "g1"),
            ("0", "g1"),
            ("4", "g2"),
            ("2", "g2"),
            ("0", "g2"),
        ] {
            builder.push_value(0, relevance).unwrap();
            builder.push_value(1, group).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn groups_are_sorted_by_decreasing_relevance() {
        let dataset = ranking_dataset();
        let groups = RankingGroups::build(&dataset, 0, 1).unwrap();
        assert_eq!(groups.groups().len(), 2);
        for group in groups.groups() {
            let relevances: Vec<f32> = group.items.iter().map(|i| i.relevance).collect();
            assert_eq!(relevances, vec![4.0, 2.0, 0.0]);
        }
    }

    #[test]
    fn relevance_ties_break_by_descending_row() {
        let mut frequencies = StdHashMap::new();
        frequencies.insert("g".to_string(), 3);
        let spec = DataSpec::new(vec![
            ColumnSpec::numerical("relevance", NumericalStats::default()),
            ColumnSpec::categorical("group", CategoricalDict::from_frequencies(&frequencies, 1, 100)),
        ]);
        let mut builder = DatasetBuilder::new(spec);
        for relevance in ["1", "1", "1"] {
            builder.push_value(0, relevance).unwrap();
            builder.push_value(1, "g").unwrap();
        }
        let dataset = builder.build().unwrap();
        let groups = RankingGroups::build(&dataset, 0, 1).unwrap();
        let rows: Vec<RowIdx> = groups.groups()[0].items.iter().map(|i| i.example_idx).collect();
        assert_eq!(rows, vec![2, 1, 0]);
    }

    #[test]
    fn perfect_predictions_reach_ndcg_one() {
        let dataset = ranking_dataset();
        let groups = RankingGroups::build(&dataset, 0, 1).unwrap();
        let predictions = [3.0, 2.0, 1.0, 3.0, 2.0, 1.0];
        assert_relative_eq!(groups.ndcg(&predictions, &[], 5), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn group_column_must_be_categorical_or_hash() {
        let spec = DataSpec::new(vec![
            ColumnSpec::numerical("relevance", NumericalStats::default()),
            ColumnSpec::numerical("group", NumericalStats::default()),
        ]);
        let mut builder = DatasetBuilder::new(spec);
        builder.push_value(0, "1.0").unwrap();
        builder.push_value(1, "1.0").unwrap();
        let dataset = builder.build().unwrap();
        assert!(RankingGroups::build(&dataset, 0, 1).is_err());
    }
}
