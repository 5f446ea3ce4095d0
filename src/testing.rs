//! Small synthetic datasets shared by unit and integration tests.

use std::collections::HashMap;

use crate::dataset::spec::{CategoricalDict, ColumnSpec, DataSpec, NumericalStats};
use crate::dataset::{DatasetBuilder, VerticalDataset};

fn dict_from(tokens: &[&str]) -> CategoricalDict {
    let mut frequencies: HashMap<String, u64> = HashMap::new();
    for token in tokens {
        *frequencies.entry(token.to_string()).or_insert(0) += 1;
    }
    CategoricalDict::from_frequencies(&frequencies, 1, 2000)
}

/// The four-row dataset D₁: `x` numerical 0..3, `y` in {a, a, b, b}.
pub fn dataset_d1() -> VerticalDataset {
    dataset_with_labels(&["a", "a", "b", "b"])
}

/// `x` numerical (the row index) and a categorical label column `y`.
pub fn dataset_with_labels(labels: &[&str]) -> VerticalDataset {
    let n = labels.len();
    let mean = (0..n).map(|i| i as f64).sum::<f64>() / n as f64;
    let spec = DataSpec::new(vec![
        ColumnSpec::numerical(
            "x",
            NumericalStats { mean, std_dev: 1.0, min: 0.0, max: (n - 1) as f64 },
        ),
        ColumnSpec::categorical("y", dict_from(labels)),
    ]);
    let mut builder = DatasetBuilder::new(spec);
    for (row, label) in labels.iter().enumerate() {
        builder.push_value(0, &format!("{row}")).unwrap();
        builder.push_value(1, label).unwrap();
    }
    builder.build().unwrap()
}

/// Like [`dataset_with_labels`], but the label dictionary covers `vocab`
/// even when some tokens never occur in `labels`.
pub fn dataset_with_label_vocab(vocab: &[&str], labels: &[&str]) -> VerticalDataset {
    let n = labels.len();
    let mean = (0..n).map(|i| i as f64).sum::<f64>() / n as f64;
    let spec = DataSpec::new(vec![
        ColumnSpec::numerical(
            "x",
            NumericalStats { mean, std_dev: 1.0, min: 0.0, max: (n - 1) as f64 },
        ),
        ColumnSpec::categorical("y", dict_from(vocab)),
    ]);
    let mut builder = DatasetBuilder::new(spec);
    for (row, label) in labels.iter().enumerate() {
        builder.push_value(0, &format!("{row}")).unwrap();
        builder.push_value(1, label).unwrap();
    }
    builder.build().unwrap()
}

/// `x` numerical (the row index) and a numerical label column `y`.
pub fn regression_dataset(labels: &[f32]) -> VerticalDataset {
    let n = labels.len();
    let mean = (0..n).map(|i| i as f64).sum::<f64>() / n as f64;
    let spec = DataSpec::new(vec![
        ColumnSpec::numerical(
            "x",
            NumericalStats { mean, std_dev: 1.0, min: 0.0, max: (n - 1) as f64 },
        ),
        ColumnSpec::numerical("y", NumericalStats::default()),
    ]);
    let mut builder = DatasetBuilder::new(spec);
    for (row, label) in labels.iter().enumerate() {
        builder.push_value(0, &format!("{row}")).unwrap();
        builder.push_value(1, &format!("{label}")).unwrap();
    }
    builder.build().unwrap()
}

fn ranking(relevances: &[f32], groups: &[&str]) -> VerticalDataset {
    let mean = relevances.iter().map(|&r| r as f64).sum::<f64>() / relevances.len() as f64;
    let spec = DataSpec::new(vec![
        ColumnSpec::numerical("relevance", NumericalStats::default()),
        ColumnSpec::categorical("group", dict_from(groups)),
        // One input feature, perfectly aligned with the relevance.
        ColumnSpec::numerical("f", NumericalStats { mean, std_dev: 1.0, min: 0.0, max: 4.0 }),
    ]);
    let mut builder = DatasetBuilder::new(spec);
    for (relevance, group) in relevances.iter().zip(groups) {
        builder.push_value(0, &format!("{relevance}")).unwrap();
        builder.push_value(1, group).unwrap();
        builder.push_value(2, &format!("{relevance}")).unwrap();
    }
    builder.build().unwrap()
}

/// Two ranking groups of three items with relevances [4, 2, 0] each.
/// Column 0 is the relevance, column 1 the group key.
pub fn ranking_dataset() -> VerticalDataset {
    ranking(&[4.0, 2.0, 0.0, 4.0, 2.0, 0.0], &["g1", "g1", "g1", "g2", "g2", "g2"])
}

/// One group where every item shares the same relevance.
pub fn ranking_dataset_constant_relevance() -> VerticalDataset {
    ranking(&[1.0, 1.0, 1.0], &["g", "g", "g"])
}

/// Two singleton groups.
pub fn ranking_dataset_singletons() -> VerticalDataset {
    ranking(&[3.0, 1.0], &["g1", "g2"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn d1_has_the_documented_shape() {
        let dataset = dataset_d1();
        assert_eq!(dataset.num_rows(), 4);
        assert_eq!(dataset.numerical(0).unwrap(), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(dataset.categorical(1).unwrap(), &[1, 1, 2, 2]);
    }

    #[test]
    fn ranking_dataset_has_two_groups() {
        let dataset = ranking_dataset();
        let groups =
            crate::dataset::ranking::RankingGroups::build(&dataset, 0, 1).unwrap();
        assert_eq!(groups.groups().len(), 2);
    }
}
