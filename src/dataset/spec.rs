//! Dataspec: the typed schema of a tabular dataset.
//!
//! A [`DataSpec`] is an ordered list of [`ColumnSpec`]s. Each column carries
//! its semantic type, missing-value count, and type-dependent metadata:
//! numerical columns store distribution statistics, categorical columns store
//! a string-to-index dictionary with the reserved out-of-vocabulary index 0.
//!
//! The dataspec is produced by the inference pass (see [`crate::dataset::infer`])
//! and frozen before training starts.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reserved categorical index for unknown or pruned tokens.
pub const OOV_INDEX: i32 = 0;

/// Token displayed for the out-of-vocabulary item.
pub const OOV_TOKEN: &str = "<OOV>";

/// Sentinel for a missing categorical value in a columnar dataset.
pub const MISSING_CATEGORICAL: i32 = -1;

// =============================================================================
// Column types
// =============================================================================

/// Semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// Continuous numeric values stored as `f32` (missing = NaN).
    Numerical,
    /// Dictionary-encoded values stored as `i32` indices.
    Categorical,
    /// Sets of dictionary-encoded values, one sorted index list per row.
    CategoricalSet,
    /// {0, 1} values stored as `i8` (missing = -1).
    Boolean,
    /// 64-bit hashes, used for ranking group keys.
    Hash,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Numerical => "NUMERICAL",
            ColumnType::Categorical => "CATEGORICAL",
            ColumnType::CategoricalSet => "CATEGORICAL_SET",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Hash => "HASH",
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "NUMERICAL" => Ok(ColumnType::Numerical),
            "CATEGORICAL" => Ok(ColumnType::Categorical),
            "CATEGORICAL_SET" => Ok(ColumnType::CategoricalSet),
            "BOOLEAN" => Ok(ColumnType::Boolean),
            "HASH" => Ok(ColumnType::Hash),
            other => Err(Error::invalid_argument(format!(
                "unknown column type \"{other}\""
            ))),
        }
    }
}

// =============================================================================
// Numerical statistics
// =============================================================================

/// Distribution statistics of a numerical column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericalStats {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

// =============================================================================
// Categorical dictionary
// =============================================================================

/// One entry of a categorical dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictItem {
    pub token: String,
    pub frequency: u64,
}

/// String-to-index dictionary of a categorical column.
///
/// Index 0 is always the out-of-vocabulary item; tokens pruned by frequency
/// or vocabulary-size limits collapse into it. The dictionary is immutable
/// once training starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DictPayload", into = "DictPayload")]
pub struct CategoricalDict {
    items: Vec<DictItem>,
    /// Token lookup, rebuilt after deserialization. Never serialized so the
    /// on-disk form stays byte-stable.
    index: HashMap<String, i32>,
    pub is_already_integerized: bool,
}

/// Serialized form of [`CategoricalDict`] without the derived lookup table.
#[derive(Clone, Serialize, Deserialize)]
struct DictPayload {
    items: Vec<DictItem>,
    is_already_integerized: bool,
}

impl From<DictPayload> for CategoricalDict {
    fn from(payload: DictPayload) -> Self {
        let mut dict = CategoricalDict {
            items: payload.items,
            index: HashMap::new(),
            is_already_integerized: payload.is_already_integerized,
        };
        dict.rebuild_index();
        dict
    }
}

impl From<CategoricalDict> for DictPayload {
    fn from(dict: CategoricalDict) -> Self {
        DictPayload {
            items: dict.items,
            is_already_integerized: dict.is_already_integerized,
        }
    }
}

impl CategoricalDict {
    /// Build a dictionary from token frequencies.
    ///
    /// Tokens below `min_frequency` or beyond `max_vocab_count` are pruned
    /// and their counts folded into the OOV item. Surviving tokens are
    /// ordered by decreasing frequency, ties broken alphabetically, so the
    /// dictionary is deterministic for a given input.
    pub fn from_frequencies(
        frequencies: &HashMap<String, u64>,
        min_frequency: u64,
        max_vocab_count: usize,
    ) -> Self {
        let mut sorted: Vec<(&String, u64)> =
            frequencies.iter().map(|(t, &f)| (t, f)).collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let mut items = vec![DictItem { token: OOV_TOKEN.to_string(), frequency: 0 }];
        for (token, frequency) in sorted {
            if frequency < min_frequency || items.len() > max_vocab_count {
                items[0].frequency += frequency;
            } else {
                items.push(DictItem { token: token.clone(), frequency });
            }
        }

        let mut dict = CategoricalDict {
            items,
            index: HashMap::new(),
            is_already_integerized: false,
        };
        dict.rebuild_index();
        dict
    }

    /// Build an already-integerized dictionary covering indices `0..n`.
    pub fn integerized(number_of_unique_values: usize) -> Self {
        let items = (0..number_of_unique_values)
            .map(|value| DictItem {
                token: if value == 0 { OOV_TOKEN.to_string() } else { value.to_string() },
                frequency: 0,
            })
            .collect();
        let mut dict = CategoricalDict {
            items,
            index: HashMap::new(),
            is_already_integerized: true,
        };
        dict.rebuild_index();
        dict
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .skip(1)
            .map(|(idx, item)| (item.token.clone(), idx as i32))
            .collect();
    }

    /// Number of unique values, OOV included. Always >= 1.
    pub fn number_of_unique_values(&self) -> usize {
        self.items.len()
    }

    /// Index of a token; unknown tokens map to [`OOV_INDEX`].
    pub fn index_of(&self, token: &str) -> i32 {
        self.index.get(token).copied().unwrap_or(OOV_INDEX)
    }

    /// Token of an index.
    pub fn token_of(&self, index: i32) -> &str {
        self.items
            .get(index.max(0) as usize)
            .map(|item| item.token.as_str())
            .unwrap_or(OOV_TOKEN)
    }

    pub fn items(&self) -> &[DictItem] {
        &self.items
    }
}

// =============================================================================
// Column spec
// =============================================================================

/// Descriptor of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub col_type: ColumnType,
    /// True when the type was forced by a dataspec guide rather than inferred.
    pub is_manual_type: bool,
    pub count_missing: u64,
    pub numerical: Option<NumericalStats>,
    pub categorical: Option<CategoricalDict>,
}

impl ColumnSpec {
    pub fn numerical(name: impl Into<String>, stats: NumericalStats) -> Self {
        Self {
            name: name.into(),
            col_type: ColumnType::Numerical,
            is_manual_type: false,
            count_missing: 0,
            numerical: Some(stats),
            categorical: None,
        }
    }

    pub fn categorical(name: impl Into<String>, dict: CategoricalDict) -> Self {
        Self {
            name: name.into(),
            col_type: ColumnType::Categorical,
            is_manual_type: false,
            count_missing: 0,
            numerical: None,
            categorical: Some(dict),
        }
    }

    pub fn categorical_set(name: impl Into<String>, dict: CategoricalDict) -> Self {
        Self {
            name: name.into(),
            col_type: ColumnType::CategoricalSet,
            is_manual_type: false,
            count_missing: 0,
            numerical: None,
            categorical: Some(dict),
        }
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            col_type: ColumnType::Boolean,
            is_manual_type: false,
            count_missing: 0,
            numerical: None,
            categorical: None,
        }
    }

    pub fn hash(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            col_type: ColumnType::Hash,
            is_manual_type: false,
            count_missing: 0,
            numerical: None,
            categorical: None,
        }
    }

    /// Dictionary of a categorical or categorical-set column.
    pub fn dict(&self) -> Result<&CategoricalDict> {
        self.categorical.as_ref().ok_or_else(|| {
            Error::invalid_argument(format!(
                "column \"{}\" has no categorical dictionary",
                self.name
            ))
        })
    }

    /// Mean recorded in the numerical statistics, 0 when absent.
    pub fn mean(&self) -> f64 {
        self.numerical.as_ref().map(|s| s.mean).unwrap_or(0.0)
    }
}

// =============================================================================
// Dataspec
// =============================================================================

/// Ordered list of column descriptors. The schema of a dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSpec {
    pub columns: Vec<ColumnSpec>,
}

impl DataSpec {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, idx: usize) -> Result<&ColumnSpec> {
        self.columns.get(idx).ok_or_else(|| {
            Error::invalid_argument(format!("column index {idx} out of range"))
        })
    }

    /// Index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_index_or_err(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            Error::invalid_argument(format!("no column named \"{name}\" in the dataspec"))
        })
    }

    /// Check the structural invariants of the spec.
    pub fn validate(&self) -> Result<()> {
        for column in &self.columns {
            match column.col_type {
                ColumnType::Categorical | ColumnType::CategoricalSet => {
                    let dict = column.dict()?;
                    if dict.number_of_unique_values() < 1 {
                        return Err(Error::internal(format!(
                            "column \"{}\" has an empty dictionary",
                            column.name
                        )));
                    }
                    if dict.token_of(OOV_INDEX) != OOV_TOKEN && !dict.is_already_integerized {
                        return Err(Error::internal(format!(
                            "column \"{}\" does not reserve index 0 for OOV",
                            column.name
                        )));
                    }
                }
                ColumnType::Numerical => {
                    if column.numerical.is_none() {
                        return Err(Error::internal(format!(
                            "numerical column \"{}\" is missing its statistics",
                            column.name
                        )));
                    }
                }
                ColumnType::Boolean | ColumnType::Hash => {}
            }
        }
        Ok(())
    }

    /// Serialize to a file.
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let bytes = postcard::to_allocvec(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Deserialize from a file written by [`DataSpec::save`].
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let spec: DataSpec = postcard::from_bytes(&bytes)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Human-readable description, printed by `show_dataspec`.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Number of columns: {}", self.columns.len());
        for (idx, column) in self.columns.iter().enumerate() {
            let _ = write!(out, "  {}: \"{}\" {}", idx, column.name, column.col_type.as_str());
            if column.is_manual_type {
                let _ = write!(out, " manual");
            }
            if column.count_missing > 0 {
                let _ = write!(out, " num-missing:{}", column.count_missing);
            }
            match column.col_type {
                ColumnType::Numerical => {
                    if let Some(stats) = &column.numerical {
                        let _ = write!(
                            out,
                            " mean:{:.6} std-dev:{:.6} min:{:.6} max:{:.6}",
                            stats.mean, stats.std_dev, stats.min, stats.max
                        );
                    }
                }
                ColumnType::Categorical | ColumnType::CategoricalSet => {
                    if let Some(dict) = &column.categorical {
                        let _ = write!(
                            out,
                            " vocab-size:{} (OOV reserved)",
                            dict.number_of_unique_values()
                        );
                        if dict.is_already_integerized {
                            let _ = write!(out, " integerized");
                        }
                    }
                }
                ColumnType::Boolean | ColumnType::Hash => {}
            }
            let _ = writeln!(out);
        }
        out
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn frequencies(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
        pairs.iter().map(|(t, f)| (t.to_string(), *f)).collect()
    }

    #[test]
    fn dict_reserves_oov_at_zero() {
        let dict = CategoricalDict::from_frequencies(&frequencies(&[("a", 3), ("b", 2)]), 1, 100);
        assert_eq!(dict.number_of_unique_values(), 3);
        assert_eq!(dict.token_of(0), OOV_TOKEN);
        assert_eq!(dict.index_of("a"), 1);
        assert_eq!(dict.index_of("b"), 2);
        assert_eq!(dict.index_of("zzz"), OOV_INDEX);
    }

    #[test]
    fn dict_orders_by_frequency_then_token() {
        let dict = CategoricalDict::from_frequencies(
            &frequencies(&[("x", 2), ("a", 2), ("b", 5)]),
            1,
            100,
        );
        assert_eq!(dict.token_of(1), "b");
        assert_eq!(dict.token_of(2), "a");
        assert_eq!(dict.token_of(3), "x");
    }

    #[test]
    fn dict_prunes_rare_tokens_into_oov() {
        let dict = CategoricalDict::from_frequencies(
            &frequencies(&[("common", 10), ("rare", 1)]),
            2,
            100,
        );
        assert_eq!(dict.number_of_unique_values(), 2);
        assert_eq!(dict.index_of("rare"), OOV_INDEX);
        assert_eq!(dict.items()[0].frequency, 1);
    }

    #[test]
    fn dict_respects_max_vocab_count() {
        let dict = CategoricalDict::from_frequencies(
            &frequencies(&[("a", 5), ("b", 4), ("c", 3)]),
            1,
            2,
        );
        // OOV + 2 kept tokens; "c" folded into OOV.
        assert_eq!(dict.number_of_unique_values(), 3);
        assert_eq!(dict.index_of("c"), OOV_INDEX);
    }

    #[test]
    fn dict_roundtrips_through_serde() {
        let dict = CategoricalDict::from_frequencies(&frequencies(&[("a", 3), ("b", 2)]), 1, 100);
        let bytes = postcard::to_allocvec(&dict).unwrap();
        let loaded: CategoricalDict = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(loaded, dict);
        // The lookup table must be rebuilt on load.
        assert_eq!(loaded.index_of("b"), 2);
    }

    #[test]
    fn spec_column_lookup() {
        let spec = DataSpec::new(vec![
            ColumnSpec::numerical("x", NumericalStats::default()),
            ColumnSpec::boolean("flag"),
        ]);
        assert_eq!(spec.column_index("x"), Some(0));
        assert_eq!(spec.column_index("flag"), Some(1));
        assert_eq!(spec.column_index("nope"), None);
        assert!(spec.column_index_or_err("nope").is_err());
    }

    #[test]
    fn spec_validation_rejects_missing_stats() {
        let mut spec = DataSpec::new(vec![ColumnSpec::numerical("x", NumericalStats::default())]);
        spec.columns[0].numerical = None;
        assert!(spec.validate().is_err());
    }
}
