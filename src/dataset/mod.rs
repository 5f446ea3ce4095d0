//! Typed columnar dataset and its schema.
//!
//! The [`VerticalDataset`] stores one fixed-length vector per column, parallel
//! to its [`DataSpec`]. All columns share the same row count; a row is
//! identified by a `u64` index into every column. The dataset is loaded once
//! and read-only during training.

pub mod csv;
pub mod infer;
pub mod path;
pub mod ranking;
pub mod spec;

pub use spec::{
    CategoricalDict, ColumnSpec, ColumnType, DataSpec, NumericalStats, DictItem,
    MISSING_CATEGORICAL, OOV_INDEX, OOV_TOKEN,
};

use crate::error::{Error, Result};

/// Row identifier: an index into every column of a dataset.
pub type RowIdx = u64;

// =============================================================================
// Column storage
// =============================================================================

/// Storage of one column, parallel to its [`ColumnSpec`].
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// Missing encoded as a quiet NaN.
    Numerical(Vec<f32>),
    /// Missing encoded as [`MISSING_CATEGORICAL`].
    Categorical(Vec<i32>),
    /// Sorted index lists, possibly empty.
    CategoricalSet(Vec<Vec<i32>>),
    /// Missing encoded as -1.
    Boolean(Vec<i8>),
    Hash(Vec<u64>),
}

impl ColumnData {
    fn empty_for(col_type: ColumnType) -> Self {
        match col_type {
            ColumnType::Numerical => ColumnData::Numerical(Vec::new()),
            ColumnType::Categorical => ColumnData::Categorical(Vec::new()),
            ColumnType::CategoricalSet => ColumnData::CategoricalSet(Vec::new()),
            ColumnType::Boolean => ColumnData::Boolean(Vec::new()),
            ColumnType::Hash => ColumnData::Hash(Vec::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            ColumnData::Numerical(v) => v.len(),
            ColumnData::Categorical(v) => v.len(),
            ColumnData::CategoricalSet(v) => v.len(),
            ColumnData::Boolean(v) => v.len(),
            ColumnData::Hash(v) => v.len(),
        }
    }
}

// =============================================================================
// Vertical dataset
// =============================================================================

/// In-memory columnar dataset.
#[derive(Debug, Clone)]
pub struct VerticalDataset {
    spec: DataSpec,
    columns: Vec<ColumnData>,
    num_rows: u64,
}

impl VerticalDataset {
    pub fn spec(&self) -> &DataSpec {
        &self.spec
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Values of a numerical column.
    pub fn numerical(&self, col: usize) -> Result<&[f32]> {
        match self.columns.get(col) {
            Some(ColumnData::Numerical(values)) => Ok(values),
            _ => Err(self.wrong_type(col, "NUMERICAL")),
        }
    }

    /// Values of a categorical column.
    pub fn categorical(&self, col: usize) -> Result<&[i32]> {
        match self.columns.get(col) {
            Some(ColumnData::Categorical(values)) => Ok(values),
            _ => Err(self.wrong_type(col, "CATEGORICAL")),
        }
    }

    /// Values of a categorical-set column.
    pub fn categorical_set(&self, col: usize) -> Result<&[Vec<i32>]> {
        match self.columns.get(col) {
            Some(ColumnData::CategoricalSet(values)) => Ok(values),
            _ => Err(self.wrong_type(col, "CATEGORICAL_SET")),
        }
    }

    /// Values of a boolean column.
    pub fn boolean(&self, col: usize) -> Result<&[i8]> {
        match self.columns.get(col) {
            Some(ColumnData::Boolean(values)) => Ok(values),
            _ => Err(self.wrong_type(col, "BOOLEAN")),
        }
    }

    /// Values of a hash column.
    pub fn hash(&self, col: usize) -> Result<&[u64]> {
        match self.columns.get(col) {
            Some(ColumnData::Hash(values)) => Ok(values),
            _ => Err(self.wrong_type(col, "HASH")),
        }
    }

    pub fn column_data(&self, col: usize) -> Result<&ColumnData> {
        self.columns
            .get(col)
            .ok_or_else(|| Error::invalid_argument(format!("column index {col} out of range")))
    }

    fn wrong_type(&self, col: usize, expected: &str) -> Error {
        let name = self
            .spec
            .columns
            .get(col)
            .map(|c| c.name.as_str())
            .unwrap_or("<out of range>");
        Error::invalid_argument(format!(
            "column {col} (\"{name}\") is not of type {expected}"
        ))
    }

    /// New dataset containing only `rows`, in the given order.
    pub fn extract_rows(&self, rows: &[RowIdx]) -> VerticalDataset {
        let columns = self
            .columns
            .iter()
            .map(|column| match column {
                ColumnData::Numerical(v) => {
                    ColumnData::Numerical(rows.iter().map(|&r| v[r as usize]).collect())
                }
                ColumnData::Categorical(v) => {
                    ColumnData::Categorical(rows.iter().map(|&r| v[r as usize]).collect())
                }
                ColumnData::CategoricalSet(v) => ColumnData::CategoricalSet(
                    rows.iter().map(|&r| v[r as usize].clone()).collect(),
                ),
                ColumnData::Boolean(v) => {
                    ColumnData::Boolean(rows.iter().map(|&r| v[r as usize]).collect())
                }
                ColumnData::Hash(v) => {
                    ColumnData::Hash(rows.iter().map(|&r| v[r as usize]).collect())
                }
            })
            .collect();
        VerticalDataset {
            spec: self.spec.clone(),
            columns,
            num_rows: rows.len() as u64,
        }
    }

    /// New dataset with one column's rows rearranged by `permutation`
    /// (`new[row] = old[permutation[row]]`). Used by permutation variable
    /// importances.
    pub fn with_permuted_column(&self, col: usize, permutation: &[RowIdx]) -> VerticalDataset {
        debug_assert_eq!(permutation.len() as u64, self.num_rows);
        let mut permuted = self.clone();
        permuted.columns[col] = match &self.columns[col] {
            ColumnData::Numerical(v) => {
                ColumnData::Numerical(permutation.iter().map(|&r| v[r as usize]).collect())
            }
            ColumnData::Categorical(v) => {
                ColumnData::Categorical(permutation.iter().map(|&r| v[r as usize]).collect())
            }
            ColumnData::CategoricalSet(v) => ColumnData::CategoricalSet(
                permutation.iter().map(|&r| v[r as usize].clone()).collect(),
            ),
            ColumnData::Boolean(v) => {
                ColumnData::Boolean(permutation.iter().map(|&r| v[r as usize]).collect())
            }
            ColumnData::Hash(v) => {
                ColumnData::Hash(permutation.iter().map(|&r| v[r as usize]).collect())
            }
        };
        permuted
    }

    /// Per-row weights from an optional weight column. Empty column name or
    /// `None` yields uniform weights of 1.
    pub fn weights(&self, weight_col: Option<usize>) -> Result<Vec<f32>> {
        let n = self.num_rows as usize;
        match weight_col {
            None => Ok(vec![1.0; n]),
            Some(col) => {
                let values = self.numerical(col)?;
                for (row, &w) in values.iter().enumerate() {
                    if !w.is_finite() || w < 0.0 {
                        return Err(Error::invalid_argument(format!(
                            "invalid weight {w} at row {row}"
                        )));
                    }
                }
                Ok(values.to_vec())
            }
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Row-by-row builder for a [`VerticalDataset`].
///
/// Values are pushed as raw string tokens and decoded through the dataspec:
/// numerical parsing, dictionary lookup (unknown tokens collapse to OOV),
/// whitespace tokenization for set columns.
pub struct DatasetBuilder {
    spec: DataSpec,
    columns: Vec<ColumnData>,
    invalid_tokens: Vec<String>,
}

/// Tokens treated as a missing value on load.
pub const DEFAULT_MISSING_TOKENS: &[&str] =
    &["", "NA", "na", "null", "NULL", "n/a", "N/A", "nan", "NaN", "?"];

impl DatasetBuilder {
    pub fn new(spec: DataSpec) -> Self {
        let columns = spec
            .columns
            .iter()
            .map(|c| ColumnData::empty_for(c.col_type))
            .collect();
        Self {
            spec,
            columns,
            invalid_tokens: DEFAULT_MISSING_TOKENS.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn is_missing(&self, token: &str) -> bool {
        self.invalid_tokens.iter().any(|t| t == token)
    }

    /// Append one value to column `col`.
    pub fn push_value(&mut self, col: usize, token: &str) -> Result<()> {
        let spec = self.spec.column(col)?.clone();
        let missing = self.is_missing(token);
        match &mut self.columns[col] {
            ColumnData::Numerical(values) => {
                if missing {
                    values.push(f32::NAN);
                } else {
                    let parsed: f32 = token.parse().map_err(|_| {
                        Error::invalid_argument(format!(
                            "cannot parse \"{token}\" as a number for column \"{}\"",
                            spec.name
                        ))
                    })?;
                    values.push(if parsed.is_finite() { parsed } else { f32::NAN });
                }
            }
            ColumnData::Categorical(values) => {
                if missing {
                    values.push(MISSING_CATEGORICAL);
                } else {
                    values.push(spec.dict()?.index_of(token));
                }
            }
            ColumnData::CategoricalSet(values) => {
                if missing {
                    values.push(Vec::new());
                } else {
                    let dict = spec.dict()?;
                    let mut items: Vec<i32> =
                        token.split_whitespace().map(|t| dict.index_of(t)).collect();
                    items.sort_unstable();
                    items.dedup();
                    values.push(items);
                }
            }
            ColumnData::Boolean(values) => {
                if missing {
                    values.push(-1);
                } else {
                    let value = match token {
                        "0" | "false" | "FALSE" | "False" => 0,
                        "1" | "true" | "TRUE" | "True" => 1,
                        other => {
                            return Err(Error::invalid_argument(format!(
                                "cannot parse \"{other}\" as a boolean for column \"{}\"",
                                spec.name
                            )))
                        }
                    };
                    values.push(value);
                }
            }
            ColumnData::Hash(values) => {
                let hashed = if missing { 0 } else { hash_token(token) };
                values.push(hashed);
            }
        }
        Ok(())
    }

    /// Finish the build, checking that every column has the same row count.
    pub fn build(self) -> Result<VerticalDataset> {
        let num_rows = self.columns.first().map(|c| c.len()).unwrap_or(0);
        for (idx, column) in self.columns.iter().enumerate() {
            if column.len() != num_rows {
                return Err(Error::internal(format!(
                    "column {idx} has {} rows, expected {num_rows}",
                    column.len()
                )));
            }
        }
        Ok(VerticalDataset {
            spec: self.spec,
            columns: self.columns,
            num_rows: num_rows as u64,
        })
    }
}

/// Stable 64-bit FNV-1a hash for group keys.
pub fn hash_token(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

// =============================================================================
// Tests
// =============================================================================
