//! Dataspec inference.
//!
//! Streams the input dataset once to infer each column's semantic type, then
//! a second time to fill its statistics. A [`DataSpecGuide`] can force types
//! and override vocabulary limits per column; the first matching guide wins.
//!
//! Type rules, in order:
//! 1. a guide match forces the type;
//! 2. all non-missing tokens in {0, 1, true, false} (with at least one
//!    textual form) infer BOOLEAN;
//! 3. all non-missing tokens parsing as finite reals infer NUMERICAL;
//! 4. everything else infers CATEGORICAL, with the dictionary pruned by
//!    `min_vocab_frequency` and `max_vocab_count`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::dataset::path::TypedPath;
use crate::dataset::spec::{
    CategoricalDict, ColumnSpec, ColumnType, DataSpec, NumericalStats,
};
use crate::dataset::DEFAULT_MISSING_TOKENS;
use crate::error::{Error, Result};

// =============================================================================
// Kahan summation
// =============================================================================

/// Compensated accumulator so means survive large row counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct KahanAccumulator {
    sum: f64,
    compensation: f64,
}

impl KahanAccumulator {
    pub fn add(&mut self, value: f64) {
        let y = value - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }

    pub fn total(&self) -> f64 {
        self.sum
    }
}

// =============================================================================
// Dataspec guide
// =============================================================================

/// Per-column override in a [`DataSpecGuide`].
#[derive(Debug, Clone)]
pub struct ColumnGuide {
    /// Regex matched against the column name.
    pub column_pattern: String,
    pub col_type: Option<ColumnType>,
    pub max_vocab_count: Option<usize>,
    pub min_vocab_frequency: Option<u64>,
    pub is_already_integerized: bool,
}

/// Inference overrides: a list of `(regex, type, overrides)` rules plus
/// global defaults. The first rule whose regex matches a column name wins.
#[derive(Debug, Clone)]
pub struct DataSpecGuide {
    pub columns: Vec<ColumnGuide>,
    pub ignored_columns: Vec<String>,
    pub default_max_vocab_count: usize,
    pub default_min_vocab_frequency: u64,
}

impl Default for DataSpecGuide {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            ignored_columns: Vec::new(),
            default_max_vocab_count: 2000,
            default_min_vocab_frequency: 1,
        }
    }
}

impl DataSpecGuide {
    /// Parse the line-oriented guide format.
    ///
    /// ```text
    /// max_vocab_count: 2000
    /// min_vocab_frequency: 1
    /// ignore: ^debug_.*$
    /// column: ^tags$ CATEGORICAL_SET min_vocab_frequency=2
    /// column: ^group$ HASH
    /// ```
    pub fn from_text(text: &str) -> Result<Self> {
        let mut guide = Self::default();
        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                Error::invalid_argument(format!("guide line {} is not key: value", line_no + 1))
            })?;
            let value = value.trim();
            match key.trim() {
                "max_vocab_count" => {
                    guide.default_max_vocab_count = value.parse().map_err(|_| {
                        Error::invalid_argument(format!("invalid max_vocab_count \"{value}\""))
                    })?;
                }
                "min_vocab_frequency" => {
                    guide.default_min_vocab_frequency = value.parse().map_err(|_| {
                        Error::invalid_argument(format!("invalid min_vocab_frequency \"{value}\""))
                    })?;
                }
                "ignore" => {
                    Regex::new(value)?;
                    guide.ignored_columns.push(value.to_string());
                }
                "column" => {
                    guide.columns.push(Self::parse_column_rule(value)?);
                }
                other => {
                    return Err(Error::invalid_argument(format!(
                        "unknown guide key \"{other}\""
                    )))
                }
            }
        }
        Ok(guide)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_text(&text)
    }

    fn parse_column_rule(value: &str) -> Result<ColumnGuide> {
        let mut parts = value.split_whitespace();
        let pattern = parts
            .next()
            .ok_or_else(|| Error::invalid_argument("column guide is missing its regex"))?;
        Regex::new(pattern)?;
        let mut rule = ColumnGuide {
            column_pattern: pattern.to_string(),
            col_type: None,
            max_vocab_count: None,
            min_vocab_frequency: None,
            is_already_integerized: false,
        };
        for part in parts {
            if let Some((key, override_value)) = part.split_once('=') {
                match key {
                    "max_vocab_count" => {
                        rule.max_vocab_count = Some(override_value.parse().map_err(|_| {
                            Error::invalid_argument(format!(
                                "invalid max_vocab_count \"{override_value}\""
                            ))
                        })?)
                    }
                    "min_vocab_frequency" => {
                        rule.min_vocab_frequency = Some(override_value.parse().map_err(|_| {
                            Error::invalid_argument(format!(
                                "invalid min_vocab_frequency \"{override_value}\""
                            ))
                        })?)
                    }
                    "integerized" => {
                        rule.is_already_integerized = override_value == "true";
                    }
                    other => {
                        return Err(Error::invalid_argument(format!(
                            "unknown column guide override \"{other}\""
                        )))
                    }
                }
            } else {
                rule.col_type = Some(ColumnType::parse(part)?);
            }
        }
        Ok(rule)
    }

    /// First matching rule for a column name.
    pub fn matching(&self, column_name: &str) -> Result<Option<&ColumnGuide>> {
        for rule in &self.columns {
            if Regex::new(&rule.column_pattern)?.is_match(column_name) {
                return Ok(Some(rule));
            }
        }
        Ok(None)
    }

    pub fn is_ignored(&self, column_name: &str) -> Result<bool> {
        for pattern in &self.ignored_columns {
            if Regex::new(pattern)?.is_match(column_name) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

// =============================================================================
// Type-pass statistics
// =============================================================================

/// Per-column accumulator of the first (type) pass.
struct InferStats {
    all_numerical: bool,
    all_boolean: bool,
    saw_textual_boolean: bool,
    token_counts: HashMap<String, u64>,
    count_values: u64,
}

impl InferStats {
    fn new() -> Self {
        Self {
            all_numerical: true,
            all_boolean: true,
            saw_textual_boolean: false,
            token_counts: HashMap::new(),
            count_values: 0,
        }
    }

    fn update(&mut self, token: &str, tokenize_as_set: bool) {
        self.count_values += 1;
        match token {
            "0" | "1" => {}
            "true" | "false" | "TRUE" | "FALSE" | "True" | "False" => {
                self.saw_textual_boolean = true;
                self.all_numerical = false;
            }
            _ => {
                self.all_boolean = false;
                if token.parse::<f64>().map(|v| v.is_finite()).unwrap_or(false) {
                    // still numerical
                } else {
                    self.all_numerical = false;
                }
            }
        }
        if tokenize_as_set {
            for item in token.split_whitespace() {
                *self.token_counts.entry(item.to_string()).or_insert(0) += 1;
            }
        } else {
            *self.token_counts.entry(token.to_string()).or_insert(0) += 1;
        }
    }

    fn inferred_type(&self) -> ColumnType {
        if self.all_boolean && self.saw_textual_boolean {
            ColumnType::Boolean
        } else if self.all_numerical {
            ColumnType::Numerical
        } else {
            ColumnType::Categorical
        }
    }
}

// =============================================================================
// Inference driver
// =============================================================================

fn is_missing_token(token: &str) -> bool {
    DEFAULT_MISSING_TOKENS.contains(&token)
}

/// Infer a dataspec from a typed dataset path.
pub fn infer_data_spec(typed: &TypedPath, guide: &DataSpecGuide) -> Result<DataSpec> {
    if typed.format != "csv" {
        return Err(Error::not_found(format!(
            "dataspec inference only supports the csv format, got \"{}\"",
            typed.format
        )));
    }
    infer_from_csv(&typed.paths, guide)
}

fn infer_from_csv(paths: &[PathBuf], guide: &DataSpecGuide) -> Result<DataSpec> {
    // ---- Pass 1: infer column types. ----
    let mut column_names: Vec<String> = Vec::new();
    let mut stats: Vec<InferStats> = Vec::new();
    let mut guide_types: Vec<Option<ColumnType>> = Vec::new();

    for (shard_idx, path) in paths.iter().enumerate() {
        let mut reader = csv::Reader::from_path(path).map_err(|err| {
            Error::not_found(format!("cannot open \"{}\": {err}", path.display()))
        })?;
        let header: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        if shard_idx == 0 {
            for name in &header {
                if guide.is_ignored(name)? {
                    continue;
                }
                let forced = guide.matching(name)?.and_then(|rule| rule.col_type);
                column_names.push(name.clone());
                stats.push(InferStats::new());
                guide_types.push(forced);
            }
        }
        let positions: Vec<Option<usize>> = column_names
            .iter()
            .map(|name| header.iter().position(|h| h == name))
            .collect();
        for record in reader.records() {
            let record = record?;
            for (col, position) in positions.iter().enumerate() {
                let token = position.and_then(|p| record.get(p)).unwrap_or("");
                if is_missing_token(token) {
                    continue;
                }
                let as_set = guide_types[col] == Some(ColumnType::CategoricalSet);
                stats[col].update(token, as_set);
            }
        }
    }

    let col_types: Vec<(ColumnType, bool)> = guide_types
        .iter()
        .zip(&stats)
        .map(|(forced, stat)| match forced {
            Some(col_type) => (*col_type, true),
            None => (stat.inferred_type(), false),
        })
        .collect();

    // ---- Pass 2: fill statistics. ----
    let num_columns = column_names.len();
    let mut sums = vec![KahanAccumulator::default(); num_columns];
    let mut sums_sq = vec![KahanAccumulator::default(); num_columns];
    let mut mins = vec![f64::INFINITY; num_columns];
    let mut maxs = vec![f64::NEG_INFINITY; num_columns];
    let mut counts = vec![0u64; num_columns];
    let mut count_missing = vec![0u64; num_columns];

    for path in paths {
        let mut reader = csv::Reader::from_path(path).map_err(|err| {
            Error::not_found(format!("cannot open \"{}\": {err}", path.display()))
        })?;
        let header: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let positions: Vec<Option<usize>> = column_names
            .iter()
            .map(|name| header.iter().position(|h| h == name))
            .collect();
        for record in reader.records() {
            let record = record?;
            for (col, position) in positions.iter().enumerate() {
                let token = position.and_then(|p| record.get(p)).unwrap_or("");
                if is_missing_token(token) {
                    count_missing[col] += 1;
                    continue;
                }
                if col_types[col].0 == ColumnType::Numerical {
                    if let Ok(value) = token.parse::<f64>() {
                        if value.is_finite() {
                            sums[col].add(value);
                            sums_sq[col].add(value * value);
                            mins[col] = mins[col].min(value);
                            maxs[col] = maxs[col].max(value);
                            counts[col] += 1;
                        } else {
                            count_missing[col] += 1;
                        }
                    } else {
                        count_missing[col] += 1;
                    }
                }
            }
        }
    }

    // ---- Assemble the spec. ----
    let mut columns = Vec::with_capacity(num_columns);
    for (col, name) in column_names.iter().enumerate() {
        let (col_type, is_manual) = col_types[col];
        let rule = guide.matching(name)?;
        let max_vocab = rule
            .and_then(|r| r.max_vocab_count)
            .unwrap_or(guide.default_max_vocab_count);
        let min_frequency = rule
            .and_then(|r| r.min_vocab_frequency)
            .unwrap_or(guide.default_min_vocab_frequency);

        let mut column = match col_type {
            ColumnType::Numerical => {
                let n = counts[col] as f64;
                let mean = if counts[col] > 0 { sums[col].total() / n } else { 0.0 };
                let variance = if counts[col] > 0 {
                    (sums_sq[col].total() / n - mean * mean).max(0.0)
                } else {
                    0.0
                };
                ColumnSpec::numerical(
                    name.clone(),
                    NumericalStats {
                        mean,
                        std_dev: variance.sqrt(),
                        min: if counts[col] > 0 { mins[col] } else { 0.0 },
                        max: if counts[col] > 0 { maxs[col] } else { 0.0 },
                    },
                )
            }
            ColumnType::Categorical | ColumnType::CategoricalSet => {
                let mut dict = CategoricalDict::from_frequencies(
                    &stats[col].token_counts,
                    min_frequency,
                    max_vocab,
                );
                if rule.map(|r| r.is_already_integerized).unwrap_or(false) {
                    let upper = stats[col]
                        .token_counts
                        .keys()
                        .filter_map(|t| t.parse::<usize>().ok())
                        .max()
                        .unwrap_or(0);
                    dict = CategoricalDict::integerized(upper + 1);
                }
                let mut spec = if col_type == ColumnType::Categorical {
                    ColumnSpec::categorical(name.clone(), dict)
                } else {
                    ColumnSpec::categorical_set(name.clone(), dict)
                };
                spec.col_type = col_type;
                spec
            }
            ColumnType::Boolean => ColumnSpec::boolean(name.clone()),
            ColumnType::Hash => ColumnSpec::hash(name.clone()),
        };
        column.is_manual_type = is_manual;
        column.count_missing = count_missing[col];
        columns.push(column);
    }

    let spec = DataSpec::new(columns);
    spec.validate()?;
    Ok(spec)
}

// =============================================================================
// Tests
// =============================================================================
