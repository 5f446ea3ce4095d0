//! Dataset readers and writers.
//!
//! The CSV codec is the built-in dataset format; other formats can be
//! injected through the [`FormatRegistry`]. Shards are parsed in parallel
//! and merged in submission order so loading is deterministic.

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::dataset::path::TypedPath;
use crate::dataset::spec::DataSpec;
use crate::dataset::{ColumnData, DatasetBuilder, VerticalDataset};
use crate::error::{Error, Result};

// =============================================================================
// Format registry
// =============================================================================

/// Reads the files of one dataset format into a columnar dataset.
pub type FormatReader =
    fn(paths: &[PathBuf], spec: &DataSpec, required: &[String]) -> Result<VerticalDataset>;

/// Writes a columnar dataset to one destination file.
pub type FormatWriter = fn(dataset: &VerticalDataset, path: &Path) -> Result<()>;

/// Dataset format handlers, looked up by the format key of a typed path.
pub struct FormatRegistry {
    entries: Vec<(String, FormatReader, FormatWriter)>,
}

impl FormatRegistry {
    /// Registry with the built-in formats (`csv`).
    pub fn builtin() -> Self {
        let mut registry = Self { entries: Vec::new() };
        registry.register("csv", read_csv, write_csv);
        registry
    }

    pub fn register(&mut self, format: &str, reader: FormatReader, writer: FormatWriter) {
        self.entries.retain(|(name, _, _)| name != format);
        self.entries.push((format.to_string(), reader, writer));
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _, _)| name.as_str()).collect()
    }

    fn lookup(&self, format: &str) -> Result<&(String, FormatReader, FormatWriter)> {
        self.entries
            .iter()
            .find(|(name, _, _)| name == format)
            .ok_or_else(|| {
                Error::not_found(format!(
                    "unknown dataset format \"{format}\"; registered formats: [{}]",
                    self.names().join(", ")
                ))
            })
    }

    /// Load a dataset through the handler of the path's format.
    ///
    /// `required` lists the column names that must be present in the input;
    /// a missing required column fails with `InvalidArgument`.
    pub fn read(
        &self,
        typed: &TypedPath,
        spec: &DataSpec,
        required: &[String],
    ) -> Result<VerticalDataset> {
        let (_, reader, _) = self.lookup(&typed.format)?;
        reader(&typed.paths, spec, required)
    }

    /// Write a dataset through the handler of the path's format.
    pub fn write(&self, dataset: &VerticalDataset, typed: &TypedPath) -> Result<()> {
        let (_, _, writer) = self.lookup(&typed.format)?;
        let path = typed
            .paths
            .first()
            .ok_or_else(|| Error::invalid_argument("output path expands to no file"))?;
        writer(dataset, path)
    }
}

// =============================================================================
// CSV reader
// =============================================================================

/// One parsed shard: its header and raw records, still undecoded.
struct ShardBlock {
    header: Vec<String>,
    records: Vec<csv::StringRecord>,
}

fn parse_shard(path: &Path) -> Result<ShardBlock> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|err| Error::not_found(format!("cannot open \"{}\": {err}", path.display())))?;
    let header: Vec<String> = reader
        .headers()?
        .iter()
        .map(|name| name.to_string())
        .collect();
    let mut records = Vec::new();
    for record in reader.records() {
        records.push(record?);
    }
    Ok(ShardBlock { header, records })
}

/// Read CSV shards into a columnar dataset.
///
/// Shards are parsed in parallel; decoded blocks are appended in submission
/// order. Every spec column that appears in a shard header is filled from
/// the shard; columns named in `required` must be present.
pub fn read_csv(
    paths: &[PathBuf],
    spec: &DataSpec,
    required: &[String],
) -> Result<VerticalDataset> {
    let blocks: Vec<Result<ShardBlock>> =
        paths.par_iter().map(|path| parse_shard(path)).collect();

    let mut builder = DatasetBuilder::new(spec.clone());
    for block in blocks {
        let block = block?;
        // Map each spec column to its position in this shard's header.
        let mut positions: Vec<Option<usize>> = Vec::with_capacity(spec.num_columns());
        for column in &spec.columns {
            let position = block.header.iter().position(|name| *name == column.name);
            if position.is_none() && required.iter().any(|r| *r == column.name) {
                return Err(Error::invalid_argument(format!(
                    "required column \"{}\" is missing from the input",
                    column.name
                )));
            }
            positions.push(position);
        }
        for record in &block.records {
            for (col, position) in positions.iter().enumerate() {
                let token = position.and_then(|p| record.get(p)).unwrap_or("");
                builder.push_value(col, token)?;
            }
        }
    }
    builder.build()
}

// =============================================================================
// CSV writer
// =============================================================================

/// Write a columnar dataset as CSV, decoding indices back to tokens.
pub fn write_csv(dataset: &VerticalDataset, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)
        .map_err(|err| Error::invalid_argument(format!("cannot create \"{}\": {err}", path.display())))?;

    let spec = dataset.spec();
    writer.write_record(spec.columns.iter().map(|c| c.name.as_str()))?;

    let n = dataset.num_rows() as usize;
    for row in 0..n {
        let mut record: Vec<String> = Vec::with_capacity(spec.num_columns());
        for (col, column_spec) in spec.columns.iter().enumerate() {
            let token = match dataset.column_data(col)? {
                ColumnData::Numerical(values) => {
                    let value = values[row];
                    if value.is_nan() { String::new() } else { format!("{value}") }
                }
                ColumnData::Categorical(values) => {
                    let value = values[row];
                    if value < 0 {
                        String::new()
                    } else {
                        column_spec.dict()?.token_of(value).to_string()
                    }
                }
                ColumnData::CategoricalSet(values) => {
                    let dict = column_spec.dict()?;
                    values[row]
                        .iter()
                        .map(|&idx| dict.token_of(idx))
                        .collect::<Vec<_>>()
                        .join(" ")
                }
                ColumnData::Boolean(values) => match values[row] {
                    0 => "0".to_string(),
                    1 => "1".to_string(),
                    _ => String::new(),
                },
                ColumnData::Hash(values) => values[row].to_string(),
            };
            record.push(token);
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::spec::{CategoricalDict, ColumnSpec, NumericalStats};
    use std::collections::HashMap;

    fn spec_xy() -> DataSpec {
        let mut frequencies = HashMap::new();
        frequencies.insert("a".to_string(), 2);
        frequencies.insert("b".to_string(), 2);
        DataSpec::new(vec![
            ColumnSpec::numerical("x", NumericalStats::default()),
            ColumnSpec::categorical("y", CategoricalDict::from_frequencies(&frequencies, 1, 100)),
        ])
    }

    #[test]
    fn reads_a_single_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.csv");
        std::fs::write(&file, "x,y\n0.0,a\n1.0,a\n2.0,b\n3.0,b\n").unwrap();

        let dataset = read_csv(&[file], &spec_xy(), &["x".to_string(), "y".to_string()]).unwrap();
        assert_eq!(dataset.num_rows(), 4);
        assert_eq!(dataset.numerical(0).unwrap(), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(dataset.categorical(1).unwrap(), &[1, 1, 2, 2]);
    }

    #[test]
    fn merges_shards_in_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.csv");
        let second = dir.path().join("b.csv");
        std::fs::write(&first, "x,y\n0.0,a\n1.0,a\n").unwrap();
        std::fs::write(&second, "x,y\n2.0,b\n3.0,b\n").unwrap();

        let dataset =
            read_csv(&[first, second], &spec_xy(), &["x".to_string()]).unwrap();
        assert_eq!(dataset.numerical(0).unwrap(), &[0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn missing_required_column_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.csv");
        std::fs::write(&file, "x\n0.0\n").unwrap();

        let err = read_csv(&[file], &spec_xy(), &["y".to_string()]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn missing_optional_column_fills_missing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.csv");
        std::fs::write(&file, "x\n0.5\n").unwrap();

        let dataset = read_csv(&[file], &spec_xy(), &["x".to_string()]).unwrap();
        assert_eq!(dataset.categorical(1).unwrap()[0], crate::dataset::MISSING_CATEGORICAL);
    }

    #[test]
    fn csv_roundtrip_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        let output = dir.path().join("out.csv");
        std::fs::write(&input, "x,y\n0.5,a\n1.5,b\n").unwrap();

        let spec = spec_xy();
        let required = vec!["x".to_string(), "y".to_string()];
        let dataset = read_csv(&[input], &spec, &required).unwrap();
        write_csv(&dataset, &output).unwrap();
        let reloaded = read_csv(&[output], &spec, &required).unwrap();
        assert_eq!(reloaded.numerical(0).unwrap(), dataset.numerical(0).unwrap());
        assert_eq!(reloaded.categorical(1).unwrap(), dataset.categorical(1).unwrap());
    }

    #[test]
    fn registry_rejects_unknown_format() {
        let registry = FormatRegistry::builtin();
        let typed = TypedPath { format: "tfrecord".to_string(), paths: vec![] };
        let err = registry.read(&typed, &spec_xy(), &[]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        assert!(err.message().contains("csv"));
    }
}
