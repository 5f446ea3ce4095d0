//! Typed dataset paths.
//!
//! A typed path is `<format>:<path>` where `<path>` supports the `@N`
//! sharding suffix, `*` globs on the file name, and comma-separated
//! concatenation. Example: `csv:/data/train.csv@4`.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A parsed typed path: a format key plus the expanded list of files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedPath {
    pub format: String,
    pub paths: Vec<PathBuf>,
}

impl TypedPath {
    /// Parse and expand a typed path.
    ///
    /// Globs are resolved against the filesystem; `@N` is expanded to the
    /// canonical `-XXXXX-of-YYYYY` shard names. Paths that expand to nothing
    /// are an error.
    pub fn parse(text: &str) -> Result<Self> {
        let (format, raw_paths) = text.split_once(':').ok_or_else(|| {
            Error::invalid_argument(format!(
                "typed path \"{text}\" is not of the form <format>:<path>"
            ))
        })?;
        if format.is_empty() {
            return Err(Error::invalid_argument(format!(
                "typed path \"{text}\" has an empty format"
            )));
        }

        let mut paths = Vec::new();
        for part in raw_paths.split(',') {
            if part.is_empty() {
                continue;
            }
            if let Some((base, shards)) = part.rsplit_once('@') {
                let count: usize = shards.parse().map_err(|_| {
                    Error::invalid_argument(format!("invalid shard count in \"{part}\""))
                })?;
                if count == 0 {
                    return Err(Error::invalid_argument(format!(
                        "shard count must be positive in \"{part}\""
                    )));
                }
                for shard in 0..count {
                    paths.push(PathBuf::from(shard_name(base, shard, count)));
                }
            } else if part.contains('*') {
                paths.extend(expand_glob(part)?);
            } else {
                paths.push(PathBuf::from(part));
            }
        }

        if paths.is_empty() {
            return Err(Error::invalid_argument(format!(
                "typed path \"{text}\" expands to no file"
            )));
        }
        Ok(Self { format: format.to_string(), paths })
    }

    /// Typed path for writing: a single destination file, no expansion.
    pub fn parse_for_output(text: &str) -> Result<Self> {
        let (format, path) = text.split_once(':').ok_or_else(|| {
            Error::invalid_argument(format!(
                "typed path \"{text}\" is not of the form <format>:<path>"
            ))
        })?;
        Ok(Self {
            format: format.to_string(),
            paths: vec![PathBuf::from(path)],
        })
    }
}

/// Canonical shard file name: `base-XXXXX-of-YYYYY` (extension preserved).
fn shard_name(base: &str, shard: usize, count: usize) -> String {
    match base.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}-{shard:05}-of-{count:05}.{ext}"),
        None => format!("{base}-{shard:05}-of-{count:05}"),
    }
}

/// Expand a single `*` glob on the file-name component.
fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let path = Path::new(pattern);
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_pattern = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::invalid_argument(format!("invalid glob \"{pattern}\"")))?;

    let mut matches: Vec<PathBuf> = std::fs::read_dir(parent)
        .map_err(|err| Error::not_found(format!("cannot list \"{}\": {err}", parent.display())))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| glob_match(file_pattern, name))
                .unwrap_or(false)
        })
        .map(|entry| entry.path())
        .collect();
    matches.sort();
    if matches.is_empty() {
        return Err(Error::not_found(format!("glob \"{pattern}\" matches no file")));
    }
    Ok(matches)
}

/// Match a pattern where `*` spans any run of characters.
fn glob_match(pattern: &str, name: &str) -> bool {
    fn matches(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..]))
            }
            (Some(&pc), Some(&nc)) if pc == nc => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), name.as_bytes())
}

// =============================================================================
// Tests
// =============================================================================
