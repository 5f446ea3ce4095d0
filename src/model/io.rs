//! Model directory serialization.
//!
//! Layout:
//!
//! ```text
//! <dir>/header.bin                          generic header
//! <dir>/data_spec.bin                       dataspec
//! <dir>/<model>_header.bin                  model-specific header
//! <dir>/nodes-00000-of-00001                forest node stream
//! <dir>/done                                completion sentinel
//! ```
//!
//! Saving writes into a `<dir>.tmp` sibling, renames it into place, then
//! creates the empty `done` file, so a crash never leaves a loadable
//! partial model. A directory without `done` must not be loaded.

use std::path::{Path, PathBuf};

use crate::dataset::DataSpec;
use crate::error::{Error, Result};
use crate::model::registry::model_registry;
use crate::model::{ForestModel, ModelHeader};
use crate::tree::Tree;

pub const HEADER_FILE_NAME: &str = "header.bin";
pub const DATA_SPEC_FILE_NAME: &str = "data_spec.bin";
pub const DONE_FILE_NAME: &str = "done";

/// Shard name of the single node shard.
fn nodes_shard_name(shard: usize, count: usize) -> String {
    format!("nodes-{shard:05}-of-{count:05}")
}

// =============================================================================
// Node shards
// =============================================================================

/// Write the forest as one node-stream shard: the trees in order, each a
/// prefix-order run of node records.
pub fn write_node_shards(dir: &Path, trees: &[Tree]) -> Result<()> {
    let bytes = postcard::to_allocvec(trees)?;
    std::fs::write(dir.join(nodes_shard_name(0, 1)), bytes)?;
    Ok(())
}

/// Read every node shard of a model directory, in shard order.
pub fn read_node_shards(dir: &Path) -> Result<Vec<Tree>> {
    let mut shard_files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with("nodes-"))
                .unwrap_or(false)
        })
        .collect();
    shard_files.sort();
    if shard_files.is_empty() {
        return Err(Error::failed_precondition(format!(
            "no node shard in \"{}\"",
            dir.display()
        )));
    }
    let mut trees = Vec::new();
    for shard in shard_files {
        let bytes = std::fs::read(shard)?;
        let mut shard_trees: Vec<Tree> = postcard::from_bytes(&bytes)?;
        trees.append(&mut shard_trees);
    }
    Ok(trees)
}

// =============================================================================
// Save / load
// =============================================================================

/// Whether `dir` holds a complete model.
pub fn model_exists(dir: &Path) -> bool {
    dir.join(DONE_FILE_NAME).is_file()
}

/// Save a model atomically: validate, write to a temp directory, rename,
/// then create the `done` sentinel.
pub fn save_model(dir: &Path, model: &dyn ForestModel) -> Result<()> {
    model.validate()?;

    let tmp = dir.with_extension("tmp");
    if tmp.exists() {
        std::fs::remove_dir_all(&tmp)?;
    }
    std::fs::create_dir_all(&tmp)?;

    let header_bytes = postcard::to_allocvec(model.header())?;
    std::fs::write(tmp.join(HEADER_FILE_NAME), header_bytes)?;
    let spec_bytes = postcard::to_allocvec(model.data_spec())?;
    std::fs::write(tmp.join(DATA_SPEC_FILE_NAME), spec_bytes)?;
    model.save_parts(&tmp)?;

    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::rename(&tmp, dir)?;
    std::fs::write(dir.join(DONE_FILE_NAME), b"")?;
    Ok(())
}

/// Load a model directory through the model registry.
pub fn load_model(dir: &Path) -> Result<Box<dyn ForestModel>> {
    if !dir.exists() {
        return Err(Error::not_found(format!(
            "model directory \"{}\" does not exist",
            dir.display()
        )));
    }
    if !model_exists(dir) {
        return Err(Error::failed_precondition(format!(
            "model directory \"{}\" has no \"{DONE_FILE_NAME}\" file; the model is \
             incomplete and must not be loaded",
            dir.display()
        )));
    }
    let header_bytes = std::fs::read(dir.join(HEADER_FILE_NAME))?;
    let header: ModelHeader = postcard::from_bytes(&header_bytes)?;
    let spec_bytes = std::fs::read(dir.join(DATA_SPEC_FILE_NAME))?;
    let data_spec: DataSpec = postcard::from_bytes(&spec_bytes)?;
    data_spec.validate()?;

    let registry = model_registry();
    let loader = registry.get(&header.name)?;
    let model = loader(dir, header, data_spec)?;
    model.validate()?;
    Ok(model)
}

// =============================================================================
// Tests
// =============================================================================
