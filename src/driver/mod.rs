//! Drivers (C9, C10): the presentation-adjacent entry points that sit on
//! top of the parse/elaborate/evaluate core (spec.md §4.10).

pub mod truth_table;
pub mod vector;

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::Result;

/// Read and parse a vector file from disk, returning the root JSON value
/// alongside the directory relative memory-binding paths resolve against
/// (spec.md §6 "Relative paths resolve against the vector file's
/// directory").
pub fn load_vector_file(path: &Path) -> Result<(Value, PathBuf)> {
    let text = std::fs::read_to_string(path)?;
    let root: Value = serde_json::from_str(&text)?;
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    Ok((root, dir))
}
