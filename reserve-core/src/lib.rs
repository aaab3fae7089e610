use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

mod buffer;
pub mod container;
pub mod locate;
pub mod population;
pub mod propagate;
pub mod record;
pub mod session;
pub mod species;
pub mod splice;
pub mod value;

#[cfg(test)]
mod testing;

pub use container::DecompressedContainer;
pub use record::{FixedRecord, Gender, RecordView, RECORD_SIZE};
pub use session::EditSession;
pub use species::{RecordKind, SpeciesCatalog};
pub use splice::Splice;
pub use value::{ContainerMeta, HeaderField, ParsedTree, PathSegment, Scalar, TreeParser, Value, ValueKind, ValuePath};

/// Knobs for the population workflows. Built once and passed by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSettings {
    /// Groups holding this many records are skipped when adding.
    pub max_group_size: usize,
    /// Groups need at least this many records to give one up.
    pub min_group_size: usize,
    /// Upper bound on random draws when searching for a visual seed.
    pub seed_attempts: u32,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            max_group_size: 30,
            min_group_size: 2,
            seed_attempts: 10_000_000,
        }
    }
}

impl EditorSettings {
    pub fn from_json_str(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }
}

#[derive(Debug, Error)]
pub enum ReserveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decompress container: {0}")]
    Decompression(#[source] std::io::Error),
    #[error("record bytes at offset {offset} do not match the parsed record; reload and try again")]
    Consistency { offset: usize },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("every eligible group already holds {limit} records")]
    Capacity { limit: usize },
    #[error("access of {len} bytes at offset {offset} exceeds buffer of {buffer_len} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        buffer_len: usize,
    },
    #[error("unexpected value layout: {0}")]
    Schema(String),
    #[error("value tree is stale after a structural edit; reparse before editing again")]
    StaleTree,
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReserveError>;
