use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::{ReserveError, Result};

const FILE_PREFIX: &str = "animal_population_";

/// Reserve index encoded in a population file name, e.g. `3` for
/// `animal_population_3`.
pub fn population_index(path: &Path) -> Option<u32> {
    path.file_name()?.to_str()?.strip_prefix(FILE_PREFIX)?.parse().ok()
}

/// Population containers anywhere below `root`, ordered by reserve index.
pub fn population_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(ReserveError::NotFound(format!("{} is not a directory", root.display())));
    }

    let mut files: Vec<(u32, PathBuf)> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| population_index(e.path()).map(|index| (index, e.into_path())))
        .collect();

    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}
