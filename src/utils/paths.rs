//! Path Utilities
//!
//! Resolves the default data directory (~/.doc-retrieval/) and the files
//! kept in it.

use std::path::{Path, PathBuf};

use doc_retrieval_core::{CoreError, CoreResult};

const DATA_DIR_NAME: &str = ".doc-retrieval";

/// Get the user's home directory
pub fn home_dir() -> CoreResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| CoreError::configuration("Could not determine home directory"))
}

/// Get the data directory (~/.doc-retrieval/)
pub fn data_dir() -> CoreResult<PathBuf> {
    Ok(home_dir()?.join(DATA_DIR_NAME))
}

/// Get the config file path (~/.doc-retrieval/config.toml)
pub fn config_path() -> CoreResult<PathBuf> {
    Ok(data_dir()?.join("config.toml"))
}

/// Get the default store snapshot path (~/.doc-retrieval/store.json)
pub fn store_snapshot_path() -> CoreResult<PathBuf> {
    Ok(data_dir()?.join("store.json"))
}

/// Embedder vocabulary saved beside a store snapshot
/// (`store.json` -> `store.vocab.json`)
pub fn vocabulary_path(snapshot: &Path) -> PathBuf {
    let mut name = snapshot.file_stem().unwrap_or_default().to_os_string();
    name.push(".vocab.json");
    snapshot.with_file_name(name)
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> CoreResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Get the data directory, creating it if it doesn't exist
pub fn ensure_data_dir() -> CoreResult<PathBuf> {
    let path = data_dir()?;
    ensure_dir(&path)?;
    Ok(path)
}
