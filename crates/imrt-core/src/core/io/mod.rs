//! Readers for the plan inputs kept on disk.
//!
//! Collimator geometry and volume definitions are TOML documents; the
//! dose-deposition matrices they reference are headerless numeric CSV files
//! with one row per voxel and one column per beamlet.

mod collimator;
pub mod error;
pub mod volumes;

pub use error::LoadError;

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

pub(crate) fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;
    toml::from_str(&content).map_err(|e| LoadError::Toml {
        path: path.to_string_lossy().to_string(),
        source: e,
    })
}

/// Resolves `relative` against the directory containing `base_file`.
pub(crate) fn resolve_relative(base_file: &Path, relative: &Path) -> PathBuf {
    if relative.is_absolute() {
        return relative.to_path_buf();
    }
    base_file
        .parent()
        .map_or_else(|| relative.to_path_buf(), |dir| dir.join(relative))
}
