use crate::core::models::collimator::CollimatorError;
use crate::core::models::volume::VolumeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("Invalid collimator definition in '{path}': {source}")]
    Collimator {
        path: String,
        source: CollimatorError,
    },
    #[error("Invalid volume definition in '{path}': {source}")]
    Volume { path: String, source: VolumeError },
    #[error("Leaf range of row {row} at angle {angle} in '{path}' needs both `from` and `to`")]
    IncompleteRange { path: String, angle: i32, row: usize },
    #[error("Invalid angle key '{key}' in '{path}'")]
    InvalidAngle { path: String, key: String },
    #[error("Deposition matrix '{path}' is empty")]
    EmptyMatrix { path: String },
}
