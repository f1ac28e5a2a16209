use super::{LoadError, read_toml};
use crate::core::models::collimator::{Collimator, CollimatorError, LeafRange};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CollimatorFile {
    angles: Vec<i32>,
    rows: usize,
    columns: usize,
    #[serde(default)]
    active: Vec<ActiveRowFile>,
}

/// A row with neither `from` nor `to` is closed at that angle.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActiveRowFile {
    angle: i32,
    row: usize,
    from: Option<usize>,
    to: Option<usize>,
}

impl Collimator {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let file: CollimatorFile = read_toml(path)?;
        let path_str = path.to_string_lossy().to_string();
        let invalid = |source: CollimatorError| LoadError::Collimator {
            path: path_str.clone(),
            source,
        };

        let mut collimator =
            Collimator::new(file.angles, file.rows, file.columns).map_err(&invalid)?;

        for entry in file.active {
            let range = match (entry.from, entry.to) {
                (Some(from), Some(to)) => Some(LeafRange::new(from, to)),
                (None, None) => None,
                _ => {
                    return Err(LoadError::IncompleteRange {
                        path: path_str.clone(),
                        angle: entry.angle,
                        row: entry.row,
                    });
                }
            };
            collimator = collimator
                .with_active_range(entry.angle, entry.row, range)
                .map_err(&invalid)?;
        }

        debug!(
            angles = collimator.angles().len(),
            rows = collimator.rows(),
            columns = collimator.columns(),
            "Loaded collimator from '{}'.",
            path_str
        );
        Ok(collimator)
    }
}
