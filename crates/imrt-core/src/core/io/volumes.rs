use super::{LoadError, read_toml, resolve_relative};
use crate::core::models::volume::{DoseTarget, Volume};
use nalgebra::DMatrix;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VolumesFile {
    #[serde(rename = "volume", default)]
    volumes: Vec<VolumeFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct VolumeFile {
    name: String,
    voxels: usize,
    #[serde(default = "default_weight")]
    weight: f64,
    #[serde(default)]
    min_dose: f64,
    max_dose: f64,
    /// Angle (as a TOML key) to CSV path, relative to the volumes file.
    #[serde(default)]
    deposition: BTreeMap<String, PathBuf>,
}

fn default_weight() -> f64 {
    1.0
}

/// Loads every `[[volume]]` of a volumes file together with its deposition matrices.
pub fn load_volumes(path: &Path) -> Result<Vec<Volume>, LoadError> {
    let file: VolumesFile = read_toml(path)?;
    let path_str = path.to_string_lossy().to_string();

    let mut volumes = Vec::with_capacity(file.volumes.len());
    for entry in file.volumes {
        let target = DoseTarget::new(entry.weight, entry.min_dose, entry.max_dose);
        let mut volume =
            Volume::new(&entry.name, entry.voxels, target).map_err(|e| LoadError::Volume {
                path: path_str.clone(),
                source: e,
            })?;

        for (key, csv_path) in &entry.deposition {
            let angle: i32 = key.trim().parse().map_err(|_| LoadError::InvalidAngle {
                path: path_str.clone(),
                key: key.clone(),
            })?;
            let matrix = load_deposition_csv(&resolve_relative(path, csv_path))?;
            volume = volume
                .with_deposition(angle, matrix)
                .map_err(|e| LoadError::Volume {
                    path: path_str.clone(),
                    source: e,
                })?;
        }

        debug!(
            volume = volume.name(),
            voxels = volume.voxel_count(),
            angles = entry.deposition.len(),
            "Loaded volume definition."
        );
        volumes.push(volume);
    }
    Ok(volumes)
}

/// Reads a headerless CSV of voxel rows by beamlet columns.
pub fn load_deposition_csv(path: &Path) -> Result<DMatrix<f64>, LoadError> {
    let path_str = path.to_string_lossy().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| LoadError::Csv {
            path: path_str.clone(),
            source: e,
        })?;

    let mut data = Vec::new();
    let mut rows = 0;
    for result in reader.deserialize::<Vec<f64>>() {
        let record = result.map_err(|e| LoadError::Csv {
            path: path_str.clone(),
            source: e,
        })?;
        data.extend(record);
        rows += 1;
    }

    if rows == 0 || data.is_empty() {
        return Err(LoadError::EmptyMatrix { path: path_str });
    }
    let columns = data.len() / rows;
    Ok(DMatrix::from_row_slice(rows, columns, &data))
}
