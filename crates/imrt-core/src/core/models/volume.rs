use nalgebra::DMatrix;
use std::collections::HashMap;
use thiserror::Error;

/// Dose window and importance of one anatomical structure.
///
/// Organs at risk typically use `min_dose = 0.0`; targets use a narrow window
/// around the prescription.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoseTarget {
    pub weight: f64,
    pub min_dose: f64,
    pub max_dose: f64,
}

impl DoseTarget {
    pub fn new(weight: f64, min_dose: f64, max_dose: f64) -> Self {
        Self {
            weight,
            min_dose,
            max_dose,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum VolumeError {
    #[error("Volume '{name}' must contain at least one voxel")]
    NoVoxels { name: String },
    #[error("Volume '{name}' has min dose {min_dose} above max dose {max_dose}")]
    InvertedDoseWindow {
        name: String,
        min_dose: f64,
        max_dose: f64,
    },
    #[error(
        "Deposition matrix of volume '{name}' at angle {angle} has {found} rows, expected {expected} voxels"
    )]
    VoxelCountMismatch {
        name: String,
        angle: i32,
        expected: usize,
        found: usize,
    },
}

/// An anatomical structure: a set of voxels, its dose target, and the linear
/// dose-deposition matrix of every angle that reaches it.
///
/// `deposition[angle]` has one row per voxel and one column per beamlet of
/// the station at that angle (in the station's row-major beamlet order).
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    name: String,
    voxels: usize,
    target: DoseTarget,
    deposition: HashMap<i32, DMatrix<f64>>,
}

impl Volume {
    pub fn new(name: &str, voxels: usize, target: DoseTarget) -> Result<Self, VolumeError> {
        if voxels == 0 {
            return Err(VolumeError::NoVoxels {
                name: name.to_string(),
            });
        }
        if !(target.min_dose <= target.max_dose) {
            return Err(VolumeError::InvertedDoseWindow {
                name: name.to_string(),
                min_dose: target.min_dose,
                max_dose: target.max_dose,
            });
        }
        Ok(Self {
            name: name.to_string(),
            voxels,
            target,
            deposition: HashMap::new(),
        })
    }

    pub fn with_deposition(mut self, angle: i32, matrix: DMatrix<f64>) -> Result<Self, VolumeError> {
        if matrix.nrows() != self.voxels {
            return Err(VolumeError::VoxelCountMismatch {
                name: self.name.clone(),
                angle,
                expected: self.voxels,
                found: matrix.nrows(),
            });
        }
        self.deposition.insert(angle, matrix);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn voxel_count(&self) -> usize {
        self.voxels
    }

    pub fn target(&self) -> &DoseTarget {
        &self.target
    }

    /// `None` means the beam at `angle` deposits no dose in this structure.
    pub fn deposition(&self, angle: i32) -> Option<&DMatrix<f64>> {
        self.deposition.get(&angle)
    }
}
