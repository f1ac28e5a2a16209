use super::beamlet::{Beamlet, BeamletChange, Diff, coalesce};
use super::collimator::{Collimator, CollimatorError};
use nalgebra::DMatrix;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StationError {
    #[error("Beamlet {beamlet} does not exist (station at angle {angle} has {len} beamlets)")]
    BeamletOutOfRange {
        angle: i32,
        beamlet: usize,
        len: usize,
    },
    #[error("Intensity {value} is outside [0, {max}]")]
    IntensityOutOfRange { value: i32, max: i32 },
    #[error("Intensity {value} is not a multiple of the intensity step {step}")]
    OffStep { value: i32, step: i32 },
    #[error("Station at angle {angle} would need {required} apertures, limit is {limit}")]
    ApertureLimit {
        angle: i32,
        required: usize,
        limit: usize,
    },
    #[error("Invalid intensity limits: {reason}")]
    InvalidLimits { reason: String },
    #[error(transparent)]
    Collimator(#[from] CollimatorError),
}

/// Hardware and delivery bounds every beamlet of a station obeys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntensityLimits {
    pub max_apertures: usize,
    pub max_intensity: i32,
    pub step_intensity: i32,
}

impl IntensityLimits {
    pub fn validate(&self) -> Result<(), StationError> {
        let invalid = |reason: String| -> Result<(), StationError> {
            Err(StationError::InvalidLimits { reason })
        };
        if self.max_apertures == 0 {
            return invalid("max_apertures must be at least 1".to_string());
        }
        if self.max_intensity <= 0 {
            return invalid(format!(
                "max_intensity must be positive, got {}",
                self.max_intensity
            ));
        }
        if self.step_intensity <= 0 {
            return invalid(format!(
                "step_intensity must be positive, got {}",
                self.step_intensity
            ));
        }
        if self.step_intensity > self.max_intensity {
            return invalid(format!(
                "step_intensity {} exceeds max_intensity {}",
                self.step_intensity, self.max_intensity
            ));
        }
        Ok(())
    }
}

/// A maximal run of open beamlets within one collimator row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aperture {
    pub row: usize,
    pub from: usize,
    pub to: usize,
}

/// The beamlet configuration of one gantry angle.
///
/// Beamlets are stored row-major over the collimator's active cells, so the
/// beamlets of a row are contiguous and ordered by column. Intensities only
/// change through [`StationEditor`], which the plan hands out while
/// recording the move.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    angle: i32,
    rows: usize,
    columns: usize,
    limits: IntensityLimits,
    beamlets: Vec<Beamlet>,
}

impl Station {
    pub fn new(
        angle: i32,
        collimator: &Collimator,
        limits: IntensityLimits,
        initial_intensity: i32,
    ) -> Result<Self, StationError> {
        limits.validate()?;
        check_value(initial_intensity, &limits)?;

        let beamlets = collimator
            .beamlet_positions(angle)?
            .into_iter()
            .map(|(row, col)| Beamlet::new(row, col, initial_intensity))
            .collect();

        let station = Self {
            angle,
            rows: collimator.rows(),
            columns: collimator.columns(),
            limits,
            beamlets,
        };

        let required = station.aperture_count();
        if required > limits.max_apertures {
            return Err(StationError::ApertureLimit {
                angle,
                required,
                limit: limits.max_apertures,
            });
        }
        Ok(station)
    }

    pub fn angle(&self) -> i32 {
        self.angle
    }

    pub fn limits(&self) -> &IntensityLimits {
        &self.limits
    }

    pub fn len(&self) -> usize {
        self.beamlets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beamlets.is_empty()
    }

    pub fn beamlets(&self) -> &[Beamlet] {
        &self.beamlets
    }

    pub fn beamlet(&self, index: usize) -> Option<&Beamlet> {
        self.beamlets.get(index)
    }

    pub fn intensity(&self, index: usize) -> Option<i32> {
        self.beamlets.get(index).map(Beamlet::intensity)
    }

    pub fn intensities(&self) -> impl Iterator<Item = i32> + '_ {
        self.beamlets.iter().map(Beamlet::intensity)
    }

    pub fn open_beamlets(&self) -> impl Iterator<Item = usize> + '_ {
        self.beamlets
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_open())
            .map(|(i, _)| i)
    }

    pub fn can_increase(&self, index: usize) -> bool {
        self.intensity(index)
            .is_some_and(|v| v + self.limits.step_intensity <= self.limits.max_intensity)
    }

    pub fn can_decrease(&self, index: usize) -> bool {
        self.intensity(index)
            .is_some_and(|v| v - self.limits.step_intensity >= 0)
    }

    /// Intensities laid out on the full collimator grid; inactive cells are zero.
    pub fn intensity_matrix(&self) -> DMatrix<i32> {
        let mut matrix = DMatrix::zeros(self.rows, self.columns);
        for b in &self.beamlets {
            matrix[(b.row, b.col)] = b.intensity;
        }
        matrix
    }

    pub fn apertures(&self) -> Vec<Aperture> {
        let mut apertures: Vec<Aperture> = Vec::new();
        let mut previous: Option<&Beamlet> = None;

        for b in &self.beamlets {
            if b.is_open() {
                let extends = previous
                    .is_some_and(|p| p.is_open() && p.row == b.row && p.col + 1 == b.col);
                match apertures.last_mut() {
                    Some(last) if extends => last.to = b.col,
                    _ => apertures.push(Aperture {
                        row: b.row,
                        from: b.col,
                        to: b.col,
                    }),
                }
            }
            previous = Some(b);
        }
        apertures
    }

    /// Number of leaf configurations needed to deliver the open shape: the
    /// largest count of separate openings in any single row.
    pub fn aperture_count(&self) -> usize {
        let mut per_row = vec![0usize; self.rows];
        for aperture in self.apertures() {
            per_row[aperture.row] += 1;
        }
        per_row.into_iter().max().unwrap_or(0)
    }

    pub(crate) fn set_intensity(
        &mut self,
        index: usize,
        value: i32,
    ) -> Result<BeamletChange, StationError> {
        let len = self.beamlets.len();
        let beamlet = self
            .beamlets
            .get_mut(index)
            .ok_or(StationError::BeamletOutOfRange {
                angle: self.angle,
                beamlet: index,
                len,
            })?;
        check_value(value, &self.limits)?;

        let previous = beamlet.intensity;
        beamlet.intensity = value;

        if (previous > 0) != (value > 0) {
            let required = self.aperture_count();
            if required > self.limits.max_apertures {
                self.beamlets[index].intensity = previous;
                return Err(StationError::ApertureLimit {
                    angle: self.angle,
                    required,
                    limit: self.limits.max_apertures,
                });
            }
        }

        Ok(BeamletChange::new(index, previous))
    }

    pub(crate) fn step_intensity(
        &mut self,
        index: usize,
        increase: bool,
    ) -> Result<BeamletChange, StationError> {
        let current = self.intensity(index).ok_or(StationError::BeamletOutOfRange {
            angle: self.angle,
            beamlet: index,
            len: self.beamlets.len(),
        })?;
        let step = self.limits.step_intensity;
        let target = if increase {
            current + step
        } else {
            current - step
        };
        self.set_intensity(index, target)
    }

    /// Writes back the recorded previous intensities, newest change first.
    pub(crate) fn restore(&mut self, diff: &[BeamletChange]) {
        for change in diff.iter().rev() {
            if let Some(b) = self.beamlets.get_mut(change.beamlet) {
                b.intensity = change.previous;
            }
        }
    }
}

fn check_value(value: i32, limits: &IntensityLimits) -> Result<(), StationError> {
    if !(0..=limits.max_intensity).contains(&value) {
        return Err(StationError::IntensityOutOfRange {
            value,
            max: limits.max_intensity,
        });
    }
    if value % limits.step_intensity != 0 {
        return Err(StationError::OffStep {
            value,
            step: limits.step_intensity,
        });
    }
    Ok(())
}

/// Mutable access to one station that records every change it makes.
pub struct StationEditor<'a> {
    station: &'a mut Station,
    diff: Diff,
}

impl<'a> StationEditor<'a> {
    pub(crate) fn new(station: &'a mut Station) -> Self {
        Self {
            station,
            diff: Vec::new(),
        }
    }

    pub fn station(&self) -> &Station {
        self.station
    }

    pub fn set_intensity(&mut self, index: usize, value: i32) -> Result<(), StationError> {
        let change = self.station.set_intensity(index, value)?;
        self.diff.push(change);
        Ok(())
    }

    /// Moves one beamlet a single intensity step up or down and returns the
    /// new intensity.
    pub fn step_intensity(&mut self, index: usize, increase: bool) -> Result<i32, StationError> {
        let change = self.station.step_intensity(index, increase)?;
        self.diff.push(change);
        Ok(self.station.beamlets[index].intensity)
    }

    pub(crate) fn rollback(self) {
        self.station.restore(&self.diff);
    }

    pub(crate) fn finish(self) -> Diff {
        coalesce(&self.diff)
    }
}
