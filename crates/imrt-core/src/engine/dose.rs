use super::error::EvaluationError;
use super::evaluation::{
    Candidate, EvaluationFunction, ObjectiveWeights, RankingMode, RankingRequest,
};
use crate::core::models::beamlet::{BeamletChange, coalesce};
use crate::core::models::station::Station;
use crate::core::models::volume::Volume;
use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use tracing::{debug, instrument, trace};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Voxels whose violation reaches this share of their volume's worst
/// violation drive the ranking in [`RankingMode::Violation`].
const VIOLATION_FRACTION: f64 = 0.5;

/// Quadratic dose-window objective over a set of volumes.
///
/// Term `v` is `w[v] / |V| * sum_k ((z_min[v] - d_k)+^2 + (d_k - z_max[v])+^2)`
/// where `d` is the linear dose the stations deliver to the voxels of `V`.
/// Doses and per-term penalty sums are cached after [`eval`](EvaluationFunction::eval)
/// so single-station moves only touch the voxels their beamlets reach.
#[derive(Debug, Clone)]
pub struct DoseEvaluator {
    volumes: Vec<Volume>,
    state: Option<DoseState>,
}

#[derive(Debug, Clone)]
struct DoseState {
    weights: ObjectiveWeights,
    scales: Vec<f64>,
    doses: Vec<DVector<f64>>,
    penalties: Vec<f64>,
}

impl DoseState {
    fn term(&self, v: usize) -> f64 {
        self.scales[v] * self.penalties[v]
    }

    fn total(&self) -> f64 {
        (0..self.penalties.len()).map(|v| self.term(v)).sum()
    }
}

impl DoseEvaluator {
    pub fn new(volumes: Vec<Volume>) -> Self {
        Self {
            volumes,
            state: None,
        }
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn dose(&self, v: usize) -> Option<&DVector<f64>> {
        self.state.as_ref().and_then(|s| s.doses.get(v))
    }

    pub fn term(&self, v: usize) -> Option<f64> {
        self.state
            .as_ref()
            .filter(|s| v < s.penalties.len())
            .map(|s| s.term(v))
    }
}

pub fn target_weights(volumes: &[Volume]) -> ObjectiveWeights {
    let (w, (z_min, z_max)): (Vec<f64>, (Vec<f64>, Vec<f64>)) = volumes
        .iter()
        .map(|v| {
            let t = v.target();
            (t.weight, (t.min_dose, t.max_dose))
        })
        .unzip();
    // Volume::new already rejects inverted dose windows.
    ObjectiveWeights::from_parts(w, z_min, z_max)
}

#[inline]
fn voxel_penalty(dose: f64, z_min: f64, z_max: f64) -> f64 {
    let under = (z_min - dose).max(0.0);
    let over = (dose - z_max).max(0.0);
    under * under + over * over
}

#[inline]
fn voxel_gradient(dose: f64, z_min: f64, z_max: f64) -> f64 {
    2.0 * (dose - z_max).max(0.0) - 2.0 * (z_min - dose).max(0.0)
}

#[inline]
fn voxel_violation(dose: f64, z_min: f64, z_max: f64) -> f64 {
    (dose - z_max).max(z_min - dose).max(0.0)
}

fn check_columns(
    volume: &Volume,
    station: &Station,
    matrix: &DMatrix<f64>,
) -> Result<(), EvaluationError> {
    if matrix.ncols() != station.len() {
        return Err(EvaluationError::DimensionMismatch {
            volume: volume.name().to_string(),
            angle: station.angle(),
            expected: station.len(),
            found: matrix.ncols(),
        });
    }
    Ok(())
}

fn deliver_dose(volume: &Volume, stations: &[Station]) -> Result<DVector<f64>, EvaluationError> {
    let mut dose = DVector::zeros(volume.voxel_count());
    for station in stations {
        let Some(matrix) = volume.deposition(station.angle()) else {
            continue;
        };
        check_columns(volume, station, matrix)?;
        let x = DVector::from_iterator(station.len(), station.intensities().map(f64::from));
        dose += matrix * &x;
    }
    Ok(dose)
}

impl EvaluationFunction for DoseEvaluator {
    fn term_count(&self) -> usize {
        self.volumes.len()
    }

    fn default_weights(&self) -> ObjectiveWeights {
        target_weights(&self.volumes)
    }

    #[instrument(skip_all, name = "dose_eval", fields(stations = stations.len()))]
    fn eval(
        &mut self,
        stations: &[Station],
        weights: &ObjectiveWeights,
    ) -> Result<f64, EvaluationError> {
        if weights.len() != self.volumes.len() {
            return Err(EvaluationError::TermCount {
                expected: self.volumes.len(),
                found: weights.len(),
            });
        }

        #[cfg(feature = "parallel")]
        let doses: Result<Vec<DVector<f64>>, EvaluationError> = self
            .volumes
            .par_iter()
            .map(|v| deliver_dose(v, stations))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let doses: Result<Vec<DVector<f64>>, EvaluationError> = self
            .volumes
            .iter()
            .map(|v| deliver_dose(v, stations))
            .collect();
        let doses = doses?;

        let penalties = doses
            .iter()
            .enumerate()
            .map(|(v, dose)| {
                let (z_min, z_max) = (weights.z_min()[v], weights.z_max()[v]);
                dose.iter().map(|&d| voxel_penalty(d, z_min, z_max)).sum::<f64>()
            })
            .collect();
        let scales = self
            .volumes
            .iter()
            .zip(weights.w())
            .map(|(volume, &w)| w / volume.voxel_count() as f64)
            .collect();

        let state = DoseState {
            weights: weights.clone(),
            scales,
            doses,
            penalties,
        };
        let total = state.total();
        self.state = Some(state);

        debug!(value = total, "Full dose evaluation complete.");
        Ok(total)
    }

    fn incremental_eval(
        &mut self,
        station: &Station,
        diff: &[BeamletChange],
    ) -> Result<f64, EvaluationError> {
        let state = self.state.as_mut().ok_or(EvaluationError::NotInitialized)?;

        let mut deltas: Vec<(usize, f64)> = Vec::new();
        for change in coalesce(diff) {
            let current = station
                .intensity(change.beamlet)
                .ok_or(EvaluationError::UnknownBeamlet {
                    angle: station.angle(),
                    beamlet: change.beamlet,
                })?;
            if current != change.previous {
                deltas.push((change.beamlet, f64::from(current - change.previous)));
            }
        }
        if deltas.is_empty() {
            return Ok(state.total());
        }

        for (v, volume) in self.volumes.iter().enumerate() {
            let Some(matrix) = volume.deposition(station.angle()) else {
                continue;
            };
            check_columns(volume, station, matrix)?;

            let (z_min, z_max) = (state.weights.z_min()[v], state.weights.z_max()[v]);
            let dose = &mut state.doses[v];
            let mut penalty_delta = 0.0;
            for k in 0..volume.voxel_count() {
                let delta: f64 = deltas.iter().map(|&(b, dx)| matrix[(k, b)] * dx).sum();
                if delta == 0.0 {
                    continue;
                }
                let before = voxel_penalty(dose[k], z_min, z_max);
                dose[k] += delta;
                penalty_delta += voxel_penalty(dose[k], z_min, z_max) - before;
            }
            state.penalties[v] += penalty_delta;
        }

        let total = state.total();
        trace!(
            angle = station.angle(),
            changed = deltas.len(),
            value = total,
            "Incremental dose evaluation."
        );
        Ok(total)
    }

    fn rank_candidates(
        &self,
        stations: &[Station],
        request: &RankingRequest,
    ) -> Result<Vec<Candidate>, EvaluationError> {
        let state = self.state.as_ref().ok_or(EvaluationError::NotInitialized)?;
        let volume_limit = if request.nv == 0 {
            self.volumes.len()
        } else {
            request.nv
        };

        let selected: Vec<usize> = (0..self.volumes.len())
            .map(|v| (v, state.term(v)))
            .filter(|&(_, term)| term > 0.0)
            .sorted_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)))
            .take(volume_limit)
            .map(|(v, _)| v)
            .collect();

        let mut gradients: Vec<DVector<f64>> =
            stations.iter().map(|s| DVector::zeros(s.len())).collect();

        for &v in &selected {
            let volume = &self.volumes[v];
            let (z_min, z_max) = (state.weights.z_min()[v], state.weights.z_max()[v]);
            let scale = state.scales[v];
            let dose = &state.doses[v];

            let mut g = dose.map(|d| scale * voxel_gradient(d, z_min, z_max));
            if request.mode == RankingMode::Violation {
                let worst = dose
                    .iter()
                    .map(|&d| voxel_violation(d, z_min, z_max))
                    .fold(0.0, f64::max);
                for (gk, &d) in g.iter_mut().zip(dose.iter()) {
                    if voxel_violation(d, z_min, z_max) < VIOLATION_FRACTION * worst {
                        *gk = 0.0;
                    }
                }
            }

            for (s, station) in stations.iter().enumerate() {
                let Some(matrix) = volume.deposition(station.angle()) else {
                    continue;
                };
                check_columns(volume, station, matrix)?;
                gradients[s] += matrix.tr_mul(&g);
            }
        }

        let mut candidates = Vec::new();
        for (s, station) in stations.iter().enumerate() {
            for (b, &grad) in gradients[s].iter().enumerate() {
                if grad > 0.0 && station.can_decrease(b) {
                    candidates.push(Candidate {
                        score: grad,
                        increase: false,
                        station: s,
                        beamlet: b,
                    });
                } else if grad < 0.0 && station.can_increase(b) {
                    candidates.push(Candidate {
                        score: -grad,
                        increase: true,
                        station: s,
                        beamlet: b,
                    });
                }
            }
        }
        candidates.sort_by(Candidate::ranking_cmp);
        candidates.truncate(request.n);

        debug!(
            volumes = selected.len(),
            candidates = candidates.len(),
            mode = ?request.mode,
            "Ranked beamlet candidates."
        );
        Ok(candidates)
    }
}
