use super::config::ConfigError;
use super::error::EvaluationError;
use crate::core::models::beamlet::BeamletChange;
use crate::core::models::station::Station;
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveWeights {
    w: Vec<f64>,
    z_min: Vec<f64>,
    z_max: Vec<f64>,
}

impl ObjectiveWeights {
    pub fn new(w: Vec<f64>, z_min: Vec<f64>, z_max: Vec<f64>) -> Result<Self, ConfigError> {
        if w.len() != z_min.len() || w.len() != z_max.len() {
            return Err(ConfigError::LengthMismatch {
                w: w.len(),
                z_min: z_min.len(),
                z_max: z_max.len(),
            });
        }
        if let Some(i) = (0..w.len()).find(|&i| z_min[i] > z_max[i]) {
            return Err(ConfigError::InvalidValue {
                parameter: "z_min",
                reason: format!(
                    "term {} has z_min {} above z_max {}",
                    i, z_min[i], z_max[i]
                ),
            });
        }
        Ok(Self::from_parts(w, z_min, z_max))
    }

    pub(crate) fn from_parts(w: Vec<f64>, z_min: Vec<f64>, z_max: Vec<f64>) -> Self {
        Self { w, z_min, z_max }
    }

    pub fn len(&self) -> usize {
        self.w.len()
    }

    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }

    pub fn w(&self) -> &[f64] {
        &self.w
    }

    pub fn z_min(&self) -> &[f64] {
        &self.z_min
    }

    pub fn z_max(&self) -> &[f64] {
        &self.z_max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankingMode {
    #[default]
    Gradient,
    Violation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankingRequest {
    pub n: usize,
    /// Upper bound on the number of volumes considered; `0` considers all.
    pub nv: usize,
    pub mode: RankingMode,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub score: f64,
    /// Direction of the step; also the tie-break between equal scores.
    pub increase: bool,
    pub station: usize,
    pub beamlet: usize,
}

impl Candidate {
    /// Best-first total order: `(score, increase)` descending, then position ascending.
    pub fn ranking_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.increase.cmp(&self.increase))
            .then_with(|| self.station.cmp(&other.station))
            .then_with(|| self.beamlet.cmp(&other.beamlet))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RankedCandidates {
    entries: Vec<Candidate>,
}

impl RankedCandidates {
    pub fn new(mut entries: Vec<Candidate>, limit: usize) -> Self {
        entries.sort_by(Candidate::ranking_cmp);
        let mut seen = HashSet::with_capacity(entries.len());
        entries.retain(|c| seen.insert((c.station, c.beamlet)));
        entries.truncate(limit);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&Candidate> {
        self.entries.first()
    }

    pub fn get(&self, index: usize) -> Option<&Candidate> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[Candidate] {
        &self.entries
    }

    pub fn into_vec(self) -> Vec<Candidate> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a RankedCandidates {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Objective and move-ranking contract a [`Plan`](super::plan::Plan) depends on.
///
/// Implementations may keep internal state (e.g. accumulated doses) between
/// calls. `eval` resets that state from scratch; `incremental_eval` must
/// afterwards produce the value `eval` would return on the same stations.
pub trait EvaluationFunction {
    fn term_count(&self) -> usize;

    fn default_weights(&self) -> ObjectiveWeights;

    fn eval(
        &mut self,
        stations: &[Station],
        weights: &ObjectiveWeights,
    ) -> Result<f64, EvaluationError>;

    /// `station` already carries the new intensities; `diff` holds the
    /// intensities each touched beamlet had before the move.
    fn incremental_eval(
        &mut self,
        station: &Station,
        diff: &[BeamletChange],
    ) -> Result<f64, EvaluationError>;

    fn rank_candidates(
        &self,
        stations: &[Station],
        request: &RankingRequest,
    ) -> Result<Vec<Candidate>, EvaluationError>;
}
