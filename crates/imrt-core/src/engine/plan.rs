use super::config::{DEFAULT_SETUP_COST, DEFAULT_UNDO_DEPTH, PlanParameters};
use super::dose::DoseEvaluator;
use super::error::PlanError;
use super::evaluation::{
    Candidate, EvaluationFunction, ObjectiveWeights, RankedCandidates, RankingMode,
    RankingRequest,
};
use super::history::{MoveRecord, UndoHistory};
use super::selection::MoveSelection;
use crate::core::models::beamlet::{BeamletChange, Diff};
use crate::core::models::collimator::Collimator;
use crate::core::models::station::{Station, StationEditor, StationError};
use crate::core::models::volume::Volume;
use rand::Rng;
use tracing::{debug, info, instrument, trace, warn};

#[derive(Debug, Clone, PartialEq)]
struct PendingMove {
    station: usize,
    diff: Diff,
}

/// A treatment plan under local-search optimization.
///
/// Moves follow a fixed protocol: [`apply`](Self::apply) mutates one station
/// and leaves the move pending, [`incremental_eval`](Self::incremental_eval)
/// prices it and records it for undo, and [`commit`](Self::commit) or
/// [`undo_last`](Self::undo_last) settles it. While a move is pending the
/// cached evaluation is refused rather than returned stale.
///
/// The objective is the evaluation function's value plus `setup` times the
/// total aperture count over all stations.
#[derive(Debug)]
pub struct Plan<E: EvaluationFunction> {
    stations: Vec<Station>,
    weights: ObjectiveWeights,
    evaluated_with: Option<ObjectiveWeights>,
    evaluation: Option<f64>,
    ev: E,
    setup: f64,
    aperture_counts: Vec<usize>,
    selection: MoveSelection,
    pending: Option<PendingMove>,
    history: UndoHistory,
}

impl<E: EvaluationFunction + Clone> Clone for Plan<E> {
    fn clone(&self) -> Self {
        Self {
            stations: self.stations.clone(),
            weights: self.weights.clone(),
            evaluated_with: self.evaluated_with.clone(),
            evaluation: if self.pending.is_some() {
                None
            } else {
                self.evaluation
            },
            ev: self.ev.clone(),
            setup: self.setup,
            aperture_counts: self.aperture_counts.clone(),
            selection: self.selection,
            pending: None,
            history: UndoHistory::new(self.history.depth()),
        }
    }
}

impl<E: EvaluationFunction + Clone> Plan<E> {
    pub fn new_copy(&mut self, other: &Self) {
        *self = other.clone();
    }
}

impl<E: EvaluationFunction> Plan<E> {
    pub fn new(ev: E) -> Self {
        let weights = ev.default_weights();
        Self {
            stations: Vec::new(),
            weights,
            evaluated_with: None,
            evaluation: None,
            ev,
            setup: DEFAULT_SETUP_COST,
            aperture_counts: Vec::new(),
            selection: MoveSelection::default(),
            pending: None,
            history: UndoHistory::new(DEFAULT_UNDO_DEPTH),
        }
    }

    pub fn with_weights(ev: E, weights: ObjectiveWeights) -> Result<Self, PlanError> {
        if weights.len() != ev.term_count() {
            return Err(PlanError::WeightsMismatch {
                expected: ev.term_count(),
                found: weights.len(),
            });
        }
        let mut plan = Self::new(ev);
        plan.weights = weights;
        Ok(plan)
    }

    /// Changing the cost invalidates the cached objective and every undo
    /// record priced under the old cost.
    pub fn with_setup_cost(mut self, setup: f64) -> Self {
        self.setup = setup;
        self.evaluation = None;
        self.evaluated_with = None;
        self.history.clear();
        self
    }

    pub fn with_undo_depth(mut self, depth: usize) -> Self {
        self.history = UndoHistory::new(depth);
        self
    }

    pub fn with_move_selection(mut self, selection: MoveSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn add_station(&mut self, station: Station) -> Result<(), PlanError> {
        if let Some(pending) = &self.pending {
            return Err(PlanError::PendingMove {
                station: pending.station,
            });
        }
        self.aperture_counts.push(station.aperture_count());
        self.stations.push(station);
        self.evaluation = None;
        self.evaluated_with = None;
        self.history.clear();
        Ok(())
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn station(&self, index: usize) -> Result<&Station, PlanError> {
        self.stations
            .get(index)
            .ok_or(PlanError::StationOutOfRange {
                index,
                len: self.stations.len(),
            })
    }

    pub fn evaluation_function(&self) -> &E {
        &self.ev
    }

    pub fn weights(&self) -> &ObjectiveWeights {
        &self.weights
    }

    pub fn setup_cost(&self) -> f64 {
        self.setup
    }

    pub fn move_selection(&self) -> MoveSelection {
        self.selection
    }

    pub fn history(&self) -> &UndoHistory {
        &self.history
    }

    pub fn has_pending_move(&self) -> bool {
        self.pending.is_some()
    }

    pub fn total_apertures(&self) -> usize {
        self.aperture_counts.iter().sum()
    }

    fn aperture_cost(&self) -> f64 {
        self.setup * self.total_apertures() as f64
    }

    fn refresh_apertures(&mut self, station: usize) {
        self.aperture_counts[station] = self.stations[station].aperture_count();
    }

    pub fn eval(&mut self) -> Result<f64, PlanError> {
        let weights = self.weights.clone();
        self.eval_with(&weights)
    }

    #[instrument(skip_all, name = "plan_eval")]
    pub fn eval_with(&mut self, weights: &ObjectiveWeights) -> Result<f64, PlanError> {
        if weights.len() != self.ev.term_count() {
            return Err(PlanError::WeightsMismatch {
                expected: self.ev.term_count(),
                found: weights.len(),
            });
        }

        if let Some(pending) = self.pending.take() {
            warn!(
                station = pending.station,
                "Full evaluation absorbs an unevaluated move; undo history dropped."
            );
            self.history.clear();
        } else if self.evaluated_with.as_ref() != Some(weights) && !self.history.is_empty() {
            debug!(
                records = self.history.len(),
                "Weights changed; undo history dropped."
            );
            self.history.clear();
        }

        let value = match self.ev.eval(&self.stations, weights) {
            Ok(value) => value + self.aperture_cost(),
            Err(e) => {
                self.evaluation = None;
                self.evaluated_with = None;
                return Err(e.into());
            }
        };
        self.evaluation = Some(value);
        self.evaluated_with = Some(weights.clone());

        info!(
            value,
            apertures = self.total_apertures(),
            "Full plan evaluation complete."
        );
        Ok(value)
    }

    pub fn incremental_eval(
        &mut self,
        station: usize,
        diff: &[BeamletChange],
    ) -> Result<f64, PlanError> {
        let pending = self.pending.as_ref().ok_or(PlanError::NoPendingMove)?;
        if pending.station != station || pending.diff.as_slice() != diff {
            return Err(PlanError::DiffMismatch { station });
        }
        let previous = self.evaluation.ok_or(PlanError::StaleEvaluation)?;

        let value =
            self.ev.incremental_eval(&self.stations[station], diff)? + self.aperture_cost();

        if let Some(pending) = self.pending.take() {
            let dropped = self.history.push(MoveRecord {
                station,
                diff: pending.diff,
                previous_evaluation: previous,
            });
            if dropped.is_some() {
                debug!(depth = self.history.depth(), "Oldest undo record dropped.");
            }
        }
        self.evaluation = Some(value);

        trace!(station, previous, value, "Incremental plan evaluation.");
        Ok(value)
    }

    pub fn evaluate_move(&mut self) -> Result<f64, PlanError> {
        let pending = self.pending.clone().ok_or(PlanError::NoPendingMove)?;
        self.incremental_eval(pending.station, &pending.diff)
    }

    pub fn get_evaluation(&self) -> Result<f64, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::StaleEvaluation);
        }
        self.evaluation.ok_or(PlanError::StaleEvaluation)
    }

    /// Mutates one station through `action` and leaves the move pending.
    ///
    /// If `action` fails, every change it made is rolled back and no move is
    /// pending afterwards.
    pub fn apply<F>(&mut self, station: usize, action: F) -> Result<Diff, PlanError>
    where
        F: FnOnce(&mut StationEditor<'_>) -> Result<(), StationError>,
    {
        if let Some(pending) = &self.pending {
            return Err(PlanError::PendingMove {
                station: pending.station,
            });
        }
        let len = self.stations.len();
        let target = self
            .stations
            .get_mut(station)
            .ok_or(PlanError::StationOutOfRange {
                index: station,
                len,
            })?;

        let mut editor = StationEditor::new(target);
        if let Err(e) = action(&mut editor) {
            editor.rollback();
            return Err(e.into());
        }
        let diff = editor.finish();

        self.refresh_apertures(station);
        self.pending = Some(PendingMove {
            station,
            diff: diff.clone(),
        });
        Ok(diff)
    }

    pub fn apply_candidate(&mut self, candidate: &Candidate) -> Result<Diff, PlanError> {
        self.apply(candidate.station, |editor| {
            editor
                .step_intensity(candidate.beamlet, candidate.increase)
                .map(|_| ())
        })
    }

    pub fn best_beamlets(
        &self,
        n: usize,
        nv: usize,
        mode: RankingMode,
    ) -> Result<RankedCandidates, PlanError> {
        self.get_evaluation()?;
        let candidates = self
            .ev
            .rank_candidates(&self.stations, &RankingRequest { n, nv, mode })?;
        Ok(RankedCandidates::new(candidates, n))
    }

    pub fn ls_beamlet<R: Rng>(
        &self,
        bsize: usize,
        nv: usize,
        rng: &mut R,
    ) -> Result<Candidate, PlanError> {
        let ranked = self.best_beamlets(bsize, nv, RankingMode::default())?;
        self.selection
            .select(&ranked, rng)
            .copied()
            .ok_or(PlanError::NoCandidates)
    }

    /// Takes back the pending move, or else the newest evaluated move whose
    /// cached objective is restored exactly.
    pub fn undo_last(&mut self) -> Result<(), PlanError> {
        if self.undo_pending() {
            return Ok(());
        }
        let record = self.history.pop().ok_or(PlanError::NothingToUndo)?;
        self.revert(&record)?;
        self.evaluation = Some(record.previous_evaluation);
        debug!(
            station = record.station,
            value = record.previous_evaluation,
            "Undid evaluated move."
        );
        Ok(())
    }

    /// Like [`undo_last`](Self::undo_last) but recomputes the cached objective
    /// through the inverse incremental update instead of restoring it.
    pub fn undo_last_incremental(&mut self) -> Result<(), PlanError> {
        if self.undo_pending() {
            return Ok(());
        }
        let record = self.history.pop().ok_or(PlanError::NothingToUndo)?;
        let value = self.revert(&record)?;
        self.evaluation = Some(value);
        debug!(
            station = record.station,
            value,
            restored = record.previous_evaluation,
            "Undid evaluated move incrementally."
        );
        Ok(())
    }

    pub fn commit(&mut self) {
        if !self.history.is_empty() {
            debug!(records = self.history.len(), "Committed moves.");
        }
        self.history.clear();
    }

    fn undo_pending(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        self.stations[pending.station].restore(&pending.diff);
        self.refresh_apertures(pending.station);
        debug!(station = pending.station, "Undid pending move.");
        true
    }

    fn revert(&mut self, record: &MoveRecord) -> Result<f64, PlanError> {
        let station = &mut self.stations[record.station];
        let inverse: Diff = record
            .diff
            .iter()
            .filter_map(|c| {
                station
                    .intensity(c.beamlet)
                    .map(|current| BeamletChange::new(c.beamlet, current))
            })
            .collect();
        station.restore(&record.diff);
        self.refresh_apertures(record.station);

        match self.ev.incremental_eval(&self.stations[record.station], &inverse) {
            Ok(value) => Ok(value + self.aperture_cost()),
            Err(e) => {
                self.evaluation = None;
                self.evaluated_with = None;
                self.history.clear();
                Err(e.into())
            }
        }
    }
}

impl Plan<DoseEvaluator> {
    #[instrument(skip_all, name = "plan_from_parameters")]
    pub fn from_parameters(
        weights: ObjectiveWeights,
        collimator: &Collimator,
        volumes: Vec<Volume>,
        params: &PlanParameters,
    ) -> Result<Self, PlanError> {
        params.validate()?;

        let mut plan = Self::with_weights(DoseEvaluator::new(volumes), weights)?
            .with_setup_cost(params.setup)
            .with_undo_depth(params.undo_depth)
            .with_move_selection(params.move_selection);

        let initial = params.initial_beamlet_intensity();
        for &angle in collimator.angles() {
            let station = Station::new(angle, collimator, params.limits(), initial)?;
            plan.add_station(station)?;
        }

        let value = plan.eval()?;
        info!(
            stations = plan.stations.len(),
            beamlets = plan.stations.iter().map(Station::len).sum::<usize>(),
            initial_intensity = initial,
            value,
            "Plan initialized."
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::volume::DoseTarget;
    use crate::engine::config::{ConfigError, PlanParametersBuilder};
    use crate::engine::error::EvaluationError;
    use nalgebra::DMatrix;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    const TOLERANCE: f64 = 1e-9;

    fn assert_close(a: f64, b: f64) {
        assert!(
            (a - b).abs() <= TOLERANCE * b.abs().max(1.0),
            "{} and {} differ",
            a,
            b
        );
    }

    fn volumes() -> Vec<Volume> {
        let ptv = Volume::new("PTV", 2, DoseTarget::new(1.0, 10.0, 12.0))
            .unwrap()
            .with_deposition(
                0,
                DMatrix::from_row_slice(2, 4, &[1.0, 0.5, 0.0, 0.0, 0.0, 0.5, 1.0, 0.0]),
            )
            .unwrap()
            .with_deposition(
                180,
                DMatrix::from_row_slice(2, 4, &[0.2, 0.2, 0.2, 0.2, 0.3, 0.3, 0.3, 0.3]),
            )
            .unwrap();
        let organ = Volume::new("OAR", 1, DoseTarget::new(1.0, 0.0, 2.0))
            .unwrap()
            .with_deposition(0, DMatrix::from_row_slice(1, 4, &[0.0, 0.0, 0.5, 1.0]))
            .unwrap()
            .with_deposition(180, DMatrix::from_row_slice(1, 4, &[1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        vec![ptv, organ]
    }

    fn params(max_apertures: usize) -> PlanParameters {
        PlanParametersBuilder::new()
            .max_apertures(max_apertures)
            .max_intensity(10)
            .initial_intensity(0)
            .step_intensity(2)
            .build()
            .unwrap()
    }

    fn plan_with(params: &PlanParameters) -> Plan<DoseEvaluator> {
        let collimator = Collimator::new(vec![0, 180], 1, 4).unwrap();
        let vols = volumes();
        let weights = DoseEvaluator::new(vols.clone()).default_weights();
        Plan::from_parameters(weights, &collimator, vols, params).unwrap()
    }

    fn plan() -> Plan<DoseEvaluator> {
        plan_with(&params(2))
    }

    fn intensities(plan: &Plan<DoseEvaluator>) -> Vec<Vec<i32>> {
        plan.stations()
            .iter()
            .map(|s| s.intensities().collect())
            .collect()
    }

    #[test]
    fn single_move_scenario_matches_full_eval_and_undoes() {
        let mut plan = plan();
        assert_eq!(plan.stations().len(), 2);
        assert!(plan.stations().iter().all(|s| s.len() == 4));
        let before = plan.get_evaluation().unwrap();
        assert_close(before, 100.0);

        let diff = plan.apply(0, |e| e.set_intensity(2, 4)).unwrap();
        assert_eq!(diff, vec![BeamletChange::new(2, 0)]);
        let value = plan.incremental_eval(0, &diff).unwrap();

        // Dose objective 68 plus one aperture at setup cost 6.
        assert_close(value, 74.0);
        assert_close(value, plan.clone().eval().unwrap());

        plan.undo_last().unwrap();
        assert_eq!(plan.station(0).unwrap().intensity(2), Some(0));
        assert_eq!(plan.get_evaluation().unwrap(), before);
        assert_eq!(plan.total_apertures(), 0);
    }

    #[test]
    fn evaluation_is_refused_while_a_move_is_pending() {
        let mut plan = plan();
        plan.apply(1, |e| e.set_intensity(0, 2)).unwrap();
        assert!(plan.has_pending_move());
        assert!(matches!(
            plan.get_evaluation(),
            Err(PlanError::StaleEvaluation)
        ));
        assert!(matches!(
            plan.best_beamlets(3, 0, RankingMode::Gradient),
            Err(PlanError::StaleEvaluation)
        ));
        assert!(matches!(
            plan.apply(0, |e| e.set_intensity(0, 2)),
            Err(PlanError::PendingMove { station: 1 })
        ));

        plan.evaluate_move().unwrap();
        assert!(plan.get_evaluation().is_ok());
    }

    #[test]
    fn incremental_eval_checks_the_pending_move() {
        let mut plan = plan();
        assert!(matches!(
            plan.incremental_eval(0, &[]),
            Err(PlanError::NoPendingMove)
        ));

        let diff = plan.apply(0, |e| e.set_intensity(1, 2)).unwrap();
        assert!(matches!(
            plan.incremental_eval(1, &diff),
            Err(PlanError::DiffMismatch { station: 1 })
        ));
        assert!(matches!(
            plan.incremental_eval(0, &[BeamletChange::new(3, 0)]),
            Err(PlanError::DiffMismatch { station: 0 })
        ));
        assert!(plan.incremental_eval(0, &diff).is_ok());
    }

    #[test]
    fn incremental_eval_tracks_random_local_search() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut plan = plan_with(&params(1)).with_undo_depth(3);

        for step in 0..150 {
            let candidate = match plan.ls_beamlet(4, 0, &mut rng) {
                Ok(c) => c,
                Err(PlanError::NoCandidates) => break,
                Err(e) => panic!("unexpected error: {e}"),
            };
            let diff = match plan.apply_candidate(&candidate) {
                Ok(diff) => diff,
                Err(PlanError::Station { .. }) => {
                    assert!(!plan.has_pending_move());
                    continue;
                }
                Err(e) => panic!("unexpected error: {e}"),
            };
            let value = plan.incremental_eval(candidate.station, &diff).unwrap();
            assert_close(value, plan.clone().eval().unwrap());

            if step % 4 == 3 {
                plan.undo_last().unwrap();
                assert_close(plan.get_evaluation().unwrap(), plan.clone().eval().unwrap());
            }
        }
    }

    #[test]
    fn undo_round_trip_restores_state_for_each_candidate() {
        let mut plan = plan();
        plan.apply(1, |e| e.set_intensity(0, 6)).unwrap();
        plan.eval().unwrap();

        let before_value = plan.get_evaluation().unwrap();
        let before = intensities(&plan);
        let ranked = plan.best_beamlets(8, 0, RankingMode::Gradient).unwrap();
        assert!(!ranked.is_empty());

        for candidate in &ranked {
            let diff = plan.apply_candidate(candidate).unwrap();
            plan.incremental_eval(candidate.station, &diff).unwrap();
            plan.undo_last().unwrap();
            assert_eq!(plan.get_evaluation().unwrap(), before_value);
            assert_eq!(intensities(&plan), before);
        }
    }

    #[test]
    fn undo_last_incremental_recomputes_the_objective() {
        let mut plan = plan();
        let before = plan.get_evaluation().unwrap();
        let diff = plan
            .apply(0, |e| {
                e.set_intensity(0, 4)?;
                e.set_intensity(1, 2)
            })
            .unwrap();
        plan.incremental_eval(0, &diff).unwrap();

        plan.undo_last_incremental().unwrap();
        assert_close(plan.get_evaluation().unwrap(), before);
        assert!(plan.station(0).unwrap().intensities().all(|v| v == 0));
    }

    #[test]
    fn undo_of_pending_move_keeps_cached_evaluation() {
        let mut plan = plan();
        let before = plan.get_evaluation().unwrap();
        plan.apply(0, |e| e.set_intensity(3, 8)).unwrap();
        plan.undo_last().unwrap();
        assert!(!plan.has_pending_move());
        assert_eq!(plan.get_evaluation().unwrap(), before);
        assert_eq!(plan.station(0).unwrap().intensity(3), Some(0));
    }

    #[test]
    fn undo_without_history_fails() {
        let mut plan = plan();
        assert!(matches!(plan.undo_last(), Err(PlanError::NothingToUndo)));
        assert!(matches!(
            plan.undo_last_incremental(),
            Err(PlanError::NothingToUndo)
        ));

        let diff = plan.apply(0, |e| e.set_intensity(0, 2)).unwrap();
        plan.incremental_eval(0, &diff).unwrap();
        plan.commit();
        assert!(matches!(plan.undo_last(), Err(PlanError::NothingToUndo)));
        assert_eq!(plan.station(0).unwrap().intensity(0), Some(2));
    }

    #[test]
    fn history_depth_bounds_undo() {
        let mut plan = plan();
        for beamlet in 0..2 {
            let diff = plan.apply(0, |e| e.set_intensity(beamlet, 2)).unwrap();
            plan.incremental_eval(0, &diff).unwrap();
        }
        assert_eq!(plan.history().len(), 1);
        plan.undo_last().unwrap();
        assert!(matches!(plan.undo_last(), Err(PlanError::NothingToUndo)));
        assert_eq!(plan.station(0).unwrap().intensity(0), Some(2));

        let mut deep = plan_with(&params(2)).with_undo_depth(2);
        let start = deep.get_evaluation().unwrap();
        for beamlet in 0..2 {
            let diff = deep.apply(1, |e| e.set_intensity(beamlet, 4)).unwrap();
            deep.incremental_eval(1, &diff).unwrap();
        }
        deep.undo_last().unwrap();
        deep.undo_last().unwrap();
        assert_eq!(deep.get_evaluation().unwrap(), start);
    }

    #[test]
    fn failed_action_is_rolled_back() {
        let mut plan = plan();
        let result = plan.apply(0, |e| {
            e.set_intensity(0, 2)?;
            e.set_intensity(1, 3)
        });
        assert!(matches!(
            result,
            Err(PlanError::Station {
                source: StationError::OffStep { value: 3, .. }
            })
        ));
        assert!(!plan.has_pending_move());
        assert_eq!(plan.station(0).unwrap().intensity(0), Some(0));
        assert!(plan.get_evaluation().is_ok());
    }

    #[test]
    fn apply_rejects_unknown_station() {
        let mut plan = plan();
        assert!(matches!(
            plan.apply(2, |e| e.set_intensity(0, 2)),
            Err(PlanError::StationOutOfRange { index: 2, len: 2 })
        ));
        assert!(matches!(
            plan.station(5),
            Err(PlanError::StationOutOfRange { index: 5, len: 2 })
        ));
    }

    #[test]
    fn copies_are_isolated() {
        let original = plan();
        let value = original.get_evaluation().unwrap();

        let mut copy = original.clone();
        let diff = copy.apply(0, |e| e.set_intensity(0, 10)).unwrap();
        copy.incremental_eval(0, &diff).unwrap();

        assert_eq!(original.station(0).unwrap().intensity(0), Some(0));
        assert_eq!(original.get_evaluation().unwrap(), value);
        assert_ne!(copy.get_evaluation().unwrap(), value);

        let mut target = plan();
        target.new_copy(&copy);
        assert_eq!(target.station(0).unwrap().intensity(0), Some(10));
        assert!(target.history().is_empty());
    }

    #[test]
    fn copy_taken_during_pending_move_requires_evaluation() {
        let mut plan = plan();
        plan.apply(0, |e| e.set_intensity(0, 2)).unwrap();
        let mut copy = plan.clone();
        assert!(!copy.has_pending_move());
        assert!(matches!(
            copy.get_evaluation(),
            Err(PlanError::StaleEvaluation)
        ));
        copy.eval().unwrap();
        assert!(copy.get_evaluation().is_ok());
    }

    #[test]
    fn best_beamlets_are_sorted_best_first() {
        let mut plan = plan();
        plan.apply(1, |e| e.set_intensity(0, 10)).unwrap();
        plan.eval().unwrap();

        let ranked = plan.best_beamlets(16, 0, RankingMode::Gradient).unwrap();
        assert!(ranked.len() > 1);
        for pair in ranked.as_slice().windows(2) {
            assert!(
                (pair[0].score, pair[0].increase) >= (pair[1].score, pair[1].increase),
                "{:?} ranked before {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn ls_beamlet_draws_every_candidate() {
        let plan = plan();
        let ranked = plan.best_beamlets(3, 0, RankingMode::Gradient).unwrap();
        assert_eq!(ranked.len(), 3);

        let mut rng = StdRng::seed_from_u64(42);
        let seen: HashSet<(usize, usize)> = (0..300)
            .map(|_| plan.ls_beamlet(3, 0, &mut rng).unwrap())
            .map(|c| (c.station, c.beamlet))
            .collect();
        let expected: HashSet<(usize, usize)> =
            ranked.iter().map(|c| (c.station, c.beamlet)).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn best_selection_always_returns_top_candidate() {
        let plan = plan().with_move_selection(MoveSelection::Best);
        let top = *plan
            .best_beamlets(5, 0, RankingMode::Gradient)
            .unwrap()
            .first()
            .unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            assert_eq!(plan.ls_beamlet(5, 0, &mut rng).unwrap(), top);
        }
    }

    #[test]
    fn ls_beamlet_without_candidates_fails() {
        let organ = Volume::new("OAR", 1, DoseTarget::new(1.0, 0.0, 2.0))
            .unwrap()
            .with_deposition(0, DMatrix::from_element(1, 4, 1.0))
            .unwrap();
        let collimator = Collimator::new(vec![0], 1, 4).unwrap();
        let ev = DoseEvaluator::new(vec![organ]);
        let weights = ev.default_weights();
        let plan = Plan::from_parameters(
            weights,
            &collimator,
            ev.volumes().to_vec(),
            &params(1),
        )
        .unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            plan.ls_beamlet(5, 0, &mut rng),
            Err(PlanError::NoCandidates)
        ));
    }

    #[test]
    fn construction_validates_weights() {
        assert!(matches!(
            ObjectiveWeights::new(vec![1.0, 1.0], vec![0.0, 0.0], vec![1.0]),
            Err(ConfigError::LengthMismatch { .. })
        ));

        let single = ObjectiveWeights::new(vec![1.0], vec![0.0], vec![1.0]).unwrap();
        assert!(matches!(
            Plan::with_weights(DoseEvaluator::new(volumes()), single),
            Err(PlanError::WeightsMismatch {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn from_parameters_opens_initial_apertures() {
        let params = PlanParametersBuilder::new()
            .max_apertures(2)
            .max_intensity(10)
            .initial_intensity(2)
            .build()
            .unwrap();
        let plan = plan_with(&params);
        assert!(
            plan.stations()
                .iter()
                .all(|s| s.intensities().all(|v| v == 4))
        );
        assert_eq!(plan.total_apertures(), 2);
        assert_close(
            plan.get_evaluation().unwrap(),
            plan.evaluation_function().term(0).unwrap()
                + plan.evaluation_function().term(1).unwrap()
                + 12.0,
        );
    }

    #[test]
    fn from_parameters_reports_dimension_mismatch() {
        let collimator = Collimator::new(vec![0], 1, 3).unwrap();
        let vols = volumes();
        let weights = DoseEvaluator::new(vols.clone()).default_weights();
        assert!(matches!(
            Plan::from_parameters(weights, &collimator, vols, &params(1)),
            Err(PlanError::Evaluation {
                source: EvaluationError::DimensionMismatch { .. }
            })
        ));
    }

    #[test]
    fn add_station_invalidates_evaluation() {
        let mut plan = plan();
        let collimator = Collimator::new(vec![0], 1, 4).unwrap();
        let limits = params(2).limits();
        let extra = Station::new(0, &collimator, limits, 0).unwrap();
        plan.add_station(extra).unwrap();
        assert!(matches!(
            plan.get_evaluation(),
            Err(PlanError::StaleEvaluation)
        ));
        plan.eval().unwrap();

        plan.apply(0, |e| e.set_intensity(0, 2)).unwrap();
        assert!(matches!(
            plan.add_station(Station::new(0, &collimator, limits, 0).unwrap()),
            Err(PlanError::PendingMove { station: 0 })
        ));
    }

    #[test]
    fn eval_with_other_weights_drops_history() {
        let mut plan = plan();
        let diff = plan.apply(0, |e| e.set_intensity(2, 2)).unwrap();
        plan.incremental_eval(0, &diff).unwrap();

        let same = plan.weights().clone();
        plan.eval_with(&same).unwrap();
        assert_eq!(plan.history().len(), 1);

        let other =
            ObjectiveWeights::new(vec![2.0, 1.0], vec![10.0, 0.0], vec![12.0, 2.0]).unwrap();
        plan.eval_with(&other).unwrap();
        assert!(plan.history().is_empty());
    }

    #[test]
    fn setup_cost_change_drops_history_priced_at_old_cost() {
        let mut plan = plan();
        let diff = plan.apply(0, |e| e.set_intensity(0, 4)).unwrap();
        plan.incremental_eval(0, &diff).unwrap();
        plan.commit();
        let diff = plan.apply(0, |e| e.set_intensity(0, 6)).unwrap();
        plan.incremental_eval(0, &diff).unwrap();

        let mut plan = plan.with_setup_cost(100.0);
        assert!(plan.history().is_empty());
        assert!(matches!(
            plan.get_evaluation(),
            Err(PlanError::StaleEvaluation)
        ));
        let value = plan.eval().unwrap();
        assert!(matches!(plan.undo_last(), Err(PlanError::NothingToUndo)));
        assert_eq!(plan.get_evaluation().unwrap(), value);
        assert_close(value, plan.clone().eval().unwrap());
    }

    #[test]
    fn full_eval_absorbs_pending_move() {
        let mut plan = plan();
        plan.apply(0, |e| e.set_intensity(2, 2)).unwrap();
        let value = plan.eval().unwrap();
        assert!(!plan.has_pending_move());
        assert_eq!(plan.get_evaluation().unwrap(), value);
        assert!(matches!(plan.undo_last(), Err(PlanError::NothingToUndo)));
    }
}
