use super::config::ConfigError;
use crate::core::models::station::StationError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Evaluation function has not computed a full evaluation yet")]
    NotInitialized,

    #[error("Expected {expected} objective terms, got {found}")]
    TermCount { expected: usize, found: usize },

    #[error("Beamlet {beamlet} does not exist at angle {angle}")]
    UnknownBeamlet { angle: i32, beamlet: usize },

    #[error(
        "Deposition matrix of volume '{volume}' at angle {angle} has {found} beamlet columns, station has {expected}"
    )]
    DimensionMismatch {
        volume: String,
        angle: i32,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Station operation failed: {source}")]
    Station {
        #[from]
        source: StationError,
    },

    #[error("Evaluation failed: {source}")]
    Evaluation {
        #[from]
        source: EvaluationError,
    },

    #[error("Plan weights have {found} terms, evaluation function expects {expected}")]
    WeightsMismatch { expected: usize, found: usize },

    #[error("Station index {index} is out of range (plan has {len} stations)")]
    StationOutOfRange { index: usize, len: usize },

    #[error("Cached evaluation is stale: a move is pending or no full evaluation was run")]
    StaleEvaluation,

    #[error("A move on station {station} is pending; evaluate or undo it first")]
    PendingMove { station: usize },

    #[error("No applied move is waiting for evaluation")]
    NoPendingMove,

    #[error("Diff for station {station} does not match the pending move")]
    DiffMismatch { station: usize },

    #[error("There is no recorded move to undo")]
    NothingToUndo,

    #[error("Candidate set is empty; no local-search move is available")]
    NoCandidates,
}
