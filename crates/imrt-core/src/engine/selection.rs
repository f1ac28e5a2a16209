use super::evaluation::{Candidate, RankedCandidates};
use rand::Rng;
use serde::Deserialize;

/// How a local-search move is picked from a ranked candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MoveSelection {
    #[default]
    RandomAmongBest,
    Best,
}

impl MoveSelection {
    pub fn select<'c, R: Rng>(
        &self,
        candidates: &'c RankedCandidates,
        rng: &mut R,
    ) -> Option<&'c Candidate> {
        if candidates.is_empty() {
            return None;
        }
        match self {
            MoveSelection::RandomAmongBest => candidates.get(rng.gen_range(0..candidates.len())),
            MoveSelection::Best => candidates.first(),
        }
    }
}
