/// One addressable ray position of a station's collimator grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beamlet {
    pub row: usize,
    pub col: usize,
    pub(crate) intensity: i32,
}

impl Beamlet {
    pub(crate) fn new(row: usize, col: usize, intensity: i32) -> Self {
        Self {
            row,
            col,
            intensity,
        }
    }

    #[inline]
    pub fn intensity(&self) -> i32 {
        self.intensity
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.intensity > 0
    }
}

/// The intensity a beamlet had before a move touched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BeamletChange {
    pub beamlet: usize,
    pub previous: i32,
}

impl BeamletChange {
    pub fn new(beamlet: usize, previous: i32) -> Self {
        Self { beamlet, previous }
    }
}

/// Ordered list of changes needed to reverse one move.
pub type Diff = Vec<BeamletChange>;

/// Keeps only the first change recorded for each beamlet, which holds the
/// intensity from before the whole move.
pub fn coalesce(diff: &[BeamletChange]) -> Diff {
    let mut out: Diff = Vec::with_capacity(diff.len());
    for change in diff {
        if !out.iter().any(|c| c.beamlet == change.beamlet) {
            out.push(*change);
        }
    }
    out
}
