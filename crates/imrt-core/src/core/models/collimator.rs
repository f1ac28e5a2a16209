use std::collections::HashMap;
use thiserror::Error;

/// Inclusive column interval a row's leaves can open over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeafRange {
    pub from: usize,
    pub to: usize,
}

impl LeafRange {
    pub fn new(from: usize, to: usize) -> Self {
        Self { from, to }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollimatorError {
    #[error("Collimator must define at least one angle")]
    NoAngles,
    #[error("Collimator grid must have at least one row and one column (got {rows}x{columns})")]
    EmptyGrid { rows: usize, columns: usize },
    #[error("Angle {0} is defined more than once")]
    DuplicateAngle(i32),
    #[error("Angle {0} is not part of the collimator")]
    UnknownAngle(i32),
    #[error("Leaf range {from}..={to} of row {row} at angle {angle} lies outside the {columns}-column grid")]
    RangeOutOfGrid {
        angle: i32,
        row: usize,
        from: usize,
        to: usize,
        columns: usize,
    },
    #[error("Row {row} does not exist at angle {angle} (grid has {rows} rows)")]
    RowOutOfGrid { angle: i32, row: usize, rows: usize },
}

/// Multileaf collimator geometry shared by all stations of a plan.
///
/// Every angle uses the same `rows x columns` beamlet grid. By default each
/// row can open over the full width; narrower (or fully closed) rows are
/// registered per angle with [`Collimator::with_active_range`].
#[derive(Debug, Clone, PartialEq)]
pub struct Collimator {
    angles: Vec<i32>,
    rows: usize,
    columns: usize,
    active: HashMap<i32, Vec<Option<LeafRange>>>,
}

impl Collimator {
    pub fn new(angles: Vec<i32>, rows: usize, columns: usize) -> Result<Self, CollimatorError> {
        if angles.is_empty() {
            return Err(CollimatorError::NoAngles);
        }
        if rows == 0 || columns == 0 {
            return Err(CollimatorError::EmptyGrid { rows, columns });
        }
        for (i, angle) in angles.iter().enumerate() {
            if angles[..i].contains(angle) {
                return Err(CollimatorError::DuplicateAngle(*angle));
            }
        }
        Ok(Self {
            angles,
            rows,
            columns,
            active: HashMap::new(),
        })
    }

    /// Restricts (or closes, with `None`) one row of one angle.
    pub fn with_active_range(
        mut self,
        angle: i32,
        row: usize,
        range: Option<LeafRange>,
    ) -> Result<Self, CollimatorError> {
        if !self.has_angle(angle) {
            return Err(CollimatorError::UnknownAngle(angle));
        }
        if row >= self.rows {
            return Err(CollimatorError::RowOutOfGrid {
                angle,
                row,
                rows: self.rows,
            });
        }
        if let Some(r) = range {
            if r.from > r.to || r.to >= self.columns {
                return Err(CollimatorError::RangeOutOfGrid {
                    angle,
                    row,
                    from: r.from,
                    to: r.to,
                    columns: self.columns,
                });
            }
        }

        let full = LeafRange::new(0, self.columns - 1);
        let rows = self.rows;
        self.active
            .entry(angle)
            .or_insert_with(|| vec![Some(full); rows])[row] = range;
        Ok(self)
    }

    pub fn angles(&self) -> &[i32] {
        &self.angles
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn has_angle(&self, angle: i32) -> bool {
        self.angles.contains(&angle)
    }

    pub fn active_range(&self, angle: i32, row: usize) -> Option<LeafRange> {
        if row >= self.rows || !self.has_angle(angle) {
            return None;
        }
        match self.active.get(&angle) {
            Some(ranges) => ranges[row],
            None => Some(LeafRange::new(0, self.columns - 1)),
        }
    }

    /// Row-major `(row, col)` grid positions of every beamlet at `angle`.
    pub fn beamlet_positions(&self, angle: i32) -> Result<Vec<(usize, usize)>, CollimatorError> {
        if !self.has_angle(angle) {
            return Err(CollimatorError::UnknownAngle(angle));
        }
        Ok((0..self.rows)
            .filter_map(|row| self.active_range(angle, row).map(|r| (row, r)))
            .flat_map(|(row, r)| (r.from..=r.to).map(move |col| (row, col)))
            .collect())
    }
}
