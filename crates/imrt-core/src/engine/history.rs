use crate::core::models::beamlet::Diff;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub struct MoveRecord {
    pub station: usize,
    pub diff: Diff,
    pub previous_evaluation: f64,
}

/// Bounded stack of evaluated moves, newest last.
///
/// Pushing onto a full history silently forgets the oldest record, so with
/// the default depth of one only the latest move can be undone.
#[derive(Debug, Clone)]
pub struct UndoHistory {
    records: VecDeque<MoveRecord>,
    depth: usize,
}

impl UndoHistory {
    pub fn new(depth: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(depth),
            depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&MoveRecord> {
        self.records.back()
    }

    /// Returns the record that fell off the bottom, if any.
    pub fn push(&mut self, record: MoveRecord) -> Option<MoveRecord> {
        if self.depth == 0 {
            return Some(record);
        }
        let dropped = if self.records.len() == self.depth {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        dropped
    }

    pub fn pop(&mut self) -> Option<MoveRecord> {
        self.records.pop_back()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
