//! Cursors into ordered response sequences.
//!
//! One cursor per `(test id, mock key)`, starting at 0 and advanced once per
//! selection of the owning mock.

use crate::config::RepeatMode;
use std::collections::HashMap;

/// Outcome of mapping a cursor position onto a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceSlot {
    /// Serve the response at this index.
    Index(usize),
    /// The sequence is used up; the mock sits out this round.
    Exhausted,
}

/// Map a cursor position onto an index according to the repeat policy.
pub fn resolve_index(position: usize, length: usize, repeat: RepeatMode) -> SequenceSlot {
    if length == 0 {
        return SequenceSlot::Exhausted;
    }
    match repeat {
        RepeatMode::Last => SequenceSlot::Index(position.min(length - 1)),
        RepeatMode::Cycle => SequenceSlot::Index(position % length),
        RepeatMode::None if position >= length => SequenceSlot::Exhausted,
        RepeatMode::None => SequenceSlot::Index(position),
    }
}

/// Sequence positions partitioned by test id.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    positions: HashMap<String, HashMap<String, usize>>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position, 0 if the cursor has never advanced.
    pub fn get_position(&self, test_id: &str, mock_key: &str) -> usize {
        self.positions
            .get(test_id)
            .and_then(|mocks| mocks.get(mock_key))
            .copied()
            .unwrap_or(0)
    }

    /// Advance the cursor and return the new position.
    pub fn advance(&mut self, test_id: &str, mock_key: &str) -> usize {
        let position = self
            .positions
            .entry(test_id.to_string())
            .or_default()
            .entry(mock_key.to_string())
            .or_insert(0);
        *position = position.saturating_add(1);
        *position
    }

    /// Drop every cursor belonging to `test_id`.
    pub fn reset(&mut self, test_id: &str) {
        self.positions.remove(test_id);
    }
}
