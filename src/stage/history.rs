//! Bounded transition history used by the cycle heuristics.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::phase::Phase;

/// Default number of records kept before the oldest is dropped.
pub const DEFAULT_HISTORY_CAPACITY: usize = 30;

/// A single accepted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRecord {
    /// Phase that was entered
    pub phase: Phase,
    /// When it was entered
    pub at: Instant,
}

impl TransitionRecord {
    pub fn new(phase: Phase, at: Instant) -> Self {
        Self { phase, at }
    }

    /// Check if the record is younger than `window` as seen from `now`.
    pub fn is_within(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.at) < window
    }
}

/// Append-only ring buffer of transition records.
///
/// Never replayed or persisted; only inspected for recent patterns.
#[derive(Debug, Clone)]
pub struct StageHistory {
    records: VecDeque<TransitionRecord>,
    capacity: usize,
}

impl Default for StageHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl StageHistory {
    /// Create an empty history. A capacity of zero is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Build a history from records, oldest first. Extra records are trimmed.
    pub fn from_records(capacity: usize, records: impl IntoIterator<Item = TransitionRecord>) -> Self {
        let mut history = Self::with_capacity(capacity);
        for record in records {
            history.push(record);
        }
        history
    }

    /// Append a record, dropping the oldest one when full.
    pub fn push(&mut self, record: TransitionRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All records, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TransitionRecord> {
        self.records.iter()
    }

    /// Phases of the records younger than `window`, oldest first.
    pub fn recent_phases(&self, now: Instant, window: Duration) -> Vec<Phase> {
        self.records
            .iter()
            .filter(|r| r.is_within(now, window))
            .map(|r| r.phase)
            .collect()
    }

    /// Number of times `phase` was entered within `window`.
    pub fn count_recent(&self, phase: Phase, now: Instant, window: Duration) -> usize {
        self.records
            .iter()
            .filter(|r| r.phase == phase && r.is_within(now, window))
            .count()
    }
}
