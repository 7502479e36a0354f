//! Bounded window of recent iterates.

use std::collections::VecDeque;

use dpfl_core::{mean_vector, FedError, Result, Vector};

/// The most recent iterates, oldest first.
///
/// Losses are evaluated at the mean of the window rather than the last
/// iterate, which smooths trajectories that oscillate under noise.
#[derive(Clone, Debug, PartialEq)]
pub struct IterateWindow {
    capacity: usize,
    entries: VecDeque<Vector>,
}

impl IterateWindow {
    /// Create a window holding `initial` as its only entry.
    pub fn new(capacity: usize, initial: Vector) -> Result<Self> {
        if capacity == 0 {
            return Err(FedError::invalid("averaging window must hold at least one iterate"));
        }
        let mut entries = VecDeque::with_capacity(capacity);
        entries.push_back(initial);
        Ok(Self { capacity, entries })
    }

    /// Append an iterate, evicting the oldest when full.
    pub fn push(&mut self, w: Vector) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(w);
    }

    /// Most recent iterate.
    pub fn latest(&self) -> &Vector {
        // Never empty: constructed with one entry and push only replaces.
        &self.entries[self.entries.len() - 1]
    }

    /// Element-wise mean of the retained iterates.
    pub fn average(&self) -> Vector {
        mean_vector(self.entries.iter()).unwrap_or_else(|| self.latest().clone())
    }

    /// Number of retained iterates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of retained iterates.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retained iterates, oldest first.
    pub fn into_vec(self) -> Vec<Vector> {
        self.entries.into()
    }
}
