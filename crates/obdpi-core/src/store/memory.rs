//! In-memory reading store
//!
//! Bounded ring: once full, the oldest reading is evicted.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use super::{select_range, ReadingSink, StoreError};
use crate::reading::Reading;

/// One day of readings at 1 Hz
pub const DEFAULT_CAPACITY: usize = 86_400;

/// Bounded in-memory store
#[derive(Debug, Clone)]
pub struct MemoryStore {
    buffer: VecDeque<Reading>,
    capacity: usize,
}

impl MemoryStore {
    /// Create a store holding at most `capacity` readings (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
        }
    }

    /// Build a store from existing readings, keeping the newest `capacity`
    pub fn from_readings(readings: impl IntoIterator<Item = Reading>, capacity: usize) -> Self {
        let mut store = Self::new(capacity);
        for reading in readings {
            store.push(reading);
        }
        store
    }

    /// Push one reading; returns true when the oldest was evicted
    pub(crate) fn push(&mut self, reading: Reading) -> bool {
        let evicted = self.buffer.len() >= self.capacity;
        if evicted {
            self.buffer.pop_front();
        }
        self.buffer.push_back(reading);
        evicted
    }

    pub(crate) fn oldest(&self) -> Option<&Reading> {
        self.buffer.front()
    }

    /// Readings held
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// No readings held
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Maximum readings held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All readings, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.buffer.iter()
    }

    /// Drop every reading
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ReadingSink for MemoryStore {
    fn append(&mut self, reading: Reading) -> Result<(), StoreError> {
        self.push(reading);
        Ok(())
    }

    fn latest(&self) -> Result<Option<Reading>, StoreError> {
        Ok(self.buffer.back().cloned())
    }

    fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Reading>, StoreError> {
        Ok(select_range(&self.buffer, start, end))
    }

    fn recent(&self, limit: usize) -> Result<Vec<Reading>, StoreError> {
        Ok(self.buffer.iter().rev().take(limit).cloned().collect())
    }
}
