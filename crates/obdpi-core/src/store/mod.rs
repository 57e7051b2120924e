//! Reading storage
//!
//! The acquisition loop hands each reading to a [`ReadingSink`]; analytics
//! and display code query the same sink for closed time ranges.

mod error;
mod jsonl;
mod memory;

pub use error::StoreError;
pub use jsonl::{write_csv, JsonLinesStore};
pub use memory::{MemoryStore, DEFAULT_CAPACITY};

use chrono::{DateTime, Duration, Utc};

use crate::reading::Reading;

/// Append-only store of readings ordered by timestamp
pub trait ReadingSink {
    /// Store one reading
    fn append(&mut self, reading: Reading) -> Result<(), StoreError>;

    /// Most recent reading, if any
    fn latest(&self) -> Result<Option<Reading>, StoreError>;

    /// Readings with `start <= timestamp <= end`, oldest first
    fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Reading>, StoreError>;

    /// Up to `limit` readings, newest first
    fn recent(&self, limit: usize) -> Result<Vec<Reading>, StoreError>;
}

impl<S: ReadingSink + ?Sized> ReadingSink for Box<S> {
    fn append(&mut self, reading: Reading) -> Result<(), StoreError> {
        (**self).append(reading)
    }

    fn latest(&self) -> Result<Option<Reading>, StoreError> {
        (**self).latest()
    }

    fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Reading>, StoreError> {
        (**self).range(start, end)
    }

    fn recent(&self, limit: usize) -> Result<Vec<Reading>, StoreError> {
        (**self).recent(limit)
    }
}

/// Readings from the last `seconds` before `now`, newest first
pub fn recent_window<S: ReadingSink + ?Sized>(
    store: &S,
    now: DateTime<Utc>,
    seconds: u32,
) -> Result<Vec<Reading>, StoreError> {
    let cutoff = now - Duration::seconds(i64::from(seconds));
    let mut readings = store.range(cutoff, now)?;
    readings.reverse();
    Ok(readings)
}

/// Select the readings inside `[start, end]` from a timestamp-ordered slice
pub(crate) fn select_range<'a, I>(readings: I, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Reading>
where
    I: IntoIterator<Item = &'a Reading>,
{
    readings
        .into_iter()
        .filter(|r| r.timestamp >= start && r.timestamp <= end)
        .cloned()
        .collect()
}
