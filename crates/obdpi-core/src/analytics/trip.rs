//! Trip bracketing
//!
//! A [`Trip`] is a start/end pair; at most one trip is in progress at a time.
//! [`TripTracker`] owns that single trip and is serializable so a separate
//! trigger process can persist it between invocations.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use super::summary::{summarize_trip, SummaryOptions, TripReport};
use crate::store::{ReadingSink, StoreError};

/// A start/end time bracket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    /// Second-resolution start
    pub start: DateTime<Utc>,
    /// `None` while the trip is in progress
    pub end: Option<DateTime<Utc>>,
}

impl Trip {
    /// Start a trip at `at` (truncated to whole seconds)
    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            start: at.trunc_subsecs(0),
            end: None,
        }
    }

    /// No end set yet
    pub fn is_active(&self) -> bool {
        self.end.is_none()
    }

    /// Whether `timestamp` falls inside the closed bracket
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && self.end.map_or(true, |end| timestamp <= end)
    }

    /// Length in seconds once ended
    pub fn duration_seconds(&self) -> Option<f64> {
        self.end
            .map(|end| (end - self.start).num_milliseconds() as f64 / 1000.0)
    }
}

/// Result of an end signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripEnd {
    /// The in-progress trip was closed
    Ended(Trip),
    /// No trip was in progress; nothing changed
    NotActive,
}

/// Holds the single in-progress (or last finished) trip
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripTracker {
    current: Option<Trip>,
}

impl TripTracker {
    /// Tracker with no trip
    pub fn new() -> Self {
        Self::default()
    }

    /// The current or most recent trip
    pub fn current(&self) -> Option<&Trip> {
        self.current.as_ref()
    }

    /// A trip is in progress
    pub fn is_active(&self) -> bool {
        self.current.is_some_and(|t| t.is_active())
    }

    /// Start a trip. Starting while one is active resets its start time.
    pub fn start_trip(&mut self, now: DateTime<Utc>) -> Trip {
        if self.is_active() {
            info!("trip already active, restarting");
        }
        let trip = Trip::starting_at(now);
        self.current = Some(trip);
        info!(start = %trip.start, "trip started");
        trip
    }

    /// End the active trip. Ending with no active trip is a no-op.
    pub fn end_trip(&mut self, now: DateTime<Utc>) -> TripEnd {
        match self.current.as_mut() {
            Some(trip) if trip.is_active() => {
                // A clock step back must not produce end < start.
                let end = now.trunc_subsecs(0).max(trip.start);
                trip.end = Some(end);
                info!(start = %trip.start, end = %end, "trip ended");
                TripEnd::Ended(*trip)
            }
            _ => {
                warn!("no trip was active");
                TripEnd::NotActive
            }
        }
    }

    /// Summarize the current trip from the readings in `store`
    pub fn report<S: ReadingSink + ?Sized>(
        &self,
        store: &S,
        options: &SummaryOptions,
    ) -> Result<TripReport, StoreError> {
        let readings = match self.current {
            Some(Trip {
                start,
                end: Some(end),
            }) => store.range(start, end)?,
            _ => Vec::new(),
        };
        Ok(summarize_trip(self.current.as_ref(), &readings, options))
    }

    /// Load persisted state; a missing file is an empty tracker
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| StoreError::Malformed {
            path: path.to_path_buf(),
            line: e.line(),
            message: e.to_string(),
        })
    }

    /// Persist as JSON, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| StoreError::io(path, e))
    }
}
