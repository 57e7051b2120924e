//! Sink used by `run`: persist, echo to stdout, stop after N readings

use chrono::{DateTime, Utc};
use obdpi_core::store::{JsonLinesStore, ReadingSink, StoreError};
use obdpi_core::Reading;
use std::io::{self, Write};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct EchoSink {
    store: JsonLinesStore,
    remaining: Option<u64>,
    cancel: CancellationToken,
}

impl EchoSink {
    pub fn new(store: JsonLinesStore, count: Option<u64>, cancel: CancellationToken) -> Self {
        Self {
            store,
            remaining: count,
            cancel,
        }
    }
}

impl ReadingSink for EchoSink {
    fn append(&mut self, reading: Reading) -> Result<(), StoreError> {
        let line = reading.to_json_line()?;
        self.store.append(reading)?;

        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{line}").and_then(|()| stdout.flush()) {
            // Closed pipe (e.g. `| head`): keep logging to the file.
            debug!(error = %e, "stdout echo failed");
        }

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.cancel.cancel();
            }
        }
        Ok(())
    }

    fn latest(&self) -> Result<Option<Reading>, StoreError> {
        self.store.latest()
    }

    fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Reading>, StoreError> {
        self.store.range(start, end)
    }

    fn recent(&self, limit: usize) -> Result<Vec<Reading>, StoreError> {
        self.store.recent(limit)
    }
}
