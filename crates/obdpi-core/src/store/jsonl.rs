//! Newline-delimited JSON store
//!
//! One reading per line in the wire shape. A line only counts once its
//! newline is on disk: a torn final line (writer killed mid-append) is
//! skipped by readers and cut off by the next writer that opens the file.
//!
//! The writer keeps only the newest readings in memory; queries that reach
//! further back stream the file.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::memory::{MemoryStore, DEFAULT_CAPACITY};
use super::{select_range, ReadingSink, StoreError};
use crate::reading::{Reading, CSV_HEADERS};

/// Append-only JSON-lines file with a bounded in-memory index of recent readings.
///
/// Only the single writer should `open` a store; other processes read the
/// file with [`JsonLinesStore::load`].
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    file: File,
    index: MemoryStore,
    /// The index no longer holds the whole file
    evicted: bool,
    total: usize,
}

impl JsonLinesStore {
    /// Open (or create) a store with the default index capacity
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::open_with_capacity(path, DEFAULT_CAPACITY)
    }

    /// Open (or create) a store, validating existing readings and keeping
    /// the newest `capacity` of them in memory.
    ///
    /// A torn final line is truncated so the next append starts on a fresh line.
    pub fn open_with_capacity<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let mut index = MemoryStore::new(capacity);
        let mut evicted = false;
        let mut total = 0usize;
        let valid_len = if path.exists() {
            scan(&path, |reading| {
                evicted |= index.push(reading);
                total += 1;
                Ok(())
            })?
        } else {
            0
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        let on_disk = file.metadata().map_err(|e| StoreError::io(&path, e))?.len();
        if on_disk > valid_len {
            warn!(
                path = %path.display(),
                bytes = on_disk - valid_len,
                "truncating torn final line"
            );
            file.set_len(valid_len).map_err(|e| StoreError::io(&path, e))?;
        }

        debug!(path = %path.display(), readings = total, "opened reading store");
        Ok(Self {
            path,
            file,
            index,
            evicted,
            total,
        })
    }

    /// Read every reading from a file without opening it for writing
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<Reading>, StoreError> {
        let mut readings = Vec::new();
        scan(path.as_ref(), |reading| {
            readings.push(reading);
            Ok(())
        })?;
        Ok(readings)
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Readings in the file, including those no longer indexed
    pub fn len(&self) -> usize {
        self.total
    }

    /// No readings stored
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Readings held in memory, oldest first
    pub fn indexed(&self) -> impl Iterator<Item = &Reading> {
        self.index.iter()
    }

    /// Write every stored reading to a CSV file
    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<usize, StoreError> {
        let out = path.as_ref();
        let file = File::create(out).map_err(|e| StoreError::io(out, e))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", CSV_HEADERS.join(",")).map_err(|e| StoreError::io(out, e))?;

        let mut rows = 0usize;
        scan(&self.path, |reading| {
            rows += 1;
            writeln!(writer, "{}", reading.to_csv_row()).map_err(|e| StoreError::io(out, e))
        })?;
        writer.flush().map_err(|e| StoreError::io(out, e))?;
        Ok(rows)
    }
}

impl ReadingSink for JsonLinesStore {
    fn append(&mut self, reading: Reading) -> Result<(), StoreError> {
        let mut line = reading.to_json_line()?;
        line.push('\n');
        // Single write so concurrent readers see whole lines.
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|e| StoreError::io(&self.path, e))?;
        self.evicted |= self.index.push(reading);
        self.total += 1;
        Ok(())
    }

    fn latest(&self) -> Result<Option<Reading>, StoreError> {
        self.index.latest()
    }

    fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Reading>, StoreError> {
        let indexed = !self.evicted || self.index.oldest().is_some_and(|r| r.timestamp <= start);
        if indexed {
            return self.index.range(start, end);
        }
        let mut selected = Vec::new();
        scan(&self.path, |reading| {
            if reading.timestamp >= start && reading.timestamp <= end {
                selected.push(reading);
            }
            Ok(())
        })?;
        Ok(selected)
    }

    fn recent(&self, limit: usize) -> Result<Vec<Reading>, StoreError> {
        if !self.evicted || limit <= self.index.len() {
            return self.index.recent(limit);
        }
        let mut newest = VecDeque::with_capacity(limit.min(self.total));
        scan(&self.path, |reading| {
            if newest.len() == limit {
                newest.pop_front();
            }
            newest.push_back(reading);
            Ok(())
        })?;
        Ok(newest.into_iter().rev().collect())
    }
}

/// Stream the complete readings of `path` into `visit`.
///
/// Returns the byte length of the valid prefix: everything up to the last
/// newline-terminated line.
fn scan<F>(path: &Path, mut visit: F) -> Result<u64, StoreError>
where
    F: FnMut(Reading) -> Result<(), StoreError>,
{
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut valid_len = 0u64;
    let mut number = 0usize;

    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| StoreError::io(path, e))?;
        if n == 0 {
            break;
        }
        number += 1;
        if !line.ends_with('\n') {
            warn!(path = %path.display(), line = number, "skipping torn final line");
            break;
        }
        valid_len += n as u64;
        if line.trim().is_empty() {
            continue;
        }
        let reading = Reading::from_json(&line).map_err(|e| StoreError::Malformed {
            path: path.to_path_buf(),
            line: number,
            message: e.to_string(),
        })?;
        visit(reading)?;
    }
    Ok(valid_len)
}

/// Write readings to a CSV file with a header row
pub fn write_csv<P: AsRef<Path>>(path: P, readings: &[Reading]) -> Result<(), StoreError> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| StoreError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    write_rows(&mut writer, readings).map_err(|e| StoreError::io(path, e))
}

fn write_rows<W: Write>(writer: &mut W, readings: &[Reading]) -> io::Result<()> {
    writeln!(writer, "{}", CSV_HEADERS.join(","))?;
    for reading in readings {
        writeln!(writer, "{}", reading.to_csv_row())?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn reading(sec: i64) -> Reading {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        Reading {
            rpm: Some(800 + sec as u32),
            ..Reading::empty(base + Duration::seconds(sec))
        }
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("readings.jsonl");
        {
            let mut store = JsonLinesStore::open(&path).unwrap();
            for sec in 0..3 {
                store.append(reading(sec)).unwrap();
            }
        }
        let store = JsonLinesStore::open(&path).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.latest().unwrap(), Some(reading(2)));
    }

    #[test]
    fn test_malformed_line_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        let good = reading(0).to_json_line().unwrap();
        fs::write(&path, format!("{good}\nnot json\n{good}\n")).unwrap();
        match JsonLinesStore::open(&path) {
            Err(StoreError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed error, got {other:?}"),
        }
    }

    #[test]
    fn test_torn_final_line_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        let good = reading(0).to_json_line().unwrap();
        fs::write(&path, format!("{good}\n{{\"timestamp\":\"2024-")).unwrap();
        assert_eq!(JsonLinesStore::load(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_append_after_torn_line_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        let good = reading(0).to_json_line().unwrap();
        fs::write(&path, format!("{good}\n{{\"timestamp\":\"2024-")).unwrap();

        {
            let mut store = JsonLinesStore::open(&path).unwrap();
            assert_eq!(store.len(), 1);
            store.append(reading(1)).unwrap();
        }
        {
            let mut store = JsonLinesStore::open(&path).unwrap();
            assert_eq!(store.len(), 2);
            store.append(reading(2)).unwrap();
        }
        let store = JsonLinesStore::open(&path).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(
            JsonLinesStore::load(&path).unwrap(),
            vec![reading(0), reading(1), reading(2)]
        );
        assert!(fs::read_to_string(&path).unwrap().ends_with('\n'));
    }

    #[test]
    fn test_index_is_bounded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        let mut store = JsonLinesStore::open_with_capacity(&path, 4).unwrap();
        for sec in 0..10 {
            store.append(reading(sec)).unwrap();
        }
        assert_eq!(store.len(), 10);
        assert_eq!(store.indexed().count(), 4);
        assert_eq!(store.latest().unwrap(), Some(reading(9)));

        // Older than the index: served from the file
        let early = store.range(reading(1).timestamp, reading(3).timestamp).unwrap();
        assert_eq!(early, vec![reading(1), reading(2), reading(3)]);
        let recent = store.recent(6).unwrap();
        assert_eq!(recent.len(), 6);
        assert_eq!(recent[0], reading(9));
        assert_eq!(recent[5], reading(4));

        let reopened = JsonLinesStore::open_with_capacity(&path, 4).unwrap();
        assert_eq!(reopened.len(), 10);
        assert_eq!(reopened.indexed().count(), 4);
    }

    #[test]
    fn test_export_csv() {
        let dir = tempdir().unwrap();
        let mut store = JsonLinesStore::open_with_capacity(dir.path().join("r.jsonl"), 1).unwrap();
        store.append(reading(0)).unwrap();
        store.append(reading(1)).unwrap();
        let out = dir.path().join("out.csv");
        assert_eq!(store.export_csv(&out).unwrap(), 2);
        let csv = fs::read_to_string(&out).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("timestamp,rpm,speed_mph,coolant_temp_f,throttle_pct,load_pct,maf_gps"));
        assert_eq!(lines.next(), Some("2024-05-01T10:00:00+00:00,800,,,,,"));
        assert_eq!(lines.next(), Some("2024-05-01T10:00:01+00:00,801,,,,,"));
    }
}
