//! Acquisition loop: reconnect policy and the async runner.

use chrono::{DateTime, TimeZone, Utc};
use obdpi_core::acquisition::{run, Acquisition, AcquisitionConfig};
use obdpi_core::protocol::{
    AdapterDriver, AdapterSettings, ConnectionState, Elm327Driver, ObdHandle, Pid, ProtocolError,
    ScriptedChannel, VehicleLink,
};
use obdpi_core::store::{MemoryStore, ReadingSink, StoreError};
use obdpi_core::unit_conversion::{RawUnit, RawValue};
use obdpi_core::Reading;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn ts(sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, sec).unwrap()
}

/// Counts opens/closes; handles fail at transport level while `broken` is set.
/// Query number `stall_at` (1-based, 0 = never) blocks for `stall_ms`.
#[derive(Clone, Default)]
struct CountingDriver {
    broken: Arc<AtomicBool>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    queries: Arc<AtomicUsize>,
    stall_at: Arc<AtomicUsize>,
    stall_ms: Arc<AtomicU64>,
}

impl CountingDriver {
    fn stalling(query: usize, ms: u64) -> Self {
        let driver = Self::default();
        driver.stall_at.store(query, Ordering::SeqCst);
        driver.stall_ms.store(ms, Ordering::SeqCst);
        driver
    }
}

struct CountingHandle {
    driver: CountingDriver,
    open: bool,
}

impl ObdHandle for CountingHandle {
    fn query(&mut self, pid: Pid) -> Result<Option<RawValue>, ProtocolError> {
        let n = self.driver.queries.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.driver.stall_at.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(self.driver.stall_ms.load(Ordering::SeqCst)));
        }
        if self.driver.broken.load(Ordering::SeqCst) {
            return Err(ProtocolError::VehicleNotResponding("STOPPED".into()));
        }
        Ok(match pid {
            Pid::Speed => Some(RawValue::new(48.3, RawUnit::KilometersPerHour)),
            Pid::Maf => Some(RawValue::new(5.0, RawUnit::GramsPerSecond)),
            _ => None,
        })
    }

    fn is_connected(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        if self.open {
            self.open = false;
            self.driver.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl AdapterDriver for CountingDriver {
    type Handle = CountingHandle;

    fn open(&mut self) -> Result<(CountingHandle, VehicleLink), ProtocolError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let handle = CountingHandle {
            driver: self.clone(),
            open: true,
        };
        Ok((handle, VehicleLink::Car(Default::default())))
    }
}

/// Shared sink that cancels the loop after `limit` readings
#[derive(Clone)]
struct StopAfter {
    readings: Arc<Mutex<Vec<Reading>>>,
    limit: usize,
    cancel: CancellationToken,
}

impl ReadingSink for StopAfter {
    fn append(&mut self, reading: Reading) -> Result<(), StoreError> {
        let mut readings = self.readings.lock().unwrap();
        readings.push(reading);
        if readings.len() >= self.limit {
            self.cancel.cancel();
        }
        Ok(())
    }

    fn latest(&self) -> Result<Option<Reading>, StoreError> {
        Ok(self.readings.lock().unwrap().last().cloned())
    }

    fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Reading>, StoreError> {
        Ok(self
            .readings
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .cloned()
            .collect())
    }

    fn recent(&self, limit: usize) -> Result<Vec<Reading>, StoreError> {
        Ok(self.readings.lock().unwrap().iter().rev().take(limit).cloned().collect())
    }
}

/// Records when each reading arrived; cancels after `limit`
struct Stamped {
    arrivals: Arc<Mutex<Vec<Instant>>>,
    limit: usize,
    cancel: CancellationToken,
}

impl ReadingSink for Stamped {
    fn append(&mut self, _reading: Reading) -> Result<(), StoreError> {
        let mut arrivals = self.arrivals.lock().unwrap();
        arrivals.push(Instant::now());
        if arrivals.len() >= self.limit {
            self.cancel.cancel();
        }
        Ok(())
    }

    fn latest(&self) -> Result<Option<Reading>, StoreError> {
        Ok(None)
    }

    fn range(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<Vec<Reading>, StoreError> {
        Ok(Vec::new())
    }

    fn recent(&self, _limit: usize) -> Result<Vec<Reading>, StoreError> {
        Ok(Vec::new())
    }
}

async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

fn init_logs() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn fast_config() -> AcquisitionConfig {
    AcquisitionConfig {
        tick: Duration::from_millis(5),
        reconnect_backoff: Duration::from_millis(5),
        ..AcquisitionConfig::default()
    }
}

#[test]
fn test_five_transport_failures_one_reconnect_cycle() {
    let driver = CountingDriver::default();
    let (broken, opens, closes) = (driver.broken.clone(), driver.opens.clone(), driver.closes.clone());
    let mut acq = Acquisition::new(driver, AcquisitionConfig::default());
    assert_eq!(acq.start(), ConnectionState::CarConnected);

    broken.store(true, Ordering::SeqCst);
    let mut cycles = 0;
    for sec in 0..5 {
        let reading = acq.poll(ts(sec));
        assert_eq!(reading.timestamp, ts(sec));
        if acq.reconnect_due() {
            broken.store(false, Ordering::SeqCst);
            acq.begin_reconnect();
            acq.finish_reconnect();
            cycles += 1;
        }
    }

    assert_eq!(cycles, 1);
    assert_eq!(acq.failure_count(), 0);
    assert_eq!(opens.load(Ordering::SeqCst), 2);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(acq.state(), ConnectionState::CarConnected);
}

#[test]
fn test_four_failures_do_not_reconnect() {
    let driver = CountingDriver::default();
    let broken = driver.broken.clone();
    let mut acq = Acquisition::new(driver, AcquisitionConfig::default());
    acq.start();
    broken.store(true, Ordering::SeqCst);
    for sec in 0..4 {
        acq.poll(ts(sec));
    }
    assert_eq!(acq.failure_count(), 4);
    assert!(!acq.reconnect_due());
}

#[test]
fn test_car_never_goes_straight_to_simulated() {
    let driver = CountingDriver::default();
    let broken = driver.broken.clone();
    let mut acq = Acquisition::new(driver, AcquisitionConfig::default());
    acq.start();
    broken.store(true, Ordering::SeqCst);
    for sec in 0..12 {
        acq.poll(ts(sec));
        if acq.reconnect_due() {
            acq.begin_reconnect();
            acq.finish_reconnect();
        }
    }
    let history: Vec<_> = acq.manager().transitions().copied().collect();
    assert!(history.iter().all(|(from, to)| from.can_transition_to(*to)));
    assert!(!history.contains(&(ConnectionState::CarConnected, ConnectionState::Simulated)));
}

#[test]
fn test_missing_field_does_not_discard_reading() {
    let mut acq = Acquisition::new(CountingDriver::default(), AcquisitionConfig::default());
    acq.start();
    let reading = acq.poll(ts(0));
    assert_eq!(reading.speed_mph, Some(30.0));
    assert_eq!(reading.maf_gps, Some(5.0));
    assert_eq!(reading.rpm, None);
    assert_eq!(reading.present_fields(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_appends_until_cancelled() {
    let cancel = CancellationToken::new();
    let sink = StopAfter {
        readings: Arc::new(Mutex::new(Vec::new())),
        limit: 3,
        cancel: cancel.clone(),
    };
    let readings = sink.readings.clone();
    let driver = CountingDriver::default();
    let closes = driver.closes.clone();

    let stats = tokio::time::timeout(
        Duration::from_secs(10),
        run(Acquisition::new(driver, fast_config()), sink, cancel),
    )
    .await
    .expect("loop should stop after cancellation");

    assert_eq!(stats.appended, 3);
    assert_eq!(readings.lock().unwrap().len(), 3);
    assert_eq!(closes.load(Ordering::SeqCst), 1, "handle closed on exit");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_reconnects_after_threshold() {
    init_logs();
    let cancel = CancellationToken::new();
    let sink = StopAfter {
        readings: Arc::new(Mutex::new(Vec::new())),
        limit: 7,
        cancel: cancel.clone(),
    };
    let driver = CountingDriver::default();
    driver.broken.store(true, Ordering::SeqCst);
    let opens = driver.opens.clone();

    let stats = tokio::time::timeout(
        Duration::from_secs(10),
        run(Acquisition::new(driver, fast_config()), sink, cancel),
    )
    .await
    .expect("loop should stop after cancellation");

    assert_eq!(stats.reconnects, 1);
    assert_eq!(opens.load(Ordering::SeqCst), 2);
    assert_eq!(stats.transport_failures, 7);
    // Failed ticks still produce simulated readings
    assert_eq!(stats.appended, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_cancelled_before_first_tick() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let stats = run(
        Acquisition::new(CountingDriver::default(), fast_config()),
        MemoryStore::new(16),
        cancel,
    )
    .await;
    assert_eq!(stats.appended, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_with_scripted_adapter() {
    init_logs();
    let cancel = CancellationToken::new();
    let sink = StopAfter {
        readings: Arc::new(Mutex::new(Vec::new())),
        limit: 2,
        cancel: cancel.clone(),
    };
    let readings = sink.readings.clone();
    let settings = AdapterSettings {
        timeout_ms: 200,
        ..AdapterSettings::default()
    };
    let driver = Elm327Driver::new(ScriptedChannel::elm327_car(), settings);

    tokio::time::timeout(
        Duration::from_secs(10),
        run(Acquisition::new(driver, fast_config()), sink, cancel),
    )
    .await
    .expect("loop should stop after cancellation");

    let readings = readings.lock().unwrap();
    assert_eq!(readings[0].rpm, Some(800));
    assert_eq!(readings[0].coolant_temp_f, Some(194.0));
    assert!(readings[1].timestamp >= readings[0].timestamp);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_tick_does_not_cause_catch_up_burst() {
    let tick = Duration::from_millis(50);
    let cancel = CancellationToken::new();
    let arrivals = Arc::new(Mutex::new(Vec::new()));
    let sink = Stamped {
        arrivals: arrivals.clone(),
        limit: 5,
        cancel: cancel.clone(),
    };
    // The first tick takes six periods
    let driver = CountingDriver::stalling(1, 300);
    let config = AcquisitionConfig { tick, ..fast_config() };

    tokio::time::timeout(
        Duration::from_secs(10),
        run(Acquisition::new(driver, config), sink, cancel),
    )
    .await
    .expect("loop should stop after cancellation");

    let arrivals = arrivals.lock().unwrap();
    assert_eq!(arrivals.len(), 5);
    // One late tick right after the slow one, then the regular period again
    for pair in arrivals[1..].windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_millis(35), "burst tick after {gap:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_abandons_stuck_query() {
    init_logs();
    let cancel = CancellationToken::new();
    // First query of the second tick hangs well past any reasonable shutdown
    let driver = CountingDriver::stalling(Pid::ALL.len() + 1, 1500);
    let (queries, closes) = (driver.queries.clone(), driver.closes.clone());
    let config = AcquisitionConfig {
        tick: Duration::from_millis(20),
        ..fast_config()
    };

    let task = tokio::spawn(run(
        Acquisition::new(driver, config),
        MemoryStore::new(16),
        cancel.clone(),
    ));
    wait_for("the stuck query", || queries.load(Ordering::SeqCst) > Pid::ALL.len()).await;

    let cancelled_at = Instant::now();
    cancel.cancel();
    let stats = tokio::time::timeout(Duration::from_millis(750), task)
        .await
        .expect("run should return while the query is still blocked")
        .unwrap();

    assert!(cancelled_at.elapsed() < Duration::from_millis(750));
    assert_eq!(stats.appended, 1, "abandoned tick stores nothing");
    assert_eq!(closes.load(Ordering::SeqCst), 0, "worker still owns the handle");

    // The worker drops the acquisition once the query returns
    wait_for("the handle to close", || closes.load(Ordering::SeqCst) == 1).await;
}
