//! Sensor acquisition loop
//!
//! Produces one [`Reading`] per tick from the adapter (or the simulator),
//! counts consecutive transport failures and forces a reconnect once the
//! threshold is reached.
//!
//! [`Acquisition::poll`] is synchronous and does the hardware I/O for one
//! tick. [`run`] drives it on a tokio interval, moving the blocking work to
//! the blocking pool so cancellation never waits on a stuck adapter.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::demo::DemoSimulator;
use crate::protocol::{
    AdapterDriver, ConnectionManager, ConnectionState, ObdHandle, Pid, ProtocolError,
};
use crate::reading::Reading;
use crate::store::ReadingSink;
use crate::unit_conversion::{
    normalize_maf, normalize_percent, normalize_rpm, normalize_speed, normalize_temperature,
    RawValue,
};

/// Default tick period
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Consecutive transport failures before a forced reconnect
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Wait between closing a lost handle and the next connect attempt
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Acquisition loop settings
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionConfig {
    /// Target tick period
    pub tick: Duration,
    /// Consecutive transport failures that force `close()` + `connect()`
    pub failure_threshold: u32,
    /// Pause before reconnecting
    pub reconnect_backoff: Duration,
    /// Emit simulated readings on ticks that fail at transport level
    pub simulate_on_failure: bool,
    /// Never touch hardware
    pub force_simulation: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            simulate_on_failure: true,
            force_simulation: false,
        }
    }
}

/// Counters kept across ticks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionStats {
    /// Ticks polled
    pub ticks: u64,
    /// Ticks that failed at transport level
    pub transport_failures: u64,
    /// Forced reconnect cycles
    pub reconnects: u64,
    /// Readings that came from the simulator
    pub simulated: u64,
    /// Readings accepted by the sink (set by [`run`])
    pub appended: u64,
    /// Readings the sink rejected (set by [`run`])
    pub sink_errors: u64,
}

/// Acquisition state: connection, handle, failure counter
pub struct Acquisition<D: AdapterDriver> {
    manager: ConnectionManager<D>,
    handle: Option<D::Handle>,
    simulator: DemoSimulator,
    config: AcquisitionConfig,
    failures: u32,
    stats: AcquisitionStats,
    last_timestamp: Option<DateTime<Utc>>,
    started: bool,
    cancel: Option<CancellationToken>,
}

impl<D: AdapterDriver> Acquisition<D> {
    /// Build an idle loop; nothing is opened until the first tick
    pub fn new(driver: D, config: AcquisitionConfig) -> Self {
        Self {
            manager: ConnectionManager::new(driver),
            handle: None,
            simulator: DemoSimulator::new(),
            config,
            failures: 0,
            stats: AcquisitionStats::default(),
            last_timestamp: None,
            started: false,
            cancel: None,
        }
    }

    /// Use a custom simulator for fallback readings
    pub fn with_simulator(mut self, simulator: DemoSimulator) -> Self {
        self.simulator = simulator;
        self
    }

    /// Stop issuing further queries within a tick once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Consecutive transport failures since the last clean tick or reconnect
    pub fn failure_count(&self) -> u32 {
        self.failures
    }

    /// Counters so far
    pub fn stats(&self) -> AcquisitionStats {
        self.stats
    }

    /// Loop settings
    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Connection manager (state history, attempts)
    pub fn manager(&self) -> &ConnectionManager<D> {
        &self.manager
    }

    /// Whether the initial connect has run
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Initial connect, or simulation when forced
    pub fn start(&mut self) -> ConnectionState {
        self.started = true;
        if self.config.force_simulation {
            info!("simulation forced, adapter not opened");
            return self.manager.simulate();
        }
        let (state, handle) = if self.config.simulate_on_failure {
            self.manager.connect()
        } else {
            self.manager.retry()
        };
        self.handle = handle;
        info!(state = %state, "acquisition started");
        state
    }

    /// Produce the reading for one tick stamped at `now`
    pub fn poll(&mut self, now: DateTime<Utc>) -> Reading {
        if !self.started {
            self.start();
        }
        self.stats.ticks = self.stats.ticks.saturating_add(1);
        let timestamp = self.stamp(now);

        if self.manager.state() == ConnectionState::Simulated {
            self.stats.simulated = self.stats.simulated.saturating_add(1);
            return self.simulator.generate_at(timestamp);
        }

        if !self.manager.is_healthy(self.handle.as_ref()) {
            debug!(state = %self.manager.state(), "no healthy adapter handle");
            return self.transport_failure(timestamp);
        }

        match self.query_all(timestamp) {
            Ok(reading) => {
                self.failures = 0;
                reading
            }
            Err(e) => {
                warn!(error = %e, failures = self.failures + 1, "adapter transport failure");
                self.transport_failure(timestamp)
            }
        }
    }

    /// Keep timestamps non-decreasing even if the wall clock steps back
    fn stamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut timestamp = now.trunc_subsecs(0);
        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                timestamp = last;
            }
        }
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    fn query_all(&mut self, timestamp: DateTime<Utc>) -> Result<Reading, ProtocolError> {
        let mut raw: [Option<RawValue>; 6] = [None; 6];
        let Some(handle) = self.handle.as_mut() else {
            return Err(ProtocolError::NotConnected);
        };
        for (slot, pid) in raw.iter_mut().zip(Pid::ALL) {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                break;
            }
            *slot = handle.query(pid)?;
        }

        let [rpm, speed, coolant, throttle, load, maf] = raw;
        Ok(Reading {
            rpm: normalize_rpm(rpm),
            speed_mph: normalize_speed(speed),
            coolant_temp_f: normalize_temperature(coolant),
            throttle_pct: normalize_percent(throttle),
            load_pct: normalize_percent(load),
            maf_gps: normalize_maf(maf),
            ..Reading::empty(timestamp)
        })
    }

    fn transport_failure(&mut self, timestamp: DateTime<Utc>) -> Reading {
        self.failures = self.failures.saturating_add(1);
        self.stats.transport_failures = self.stats.transport_failures.saturating_add(1);
        self.manager.mark_lost();
        if self.config.simulate_on_failure {
            self.stats.simulated = self.stats.simulated.saturating_add(1);
            self.simulator.generate_at(timestamp)
        } else {
            Reading::empty(timestamp)
        }
    }

    /// Whether the failure counter reached the threshold
    pub fn reconnect_due(&self) -> bool {
        self.manager.state() != ConnectionState::Simulated
            && self.failures >= self.config.failure_threshold
    }

    /// First half of a forced reconnect: close the current handle
    pub fn begin_reconnect(&mut self) {
        info!(failures = self.failures, "forcing adapter reconnect");
        let handle = self.handle.take();
        self.manager.close(handle);
    }

    /// Second half of a forced reconnect: connect again and reset the counter
    pub fn finish_reconnect(&mut self) -> ConnectionState {
        let (state, handle) = self.manager.retry();
        self.handle = handle;
        self.failures = 0;
        self.stats.reconnects = self.stats.reconnects.saturating_add(1);
        info!(state = %state, "reconnect finished");
        state
    }

    /// Close + backoff + connect on the current thread
    pub fn reconnect_blocking(&mut self) -> ConnectionState {
        self.begin_reconnect();
        std::thread::sleep(self.config.reconnect_backoff);
        self.finish_reconnect()
    }

    /// Close the handle. Errors are swallowed.
    pub fn shutdown(&mut self) {
        if self.handle.is_some() {
            info!("closing adapter");
        }
        let handle = self.handle.take();
        self.manager.close(handle);
    }
}

impl<D: AdapterDriver> Drop for Acquisition<D> {
    fn drop(&mut self) {
        // Reached by abandoned ticks as well as normal shutdown.
        if let Some(mut handle) = self.handle.take() {
            let _ = handle.close();
        }
    }
}

/// Run `f` on the blocking pool; `None` if cancelled first or the worker panicked
async fn off_thread<T, F>(cancel: &CancellationToken, f: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    // A finished worker wins over a cancellation that raced it.
    tokio::select! {
        biased;
        joined = task => match joined {
            Ok(value) => Some(value),
            Err(e) => {
                error!(error = %e, "acquisition worker failed");
                None
            }
        },
        _ = cancel.cancelled() => None,
    }
}

/// Drive the acquisition loop until `cancel` fires.
///
/// Ticks follow a fixed interval; a slow tick delays the schedule instead of
/// causing a burst of catch-up ticks. A cancelled in-flight tick is
/// abandoned and its reading dropped. The adapter handle is always closed.
pub async fn run<D, S>(acquisition: Acquisition<D>, sink: S, cancel: CancellationToken) -> AcquisitionStats
where
    D: AdapterDriver + 'static,
    S: ReadingSink + Send + 'static,
{
    let mut acquisition = acquisition.with_cancellation(cancel.clone());
    let mut sink = sink;
    let mut stats = acquisition.stats();

    let mut ticker = tokio::time::interval(acquisition.config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    if !acquisition.is_started() {
        acquisition = match off_thread(&cancel, move || {
            acquisition.start();
            acquisition
        })
        .await
        {
            Some(acquisition) => acquisition,
            None => return stats,
        };
    }

    // `None` when the worker still owns the acquisition; dropping it there closes the handle.
    let finished: Option<Acquisition<D>> = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Some(acquisition),
            _ = ticker.tick() => {}
        }

        let now = Utc::now();
        let worker_cancel = cancel.clone();
        let tick = off_thread(&cancel, move || {
            let reading = acquisition.poll(now);
            // A reading finished after cancellation belongs to an abandoned tick.
            let stored = (!worker_cancel.is_cancelled()).then(|| sink.append(reading));
            (acquisition, sink, stored)
        })
        .await;
        let Some((acq, snk, stored)) = tick else {
            info!("in-flight tick abandoned");
            break None;
        };
        acquisition = acq;
        sink = snk;

        let (appended, sink_errors) = (stats.appended, stats.sink_errors);
        stats = AcquisitionStats {
            appended,
            sink_errors,
            ..acquisition.stats()
        };
        match stored {
            Some(Ok(())) => stats.appended += 1,
            Some(Err(e)) => {
                stats.sink_errors += 1;
                warn!(error = %e, "failed to store reading");
            }
            None => debug!("reading dropped after cancellation"),
        }

        if !acquisition.reconnect_due() {
            continue;
        }

        acquisition = match off_thread(&cancel, move || {
            acquisition.begin_reconnect();
            acquisition
        })
        .await
        {
            Some(acquisition) => acquisition,
            None => break None,
        };

        let backoff = acquisition.config.reconnect_backoff;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Some(acquisition),
            _ = tokio::time::sleep(backoff) => {}
        }

        acquisition = match off_thread(&cancel, move || {
            acquisition.finish_reconnect();
            acquisition
        })
        .await
        {
            Some(acquisition) => acquisition,
            None => break None,
        };
        stats.reconnects = acquisition.stats().reconnects;
        // The reconnect may have taken several periods.
        ticker.reset();
    };

    if let Some(acquisition) = finished {
        acquisition.shutdown_async().await;
    }
    info!(
        ticks = stats.ticks,
        appended = stats.appended,
        reconnects = stats.reconnects,
        "acquisition stopped"
    );
    stats
}

impl<D: AdapterDriver + 'static> Acquisition<D> {
    /// Close the handle on the blocking pool
    pub async fn shutdown_async(mut self) {
        let closed = tokio::task::spawn_blocking(move || self.shutdown()).await;
        if let Err(e) = closed {
            debug!(error = %e, "shutdown worker failed");
        }
    }
}
