//! Connection management
//!
//! Owns the adapter lifecycle: opening the transport, the ELM327 handshake,
//! classifying the vehicle link, health checks and closing. The consecutive
//! failure counting that forces a reconnect lives in the acquisition loop.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::elm327::{Elm327, VehicleLink};
use super::pid::Pid;
use super::serial::{clear_buffers, configure_port, open_port};
use super::stream::{CommunicationChannel, ScriptedChannel, SerialChannel, TcpChannel};
use super::{
    ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_DEVICE_PATH, DEFAULT_TCP_HOST, DEFAULT_TCP_PORT,
    DEFAULT_TIMEOUT_MS,
};
use crate::unit_conversion::RawValue;

/// Socket read timeout; the adapter timeout is enforced by the session
const TCP_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Number of state transitions kept for diagnostics
const TRANSITION_HISTORY: usize = 64;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No usable adapter handle
    Disconnected,
    /// Adapter answers but the vehicle bus does not (ignition off)
    ElmOnly,
    /// Full telemetry available
    CarConnected,
    /// Deliberate fallback to generated readings
    Simulated,
}

impl ConnectionState {
    /// Whether a hardware handle is open in this state
    pub fn has_hardware(self) -> bool {
        matches!(self, ConnectionState::ElmOnly | ConnectionState::CarConnected)
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Leaving a hardware state always goes through `Disconnected`; the one
    /// exception is an adapter-only link upgrading once the ignition is on.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Disconnected, _) => true,
            (ElmOnly, Disconnected) | (ElmOnly, CarConnected) => true,
            (CarConnected, Disconnected) => true,
            (Simulated, Disconnected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::ElmOnly => "ELM_CONNECTED",
            ConnectionState::CarConnected => "CAR_CONNECTED",
            ConnectionState::Simulated => "SIMULATED",
        };
        f.write_str(name)
    }
}

/// How the adapter is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// USB cable or Bluetooth RFCOMM binding
    #[default]
    Serial,
    /// Wi-Fi adapter
    Tcp,
}

/// Adapter connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterSettings {
    /// Serial or TCP
    pub transport: Transport,
    /// Serial device path
    pub device: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Wi-Fi adapter host
    pub host: String,
    /// Wi-Fi adapter port
    pub port: u16,
    /// Bound on every adapter command, milliseconds
    pub timeout_ms: u64,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            transport: Transport::Serial,
            device: DEFAULT_DEVICE_PATH.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            host: DEFAULT_TCP_HOST.to_string(),
            port: DEFAULT_TCP_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl AdapterSettings {
    /// Adapter command timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Human-readable adapter location for logs
    pub fn location(&self) -> String {
        match self.transport {
            Transport::Serial => self.device.clone(),
            Transport::Tcp => format!("{}:{}", self.host, self.port),
        }
    }
}

/// An open adapter handle, exclusively owned by the acquisition loop
pub trait ObdHandle: Send {
    /// Query one PID. `Ok(None)` for a field with no value this tick,
    /// `Err` only for handle-level failures.
    fn query(&mut self, pid: Pid) -> Result<Option<RawValue>, ProtocolError>;

    /// Whether the handle still reports a working link
    fn is_connected(&self) -> bool;

    /// Close the handle. Must tolerate repeated calls.
    fn close(&mut self) -> Result<(), ProtocolError>;
}

impl ObdHandle for Elm327 {
    fn query(&mut self, pid: Pid) -> Result<Option<RawValue>, ProtocolError> {
        Elm327::query(self, pid)
    }

    fn is_connected(&self) -> bool {
        Elm327::is_connected(self)
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        Elm327::close(self)
    }
}

/// Opens a handle and reports what answered
pub trait AdapterDriver: Send {
    /// Handle produced by a successful open
    type Handle: ObdHandle + 'static;

    /// Open the adapter, run the handshake and detect the vehicle
    fn open(&mut self) -> Result<(Self::Handle, VehicleLink), ProtocolError>;
}

/// Opens the byte channel to an adapter
pub trait ChannelOpener: Send {
    /// Open a fresh channel for `settings`
    fn open(&mut self, settings: &AdapterSettings) -> Result<Box<dyn CommunicationChannel>, ProtocolError>;
}

/// Opens real serial ports and sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemOpener;

impl ChannelOpener for SystemOpener {
    fn open(&mut self, settings: &AdapterSettings) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
        match settings.transport {
            Transport::Serial => {
                // An unbound rfcomm device would otherwise surface as a generic I/O error.
                if !Path::new(&settings.device).exists() {
                    return Err(ProtocolError::PortNotFound(settings.device.clone()));
                }
                let mut port = open_port(&settings.device, Some(settings.baud_rate))?;
                configure_port(port.as_mut())?;
                clear_buffers(port.as_mut())?;
                Ok(Box::new(SerialChannel::new(port)))
            }
            Transport::Tcp => {
                let location = settings.location();
                let addr = (settings.host.as_str(), settings.port)
                    .to_socket_addrs()
                    .map_err(|e| ProtocolError::ConnectionFailed(format!("{}: {}", location, e)))?
                    .next()
                    .ok_or_else(|| ProtocolError::PortNotFound(location.clone()))?;
                let stream = TcpStream::connect_timeout(&addr, settings.timeout())
                    .map_err(|e| ProtocolError::ConnectionFailed(format!("{}: {}", location, e)))?;
                stream.set_nodelay(true)?;
                let mut channel = TcpChannel::new(stream);
                channel.set_timeout(TCP_READ_TIMEOUT)?;
                Ok(Box::new(channel))
            }
        }
    }
}

impl ChannelOpener for ScriptedChannel {
    fn open(&mut self, _settings: &AdapterSettings) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
        Ok(Box::new(self.clone()))
    }
}

/// ELM327 driver over any channel opener
pub struct Elm327Driver<O = SystemOpener> {
    opener: O,
    settings: AdapterSettings,
}

impl Elm327Driver<SystemOpener> {
    /// Driver for real hardware
    pub fn system(settings: AdapterSettings) -> Self {
        Self::new(SystemOpener, settings)
    }
}

impl<O: ChannelOpener> Elm327Driver<O> {
    /// Driver opening channels through `opener`
    pub fn new(opener: O, settings: AdapterSettings) -> Self {
        Self { opener, settings }
    }

    /// Settings used for every open
    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }
}

impl<O: ChannelOpener> AdapterDriver for Elm327Driver<O> {
    type Handle = Elm327;

    fn open(&mut self) -> Result<(Elm327, VehicleLink), ProtocolError> {
        let channel = self.opener.open(&self.settings)?;
        let mut elm = Elm327::new(channel, self.settings.timeout());
        let link = elm.initialize().and_then(|identity| {
            debug!(identity = %identity, "adapter identified");
            elm.detect_vehicle()
        });
        match link {
            Ok(link) => Ok((elm, link)),
            Err(e) => {
                let _ = elm.close();
                Err(e)
            }
        }
    }
}

/// Connection lifecycle over an [`AdapterDriver`]
pub struct ConnectionManager<D: AdapterDriver> {
    driver: D,
    state: ConnectionState,
    attempts: u64,
    history: VecDeque<(ConnectionState, ConnectionState)>,
}

impl<D: AdapterDriver> ConnectionManager<D> {
    /// Disconnected manager around `driver`
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            state: ConnectionState::Disconnected,
            attempts: 0,
            history: VecDeque::with_capacity(TRANSITION_HISTORY),
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of connect attempts made so far
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Recent state transitions, oldest first
    pub fn transitions(&self) -> impl Iterator<Item = &(ConnectionState, ConnectionState)> {
        self.history.iter()
    }

    /// Access the driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    fn transition(&mut self, next: ConnectionState) {
        if next == self.state {
            return;
        }
        if !self.state.can_transition_to(next) {
            // Route through Disconnected rather than skipping it.
            self.transition(ConnectionState::Disconnected);
        }
        debug!(from = %self.state, to = %next, "connection state");
        if self.history.len() == TRANSITION_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back((self.state, next));
        self.state = next;
    }

    /// Initial connect. Any failure falls back to `Simulated` so startup never
    /// blocks on missing hardware.
    pub fn connect(&mut self) -> (ConnectionState, Option<D::Handle>) {
        self.attempt(ConnectionState::Simulated)
    }

    /// Connect attempt after a lost link. Failure stays `Disconnected`.
    pub fn retry(&mut self) -> (ConnectionState, Option<D::Handle>) {
        self.attempt(ConnectionState::Disconnected)
    }

    fn attempt(&mut self, fallback: ConnectionState) -> (ConnectionState, Option<D::Handle>) {
        if self.state == ConnectionState::Simulated || self.state == ConnectionState::CarConnected {
            self.transition(ConnectionState::Disconnected);
        }
        self.attempts = self.attempts.saturating_add(1);

        match self.driver.open() {
            Ok((handle, VehicleLink::Car(supported))) => {
                info!(supported = supported.count(), "vehicle connected");
                self.transition(ConnectionState::CarConnected);
                (self.state, Some(handle))
            }
            Ok((handle, VehicleLink::AdapterOnly)) => {
                info!("adapter connected, vehicle not responding (ignition off?)");
                self.transition(ConnectionState::ElmOnly);
                (self.state, Some(handle))
            }
            Err(e) => {
                if e.is_unavailable() {
                    info!(error = %e, fallback = %fallback, "adapter unavailable");
                } else {
                    warn!(error = %e, fallback = %fallback, "adapter connect failed");
                }
                self.transition(ConnectionState::Disconnected);
                self.transition(fallback);
                (self.state, None)
            }
        }
    }

    /// Switch to generated readings without touching hardware
    pub fn simulate(&mut self) -> ConnectionState {
        self.transition(ConnectionState::Disconnected);
        self.transition(ConnectionState::Simulated);
        self.state
    }

    /// Whether `handle` is present and still reports a working link
    pub fn is_healthy(&self, handle: Option<&D::Handle>) -> bool {
        self.state.has_hardware() && handle.is_some_and(|h| h.is_connected())
    }

    /// Record that the link was lost (failed health check or transport error)
    pub fn mark_lost(&mut self) {
        if self.state.has_hardware() {
            warn!(state = %self.state, "adapter link lost");
            self.transition(ConnectionState::Disconnected);
        }
    }

    /// Close a handle. Idempotent; errors are logged and swallowed.
    pub fn close(&mut self, handle: Option<D::Handle>) {
        if let Some(mut handle) = handle {
            if let Err(e) = handle.close() {
                debug!(error = %e, "error while closing adapter (ignored)");
            }
        }
        if self.state.has_hardware() {
            self.transition(ConnectionState::Disconnected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MissingAdapter;

    impl ChannelOpener for MissingAdapter {
        fn open(&mut self, settings: &AdapterSettings) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
            Err(ProtocolError::PortNotFound(settings.device.clone()))
        }
    }

    fn fast_settings() -> AdapterSettings {
        AdapterSettings {
            timeout_ms: 50,
            ..AdapterSettings::default()
        }
    }

    fn manager(script: &ScriptedChannel) -> ConnectionManager<Elm327Driver<ScriptedChannel>> {
        ConnectionManager::new(Elm327Driver::new(script.clone(), fast_settings()))
    }

    #[test]
    fn test_transition_table() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition_to(Simulated));
        assert!(ElmOnly.can_transition_to(CarConnected));
        assert!(!CarConnected.can_transition_to(Simulated));
        assert!(!CarConnected.can_transition_to(ElmOnly));
        assert!(!Simulated.can_transition_to(CarConnected));
    }

    #[test]
    fn test_connect_car() {
        let script = ScriptedChannel::elm327_car();
        let mut mgr = manager(&script);
        let (state, handle) = mgr.connect();
        assert_eq!(state, ConnectionState::CarConnected);
        assert!(mgr.is_healthy(handle.as_ref()));
    }

    #[test]
    fn test_connect_ignition_off() {
        let script = ScriptedChannel::elm327_ignition_off();
        let mut mgr = manager(&script);
        let (state, handle) = mgr.connect();
        assert_eq!(state, ConnectionState::ElmOnly);
        assert!(handle.is_some());
    }

    #[test]
    fn test_missing_adapter_falls_back_to_simulation() {
        let mut mgr = ConnectionManager::new(Elm327Driver::new(MissingAdapter, fast_settings()));
        let (state, handle) = mgr.connect();
        assert_eq!(state, ConnectionState::Simulated);
        assert!(handle.is_none());
        assert!(!mgr.is_healthy(handle.as_ref()));
    }

    #[test]
    fn test_retry_failure_stays_disconnected() {
        let mut mgr = ConnectionManager::new(Elm327Driver::new(MissingAdapter, fast_settings()));
        let (state, _) = mgr.retry();
        assert_eq!(state, ConnectionState::Disconnected);
        assert_eq!(mgr.attempts(), 1);
    }

    #[test]
    fn test_wrong_device_falls_back() {
        let script = ScriptedChannel::new();
        script.reply("ATZ", "OK");
        let mut mgr = manager(&script);
        assert_eq!(mgr.connect().0, ConnectionState::Simulated);
    }

    #[test]
    fn test_close_is_idempotent() {
        let script = ScriptedChannel::elm327_car();
        let mut mgr = manager(&script);
        let (_, handle) = mgr.connect();
        mgr.close(handle);
        mgr.close(None);
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_close_swallows_errors() {
        let script = ScriptedChannel::elm327_car();
        let mut mgr = manager(&script);
        let (_, handle) = mgr.connect();
        script.set_broken(true);
        mgr.close(handle);
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_ignition_on_after_reconnect() {
        let script = ScriptedChannel::elm327_ignition_off();
        let mut mgr = manager(&script);
        let (state, handle) = mgr.connect();
        assert_eq!(state, ConnectionState::ElmOnly);

        mgr.close(handle);
        // Ignition on
        script.reply("0100", "41 00 BE 3F B8 11");
        let (state, _) = mgr.retry();
        assert_eq!(state, ConnectionState::CarConnected);
    }

    #[test]
    fn test_car_never_goes_straight_to_simulated() {
        let script = ScriptedChannel::elm327_car();
        let mut mgr = manager(&script);
        let (_, handle) = mgr.connect();
        mgr.mark_lost();
        mgr.close(handle);
        mgr.simulate();

        let transitions: Vec<_> = mgr.transitions().copied().collect();
        assert!(transitions
            .iter()
            .all(|(from, to)| from.can_transition_to(*to)));
        assert!(!transitions.contains(&(ConnectionState::CarConnected, ConnectionState::Simulated)));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ConnectionState::ElmOnly.to_string(), "ELM_CONNECTED");
        assert_eq!(ConnectionState::CarConnected.to_string(), "CAR_CONNECTED");
    }
}
