//! ELM327 adapter session
//!
//! Text protocol: every command is ASCII terminated by CR, every response
//! ends with the `>` prompt. The session here owns the channel and turns
//! adapter responses into [`RawValue`]s or typed errors.

use std::io::ErrorKind;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::pid::{Pid, SupportedPids};
use super::stream::CommunicationChannel;
use super::ProtocolError;
use crate::unit_conversion::RawValue;

/// Prompt byte that terminates every adapter response
const PROMPT: u8 = b'>';

/// Sleep between empty reads
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Adapter setup: reset, echo off, linefeeds off, spaces off, headers off, auto protocol
pub const INIT_SEQUENCE: [&str; 6] = ["ATZ", "ATE0", "ATL0", "ATS0", "ATH0", "ATSP0"];

/// Responses meaning the vehicle bus is not answering
const BUS_FAILURES: [&str; 6] = [
    "UNABLE TO CONNECT",
    "BUS INIT",
    "BUS ERROR",
    "CAN ERROR",
    "STOPPED",
    "FB ERROR",
];

/// Outcome of probing the vehicle bus after the adapter handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleLink {
    /// Vehicle ECU answered `0100`
    Car(SupportedPids),
    /// Adapter answered but the vehicle did not (ignition off)
    AdapterOnly,
}

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Commands written
    pub commands: u64,
    /// Responses terminated by the prompt
    pub responses: u64,
    /// Commands that failed at transport level
    pub failures: u64,
}

/// Strip the prompt, echo-free noise and blank lines from a raw response
pub fn clean_response(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .split(['\r', '\n'])
        .map(str::trim)
        .map(|line| line.trim_end_matches('>').trim())
        .filter(|line| !line.is_empty() && !line.starts_with("SEARCHING"))
        .collect::<Vec<_>>()
        .join("\r")
}

/// Classify a cleaned PID response.
///
/// `NO DATA` means the field is missing this tick; bus failures mean the
/// whole handle is useless until the next connect.
pub fn check_response(pid: u8, cleaned: &str) -> Result<(), ProtocolError> {
    let upper = cleaned.to_ascii_uppercase();
    if let Some(failure) = BUS_FAILURES.iter().find(|f| upper.contains(*f)) {
        return Err(ProtocolError::VehicleNotResponding(failure.to_string()));
    }
    if upper.contains("NO DATA") || upper.is_empty() {
        return Err(ProtocolError::NoData(pid));
    }
    if upper == "?" {
        return Err(ProtocolError::CommandRejected(cleaned.to_string()));
    }
    Ok(())
}

/// An open ELM327 session
pub struct Elm327 {
    channel: Option<Box<dyn CommunicationChannel>>,
    timeout: Duration,
    identity: Option<String>,
    protocol_name: Option<String>,
    supported: Option<SupportedPids>,
    stats: SessionStats,
    healthy: bool,
}

impl Elm327 {
    /// Wrap an opened channel; `timeout` bounds every command
    pub fn new(channel: Box<dyn CommunicationChannel>, timeout: Duration) -> Self {
        Self {
            channel: Some(channel),
            timeout,
            identity: None,
            protocol_name: None,
            supported: None,
            stats: SessionStats::default(),
            healthy: true,
        }
    }

    /// Adapter identity string from `ATZ` (e.g. "ELM327 v1.5")
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Vehicle protocol the adapter settled on
    pub fn protocol_name(&self) -> Option<&str> {
        self.protocol_name.as_deref()
    }

    /// Supported PIDs reported by the vehicle
    pub fn supported_pids(&self) -> Option<SupportedPids> {
        self.supported
    }

    /// Diagnostic counters
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Whether the channel is open and no transport failure has been seen
    pub fn is_connected(&self) -> bool {
        self.channel.is_some() && self.healthy
    }

    /// Send a command and return the raw response up to (and including) the prompt
    pub fn command(&mut self, cmd: &str) -> Result<Vec<u8>, ProtocolError> {
        let result = self.exchange(cmd);
        if let Err(e) = &result {
            if e.is_transport() {
                self.stats.failures = self.stats.failures.saturating_add(1);
                self.healthy = false;
            }
        }
        result
    }

    fn exchange(&mut self, cmd: &str) -> Result<Vec<u8>, ProtocolError> {
        let timeout = self.timeout;
        let channel = self.channel.as_mut().ok_or(ProtocolError::NotConnected)?;

        // Leftovers from an abandoned command would be read as this reply.
        channel.clear_input_buffer()?;

        debug!(cmd, "elm327 send");
        channel.write_all(format!("{}\r", cmd).as_bytes())?;
        channel.flush()?;
        self.stats.commands = self.stats.commands.saturating_add(1);

        let mut response = Vec::new();
        let mut buffer = [0u8; 256];
        let start = Instant::now();

        loop {
            if start.elapsed() > timeout {
                debug!(cmd, bytes = response.len(), "elm327 timeout");
                return Err(ProtocolError::Timeout);
            }
            match channel.read(&mut buffer) {
                Ok(0) => return Err(ProtocolError::ConnectionFailed("adapter closed the channel".into())),
                Ok(n) => {
                    response.extend_from_slice(&buffer[..n]);
                    if response.contains(&PROMPT) {
                        break;
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(ProtocolError::IoError(e)),
            }
        }

        self.stats.responses = self.stats.responses.saturating_add(1);
        debug!(cmd, response = %clean_response(&response), "elm327 recv");
        Ok(response)
    }

    /// Run the init sequence and check the adapter identifies as an ELM327
    pub fn initialize(&mut self) -> Result<String, ProtocolError> {
        for cmd in INIT_SEQUENCE {
            let response = clean_response(&self.command(cmd)?);
            if cmd == "ATZ" {
                if !response.to_ascii_uppercase().contains("ELM327") {
                    return Err(ProtocolError::NotAnElm327(response));
                }
                self.identity = Some(response);
            } else if response.contains('?') {
                warn!(cmd, "adapter rejected init command");
            }
        }
        Ok(self.identity.clone().unwrap_or_default())
    }

    /// Ask the vehicle for its supported PIDs to tell ignition-on from ignition-off
    pub fn detect_vehicle(&mut self) -> Result<VehicleLink, ProtocolError> {
        let raw = match self.command("0100") {
            Ok(raw) => raw,
            // Some clones stay silent instead of answering UNABLE TO CONNECT.
            Err(ProtocolError::Timeout) => {
                self.healthy = true;
                return Ok(VehicleLink::AdapterOnly);
            }
            Err(e) => return Err(e),
        };
        let cleaned = clean_response(&raw);
        match check_response(0x00, &cleaned) {
            Ok(()) => {}
            Err(ProtocolError::VehicleNotResponding(_)) | Err(ProtocolError::NoData(_)) => {
                return Ok(VehicleLink::AdapterOnly)
            }
            Err(e) => return Err(e),
        }
        let supported = SupportedPids::from_response(cleaned.as_bytes())
            .ok_or_else(|| ProtocolError::InvalidResponse(cleaned.clone()))?;
        self.supported = Some(supported);
        self.protocol_name = self
            .command("ATDP")
            .ok()
            .map(|raw| clean_response(&raw))
            .filter(|name| !name.is_empty() && name != "?");
        info!(
            protocol = self.protocol_name.as_deref().unwrap_or("unknown"),
            supported = supported.count(),
            "vehicle answered"
        );
        Ok(VehicleLink::Car(supported))
    }

    /// Query one PID.
    ///
    /// `Ok(None)` when the vehicle has no value for it this time (unsupported,
    /// `NO DATA`, malformed reply). `Err` only for transport-level failures.
    pub fn query(&mut self, pid: Pid) -> Result<Option<RawValue>, ProtocolError> {
        if let Some(supported) = self.supported {
            if !supported.supports(pid.code()) {
                return Ok(None);
            }
        }
        let raw = self.command(&pid.request())?;
        let cleaned = clean_response(&raw);
        let outcome = check_response(pid.code(), &cleaned).and_then(|()| pid.parse_response(cleaned.as_bytes()));
        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_transport() => {
                self.stats.failures = self.stats.failures.saturating_add(1);
                self.healthy = false;
                Err(e)
            }
            Err(e) => {
                debug!(pid = pid.name(), error = %e, "field unavailable");
                Ok(None)
            }
        }
    }

    /// Close the session. Safe to call more than once.
    pub fn close(&mut self) -> Result<(), ProtocolError> {
        if self.channel.is_none() {
            return Ok(());
        }
        // Protocol close lets the adapter drop the bus session cleanly.
        let result = if self.healthy {
            self.exchange("ATPC").map(|_| ())
        } else {
            Ok(())
        };
        self.channel = None;
        self.healthy = false;
        result
    }
}
