//! Byte channels to the adapter
//!
//! ELM327 adapters show up either as a serial device (USB or Bluetooth
//! RFCOMM) or as a TCP socket (Wi-Fi adapters). Both are hidden behind
//! [`CommunicationChannel`].

use serialport::SerialPort;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Abstraction for communication channels (Serial or TCP)
pub trait CommunicationChannel: Read + Write + Send {
    /// Set timeout for read/write operations
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard anything waiting in the input buffer
    fn clear_input_buffer(&mut self) -> io::Result<()>;
}

/// Serial port wrapper implementing CommunicationChannel
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an opened serial port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }
}

/// TCP stream wrapper implementing CommunicationChannel
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    /// Wrap a connected TCP stream
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Read for TcpChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl CommunicationChannel for TcpChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        // No flush syscall for sockets: drain with a non-blocking read.
        self.stream.set_nonblocking(true)?;
        let mut buf = [0u8; 1024];
        let result = loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.stream.set_nonblocking(false)?;
        result
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    replies: HashMap<String, Vec<u8>>,
    pending: Vec<u8>,
    outgoing: VecDeque<u8>,
    sent: Vec<String>,
    broken: bool,
    silent: bool,
}

/// In-memory adapter that answers commands from a script.
///
/// Clones share state, so a test can keep one clone to change replies
/// (e.g. turn the ignition on) while a session owns another.
/// Unknown commands get the ELM327 `?` reply.
#[derive(Debug, Clone, Default)]
pub struct ScriptedChannel {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedChannel {
    /// Create an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// A script that behaves like a healthy ELM327 on a running car.
    ///
    /// Every polled PID answers with idle-engine values:
    /// 800 rpm, 0 km/h, 90 °C, 12.2 % throttle, 20 % load, 3.5 g/s.
    pub fn elm327_car() -> Self {
        let script = Self::elm327_ignition_off();
        script.reply("0100", "41 00 BE 3F B8 11");
        script.reply("010C", "41 0C 0C 80");
        script.reply("010D", "41 0D 00");
        script.reply("0105", "41 05 82");
        script.reply("0111", "41 11 1F");
        script.reply("0104", "41 04 33");
        script.reply("0110", "41 10 01 5E");
        script
    }

    /// A script for an adapter whose vehicle bus does not answer
    pub fn elm327_ignition_off() -> Self {
        let script = Self::new();
        script.reply("ATZ", "ELM327 v1.5");
        for cmd in ["ATE0", "ATL0", "ATS0", "ATH0", "ATSP0", "ATPC"] {
            script.reply(cmd, "OK");
        }
        script.reply("ATDPN", "A6");
        script.reply("ATDP", "AUTO, ISO 15765-4 (CAN 11/500)");
        script.reply("0100", "SEARCHING...\rUNABLE TO CONNECT");
        for pid in ["010C", "010D", "0105", "0111", "0104", "0110"] {
            script.reply(pid, "UNABLE TO CONNECT");
        }
        script
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set the reply for a command (without CR or prompt)
    pub fn reply(&self, command: &str, response: &str) {
        self.lock()
            .replies
            .insert(command.to_ascii_uppercase(), response.as_bytes().to_vec());
    }

    /// Make every read and write fail with an I/O error
    pub fn set_broken(&self, broken: bool) {
        self.lock().broken = broken;
    }

    /// Stop answering (reads time out)
    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    /// Commands received so far, in order
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    /// Number of times `command` was received
    pub fn count(&self, command: &str) -> usize {
        self.lock().sent.iter().filter(|c| c.as_str() == command).count()
    }
}

impl Read for ScriptedChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.broken {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "adapter unplugged"));
        }
        if state.outgoing.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.outgoing.len());
        for (slot, byte) in buf.iter_mut().zip(state.outgoing.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.broken {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "adapter unplugged"));
        }
        for &byte in buf {
            if byte != b'\r' {
                state.pending.push(byte);
                continue;
            }
            let command = String::from_utf8_lossy(&state.pending)
                .trim()
                .to_ascii_uppercase();
            state.pending.clear();
            state.sent.push(command.clone());
            if state.silent {
                continue;
            }
            let mut reply = state
                .replies
                .get(&command)
                .cloned()
                .unwrap_or_else(|| b"?".to_vec());
            reply.extend_from_slice(b"\r\r>");
            state.outgoing.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for ScriptedChannel {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.lock().outgoing.clear();
        Ok(())
    }
}
