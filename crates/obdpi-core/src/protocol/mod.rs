//! OBD-II Adapter Communication
//!
//! Talks to ELM327-compatible adapters over a serial port (USB or Bluetooth
//! RFCOMM) or a TCP socket (Wi-Fi adapters), and owns the connection
//! lifecycle used by the acquisition loop.

mod connection;
pub mod elm327;
mod error;
pub mod pid;
pub mod serial;
pub mod stream;

pub use connection::{
    AdapterDriver, AdapterSettings, ChannelOpener, ConnectionManager, ConnectionState,
    Elm327Driver, ObdHandle, SystemOpener, Transport,
};
pub use elm327::{Elm327, SessionStats, VehicleLink};
pub use error::ProtocolError;
pub use pid::{Pid, SupportedPids};
pub use serial::{clear_buffers, configure_port, list_ports, open_port, PortInfo};
pub use stream::{CommunicationChannel, ScriptedChannel, SerialChannel, TcpChannel};

/// Default baud rate for ELM327 adapters
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Default adapter response timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default RFCOMM binding of a paired Bluetooth adapter
pub const DEFAULT_DEVICE_PATH: &str = "/dev/rfcomm0";

/// Default address of Wi-Fi adapters
pub const DEFAULT_TCP_HOST: &str = "192.168.0.10";

/// Default port of Wi-Fi adapters
pub const DEFAULT_TCP_PORT: u16 = 35000;
