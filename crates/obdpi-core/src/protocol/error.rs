//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to an OBD-II adapter
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Serial port setup or I/O failed
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No prompt within the adapter timeout
    #[error("Adapter timeout")]
    Timeout,

    /// No open session
    #[error("Not connected to adapter")]
    NotConnected,

    /// Opening the transport failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The serial driver or OS support is missing
    #[error("Adapter driver unavailable: {0}")]
    DriverUnavailable(String),

    /// Configured device or host does not exist
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// The device answered ATZ with something else
    #[error("Unexpected adapter identity: {0:?}")]
    NotAnElm327(String),

    /// The adapter is up but the vehicle bus is not
    #[error("Vehicle not responding: {0}")]
    VehicleNotResponding(String),

    /// The vehicle has no value for this PID
    #[error("No data for PID {0:#04x}")]
    NoData(u8),

    /// Reply could not be decoded
    #[error("Invalid response from adapter: {0:?}")]
    InvalidResponse(String),

    /// The adapter answered `?`
    #[error("Adapter rejected command: {0}")]
    CommandRejected(String),

    /// Transport I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error means the handle itself is unusable.
    ///
    /// Transport-level errors are counted by the acquisition loop and lead to
    /// a forced reconnect. Everything else only affects a single field.
    pub fn is_transport(&self) -> bool {
        match self {
            ProtocolError::SerialError(_)
            | ProtocolError::Timeout
            | ProtocolError::NotConnected
            | ProtocolError::ConnectionFailed(_)
            | ProtocolError::DriverUnavailable(_)
            | ProtocolError::PortNotFound(_)
            | ProtocolError::NotAnElm327(_)
            | ProtocolError::VehicleNotResponding(_)
            | ProtocolError::IoError(_) => true,
            ProtocolError::NoData(_)
            | ProtocolError::InvalidResponse(_)
            | ProtocolError::CommandRejected(_) => false,
        }
    }

    /// Whether this error means hardware or its driver is missing entirely
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ProtocolError::PortNotFound(_) | ProtocolError::DriverUnavailable(_)
        )
    }
}
