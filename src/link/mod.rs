//! Physical links to the bus.
//!
//! A [`LinkTransport`] is a byte stream with explicit open and close. The bridge session
//! owns exactly one transport and is the only caller of its methods, so implementations
//! need no internal locking.
//!
//! # Variants
//!
//! - [`SerialTransport`]: A local serial device (a Velbus USB or RS-232 interface).
//! - [`NetworkTransport`]: A TCP connection to a network bridge, e.g. `velserv`.
//! - [`mock::MockTransport`]: A scriptable in-memory link for tests.
//!
//! # Reads
//!
//! Reads block until at least one byte is available or the configured read timeout
//! expires, in which case they return `Ok(0)`. The timeout bounds how long the session
//! takes to notice queued packets and shutdown requests.
use std::io;

use thiserror::Error;

pub mod mock;
mod network;
mod serial;

pub use network::NetworkTransport;
pub use serial::{DEFAULT_BAUD_RATE, SerialTransport};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to open {target}: {source}")]
    OpenFailed {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("link disconnected")]
    Disconnected,

    #[error("link is not open")]
    NotOpen,

    #[error("link io error: {0}")]
    Io(#[from] io::Error),
}

impl LinkError {
    /// Maps an I/O failure, treating errors that mean the peer went away as a disconnect.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => LinkError::Disconnected,
            _ => LinkError::Io(err),
        }
    }
}

/// Whether a read error only means no byte arrived in time.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

pub trait LinkTransport: Send {
    fn open(&mut self) -> Result<(), LinkError>;

    /// Closes the link. Closing a closed link does nothing.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Reads whatever bytes are available, `Ok(0)` when the read timeout expired first.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, LinkError>;

    /// Writes every byte, blocking until the operating system accepted them.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Human readable name of the link for logs.
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_errors_become_disconnects() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);

        assert!(matches!(LinkError::from_io(reset), LinkError::Disconnected));
        assert!(matches!(LinkError::from_io(denied), LinkError::Io(_)));
    }

    #[test]
    fn timeouts_are_not_failures() {
        assert!(is_timeout(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_timeout(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_timeout(&io::Error::from(io::ErrorKind::BrokenPipe)));
    }
}
