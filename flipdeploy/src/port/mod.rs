//! Port abstraction for the serial transport.
//!
//! The protocol layers above (command session, chunked transfer) only talk to
//! the [`Port`] trait, so they can be driven by a real serial device or by an
//! in-memory simulation in tests.
//!
//! ```text
//! +-------------------------+
//! |  DeviceClient / storage |
//! +------------+------------+
//!              |
//!              v
//! +------------+------------+
//! |     CommandSession      |
//! +------------+------------+
//!              |
//!              v
//! +------------+------------+
//! |       Port trait        |
//! +------------+------------+
//!              |
//!              v
//! +------------+------------+
//! |  NativePort (serialport)|
//! +-------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use flipdeploy::port::Port;
//! use std::time::Duration;
//!
//! fn example<P: Port>(port: &mut P) -> flipdeploy::Result<()> {
//!     port.write_all_bytes(b"device_info\r\n")?;
//!     let bytes = port.read_available(Duration::from_millis(100))?;
//!     println!("Received: {:?}", bytes);
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};

/// Baud rate of the device CLI.
pub const DEFAULT_BAUD: u32 = 230_400;

/// Size of the scratch buffer used by a single read.
const READ_BUFFER_SIZE: usize = 4096;

/// Serial port configuration. Framing is always 8N1 without flow control.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(100),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte-level transport to the device.
///
/// Implementations own the descriptor. `close` must be idempotent, and every
/// I/O call after `close` fails with [`Error::ConnectionClosed`].
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Discard anything pending in the host-side input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Whether the descriptor is still held.
    fn is_open(&self) -> bool;

    /// Close the port and release resources.
    ///
    /// Calling this more than once is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }

    /// Return whatever bytes arrive within `timeout`, possibly none.
    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }
        if self.timeout() != timeout {
            self.set_timeout(timeout)?;
        }

        let mut buf = [0u8; READ_BUFFER_SIZE];
        match self.read(&mut buf) {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(Vec::new())
            },
            Err(e) => Err(Error::Io(e)),
        }
    }
}

// Re-export the appropriate implementation based on features
#[cfg(feature = "native")]
pub use native::NativePort;
