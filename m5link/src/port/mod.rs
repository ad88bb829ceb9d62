//! Serial transport seam.
//!
//! A [`Connection`](crate::connection::Connection) owns one [`Port`]. On real
//! hardware that is a [`NativePort`] over the `serialport` crate; unit tests
//! drive the connection with a scripted in-memory port instead.
//!
//! The file agent always runs 8N1 without flow control, so the only link
//! settings a caller chooses are the device path and the baud rate.

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default baud rate of the on-device file agent.
pub const DEFAULT_BAUD: u32 = 115200;

/// Read timeout applied right after opening, before the first request.
pub const INITIAL_READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Where and how fast to open the board's serial line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port_name: String,
    /// Line speed in baud.
    pub baud_rate: u32,
}

impl SerialConfig {
    /// Settings for `port_name` at `baud_rate`.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
        }
    }

    /// Reject settings no serial driver accepts.
    pub fn validate(&self) -> Result<()> {
        if self.port_name.trim().is_empty() {
            return Err(Error::Config("port name is empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(Error::Config("baud rate must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// One entry of the host's serial port list.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Device path.
    pub name: String,
    /// USB vendor ID, for USB bridges only.
    pub vid: Option<u16>,
    /// USB product ID, for USB bridges only.
    pub pid: Option<u16>,
    /// USB manufacturer string.
    pub manufacturer: Option<String>,
    /// USB product string.
    pub product: Option<String>,
    /// USB serial number string.
    pub serial_number: Option<String>,
}

/// Byte stream a [`Connection`](crate::connection::Connection) talks over.
///
/// `read` must give up after the timeout last passed to
/// [`set_timeout`](Port::set_timeout) and report that as
/// [`std::io::ErrorKind::TimedOut`] or `Ok(0)`. `flush` returns once the
/// written bytes have left the host.
pub trait Port: Read + Write + Send {
    /// Bound the next reads by `timeout`.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Drop bytes that arrived before the next request.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Device path the port was opened on.
    fn name(&self) -> &str;

    /// Drive the DTR line, wired to the board's auto-reset circuit.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Drive the RTS line, wired to the board's auto-reset circuit.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Release the device. Every later read or write fails.
    fn close(&mut self) -> Result<()>;
}

/// Lists the serial ports present on the host.
pub trait PortEnumerator {
    /// Every port the OS reports, USB or not.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
