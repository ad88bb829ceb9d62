//! Host-side entry points: find a board and open a connection to it.

use crate::device::DetectedPort;

#[cfg(feature = "native")]
use crate::{
    connection::{Connection, LinkOptions},
    console::Console,
    port::{NativePort, SerialConfig},
};

/// Discover all available serial ports.
#[must_use]
pub fn discover_ports() -> Vec<DetectedPort> {
    crate::device::detect_ports()
}

/// Discover serial ports that are likely M5Stack boards.
#[must_use]
pub fn discover_m5stack_ports() -> Vec<DetectedPort> {
    crate::device::detect_m5stack_ports()
}

/// Auto-detect a single best serial port candidate.
pub fn auto_detect_port() -> crate::Result<DetectedPort> {
    crate::device::auto_detect_port()
}

/// Open a connection on `port`, or on the auto-detected board when `None`.
#[cfg(feature = "native")]
pub fn connect(
    port: Option<&str>,
    baud_rate: u32,
    console: Console,
    options: LinkOptions,
) -> crate::Result<Connection<NativePort>> {
    let port_name = match port {
        Some(name) => name.to_string(),
        None => auto_detect_port()?.name,
    };
    Connection::open(&SerialConfig::new(port_name, baud_rate), console, options)
}
