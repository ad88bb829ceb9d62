//! # m5link
//!
//! A library for talking to the MicroPython file agent on M5Stack boards.
//!
//! The device multiplexes two things on one serial line: binary reply frames
//! for host commands, and its own console output. This crate provides:
//!
//! - The frame codec (CRC16-XMODEM envelope, reply completion detection)
//! - A [`Connection`] that keeps exactly one request in flight and routes
//!   non-reply bytes to a [`Console`]
//! - Chunked file download with progress reporting ([`transfer`])
//! - A cached view of device files ([`DeviceFiles`])
//! - Serial port discovery for common M5Stack USB bridges
//!
//! ## Features
//!
//! - `native` (default): Serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use m5link::{Console, DeviceFiles, LinkOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (console, _events) = Console::channel();
//!     let conn = m5link::host::connect(Some("/dev/ttyUSB0"), 115200, console, LinkOptions::default())?;
//!     let files = DeviceFiles::new(&conn);
//!
//!     for entry in files.list_dir("/flash")? {
//!         println!("{entry}");
//!     }
//!
//!     let saved = files.save_file("/flash/main.py", "print('hello')\n", &|update: m5link::ProgressUpdate| {
//!         println!("{:.2}%", update.percent);
//!     });
//!     println!("saved: {saved}");
//!
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod console;
pub mod device;
pub mod error;
pub mod files;
pub mod host;
pub mod port;
pub mod protocol;
pub mod transfer;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    connection::{Connection, ConnectionState, DemuxMode, LinkOptions, ReplyAssembler},
    console::{
        Console, ConsoleEvent, clean_console_text, drain_utf8_lossy, format_console_output,
    },
    device::{DetectedPort, DeviceKind},
    error::{Error, Result},
    files::DeviceFiles,
    host::{auto_detect_port, discover_m5stack_ports, discover_ports},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{CommandCode, FrameCodec, ReplyFrame, build_request},
    transfer::{
        NoProgress, ProgressUpdate, TransferConfig, TransferOutcome, TransferProgress,
        TransferStage, bulk_download, bulk_download_with,
    },
};
