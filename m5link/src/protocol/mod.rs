//! Wire protocol of the on-device file agent.
//!
//! - [`frame`]: checksum envelope and reply completion detection
//! - [`command`]: command codes and payload helpers
//! - [`crc`]: CRC16-XMODEM

pub mod command;
pub mod crc;
pub mod frame;

pub use command::{CommandCode, DONE_MARKER, contains_done_marker, file_payload};
pub use frame::{FrameCodec, ReplyFrame, build_request};
