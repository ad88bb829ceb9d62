//! Checksum envelope for requests and replies.
//!
//! Both directions share the same envelope. A reply carries one extra status
//! byte right after the command code:
//!
//! ```text
//! Request:
//! +----------+------+---------------+--------+----------+
//! |   Head   | Code |    Payload    | CRC16  |   Tail   |
//! +----------+------+---------------+--------+----------+
//! | AA AB AA |  1   |   variable    | 2 (BE) | AB CC AB |
//! +----------+------+---------------+--------+----------+
//!
//! Reply:
//! +----------+------+--------+---------------+--------+----------+
//! |   Head   | Code | Status |    Payload    | CRC16  |   Tail   |
//! +----------+------+--------+---------------+--------+----------+
//! | AA AB AA |  1   |   1    |   variable    | 2 (BE) | AB CC AB |
//! +----------+------+--------+---------------+--------+----------+
//! ```
//!
//! The CRC covers every byte between the head and the CRC itself.

use crate::error::{Error, Result};
use crate::protocol::crc::crc16_xmodem;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

/// Magic bytes opening every frame.
pub const FRAME_HEAD: [u8; 3] = [0xAA, 0xAB, 0xAA];

/// Magic bytes closing every frame.
pub const FRAME_TAIL: [u8; 3] = [0xAB, 0xCC, 0xAB];

/// Length of the reply header (head, code, status).
pub const REPLY_HEADER_LEN: usize = 5;

/// Length of the trailer (CRC16 and tail).
pub const TRAILER_LEN: usize = 5;

/// Smallest possible reply (empty payload).
pub const MIN_REPLY_LEN: usize = REPLY_HEADER_LEN + TRAILER_LEN;

/// Offset of the status byte inside a reply.
pub const STATUS_OFFSET: usize = 4;

/// Status byte reported by the device on success.
pub const STATUS_OK: u8 = 0x00;

/// Checksum function over the covered range of a frame.
pub type ChecksumFn = fn(&[u8]) -> u16;

/// Serialize a command code and a text payload into the request layout.
///
/// The result does not carry a checksum yet; pass it through
/// [`FrameCodec::append_checksum`] before writing it to the wire.
pub fn build_request(code: u8, payload: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEAD.len() + 1 + payload.len() + TRAILER_LEN);
    buf.extend_from_slice(&FRAME_HEAD);
    buf.push(code);
    buf.extend_from_slice(payload.as_bytes());
    buf
}

/// A decoded reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFrame {
    /// Command code echoed by the device.
    pub code: u8,
    /// Status byte (0x00 = success).
    pub status: u8,
    /// Payload between header and trailer.
    pub payload: Vec<u8>,
}

impl ReplyFrame {
    /// Check if the device reported success.
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Turn the frame into its payload, or a device error for a non-zero status.
    pub fn into_result(self) -> Result<Vec<u8>> {
        if self.is_success() {
            Ok(self.payload)
        } else {
            Err(Error::Device {
                status: self.status,
            })
        }
    }
}

/// Frame encoder/validator parameterised by its checksum algorithm.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    checksum: ChecksumFn,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Codec using CRC16-XMODEM.
    pub const fn new() -> Self {
        Self {
            checksum: crc16_xmodem,
        }
    }

    /// Codec using a custom checksum function.
    pub const fn with_checksum(checksum: ChecksumFn) -> Self {
        Self { checksum }
    }

    /// Append the checksum trailer to a request buffer.
    ///
    /// The CRC is computed over everything after the head magic.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn append_checksum(&self, bytes: &[u8]) -> Vec<u8> {
        let covered = bytes.get(FRAME_HEAD.len()..).unwrap_or_default();
        let crc = (self.checksum)(covered);

        let mut buf = Vec::with_capacity(bytes.len() + TRAILER_LEN);
        buf.extend_from_slice(bytes);
        buf.write_u16::<BigEndian>(crc).unwrap();
        buf.extend_from_slice(&FRAME_TAIL);
        buf
    }

    /// Build a complete, checksummed request.
    pub fn encode_request(&self, code: u8, payload: &str) -> Vec<u8> {
        self.append_checksum(&build_request(code, payload))
    }

    /// Build a complete reply frame, as the device would send it.
    pub fn encode_reply(&self, code: u8, status: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MIN_REPLY_LEN + payload.len());
        buf.extend_from_slice(&FRAME_HEAD);
        buf.push(code);
        buf.push(status);
        buf.extend_from_slice(payload);
        self.append_checksum(&buf)
    }

    /// Check whether `buffer` currently holds exactly one complete reply.
    ///
    /// Safe to call repeatedly on a growing buffer; partial data yields `false`.
    pub fn is_frame_complete(&self, buffer: &[u8]) -> bool {
        let len = buffer.len();
        if len < MIN_REPLY_LEN || buffer[len - FRAME_TAIL.len()..] != FRAME_TAIL {
            return false;
        }

        let covered = &buffer[FRAME_HEAD.len()..len - TRAILER_LEN];
        let expected = BigEndian::read_u16(&buffer[len - TRAILER_LEN..len - FRAME_TAIL.len()]);
        (self.checksum)(covered) == expected
    }

    /// Decode a complete reply; `None` while the buffer is not complete.
    pub fn decode_frame(&self, buffer: &[u8]) -> Option<ReplyFrame> {
        if !self.is_frame_complete(buffer) {
            return None;
        }

        Some(ReplyFrame {
            code: buffer[FRAME_HEAD.len()],
            status: buffer[STATUS_OFFSET],
            payload: buffer[REPLY_HEADER_LEN..buffer.len() - TRAILER_LEN].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_layout() {
        let req = build_request(0x02, "/flash/main.py");
        assert_eq!(&req[..3], &FRAME_HEAD);
        assert_eq!(req[3], 0x02);
        assert_eq!(&req[4..], b"/flash/main.py");
    }

    #[test]
    fn test_append_checksum_trailer() {
        let codec = FrameCodec::new();
        let req = codec.encode_request(0x01, "/flash");
        let len = req.len();

        assert_eq!(&req[len - 3..], &FRAME_TAIL);
        let crc = crc16_xmodem(&req[3..len - 5]);
        assert_eq!(req[len - 5], (crc >> 8) as u8);
        assert_eq!(req[len - 4], (crc & 0xFF) as u8);
    }

    #[test]
    fn test_reply_decodes_to_payload() {
        let codec = FrameCodec::new();
        let reply = codec.encode_reply(0x02, STATUS_OK, b"print('hi')\n");

        let frame = codec.decode_frame(&reply).unwrap();
        assert_eq!(frame.code, 0x02);
        assert_eq!(frame.status, STATUS_OK);
        assert_eq!(frame.payload, b"print('hi')\n");
        assert!(frame.is_success());
    }

    #[test]
    fn test_empty_payload_is_min_len() {
        let codec = FrameCodec::new();
        let reply = codec.encode_reply(0x05, STATUS_OK, b"");
        assert_eq!(reply.len(), MIN_REPLY_LEN);
        assert!(codec.is_frame_complete(&reply));
        assert!(codec.decode_frame(&reply).unwrap().payload.is_empty());
    }

    #[test]
    fn test_no_strict_prefix_is_complete() {
        let codec = FrameCodec::new();
        let reply = codec.encode_reply(0x02, STATUS_OK, b"hello world");

        for end in 0..reply.len() {
            assert!(
                !codec.is_frame_complete(&reply[..end]),
                "prefix of length {end} reported complete"
            );
        }
        assert!(codec.is_frame_complete(&reply));
    }

    #[test]
    fn test_byte_at_a_time_completes_exactly_once() {
        let codec = FrameCodec::new();
        let reply = codec.encode_reply(0x03, STATUS_OK, b"ok");

        let mut buffer = Vec::new();
        let mut completions = 0;
        for &byte in &reply {
            buffer.push(byte);
            if codec.is_frame_complete(&buffer) {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
    }

    #[test]
    fn test_single_byte_corruption_is_rejected() {
        let codec = FrameCodec::new();
        let reply = codec.encode_reply(0x02, STATUS_OK, b"abcdef");

        for i in 3..reply.len() - TRAILER_LEN {
            let mut corrupted = reply.clone();
            corrupted[i] ^= 0x5A;
            assert!(
                !codec.is_frame_complete(&corrupted),
                "corruption at offset {i} still validated"
            );
            assert!(codec.decode_frame(&corrupted).is_none());
        }
    }

    #[test]
    fn test_device_status_is_error() {
        let codec = FrameCodec::new();
        let reply = codec.encode_reply(0x02, 0x01, b"ENOENT");

        let frame = codec.decode_frame(&reply).unwrap();
        assert!(!frame.is_success());
        assert!(matches!(
            frame.into_result(),
            Err(Error::Device { status: 0x01 })
        ));
    }

    #[test]
    fn test_custom_checksum() {
        fn sum16(data: &[u8]) -> u16 {
            data.iter()
                .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
        }

        let codec = FrameCodec::with_checksum(sum16);
        let reply = codec.encode_reply(0x01, STATUS_OK, b"boot.py");
        assert!(codec.is_frame_complete(&reply));
        assert!(!FrameCodec::new().is_frame_complete(&reply));
    }

    #[test]
    fn test_short_garbage_is_not_complete() {
        let codec = FrameCodec::new();
        assert!(!codec.is_frame_complete(&[]));
        assert!(!codec.is_frame_complete(b"MicroPython v1"));
        assert!(!codec.is_frame_complete(&FRAME_TAIL));
    }
}
