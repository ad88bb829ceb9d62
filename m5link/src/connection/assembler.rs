//! Reply assembly and console demultiplexing.
//!
//! [`ReplyAssembler`] performs no I/O. The connection feeds it every byte
//! batch read while a request is pending. The assembler appends each byte to
//! the accumulation buffer and checks for a completed reply frame after each
//! one. Bytes that do not belong to the reply are collected for the console.
//!
//! Console bytes may precede the reply, so completion is tested from a single
//! anchored start: the earliest frame head at or after the anchor. Whatever
//! precedes the frame is console text. A reply payload may itself contain a
//! complete frame, so a later head never wins over an earlier one. The anchor
//! only moves past bytes once the line went quiet for the grace period and
//! they were committed to the console.

use crate::protocol::frame::{FRAME_HEAD, FRAME_TAIL, FrameCodec, MIN_REPLY_LEN, ReplyFrame};

/// How bytes that did not complete a frame reach the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DemuxMode {
    /// Echo every batch that does not complete a frame right away. The
    /// leading fragment of a split frame shows up on the console.
    #[default]
    Immediate,
    /// Hold non-completing bytes until the line has been quiet for the grace
    /// period. Held bytes that turn out to be part of the reply are dropped.
    Deferred,
}

/// Sans-IO state machine for one pending request.
#[derive(Debug)]
pub struct ReplyAssembler {
    codec: FrameCodec,
    mode: DemuxMode,
    buffer: Vec<u8>,
    /// Number of leading buffer bytes already handed to the console.
    echoed: usize,
    /// Frame heads before this offset are settled console text.
    anchor: usize,
    console: Vec<u8>,
    resolved: bool,
}

impl ReplyAssembler {
    /// Create an assembler with an empty accumulation buffer.
    pub fn new(codec: FrameCodec, mode: DemuxMode) -> Self {
        Self {
            codec,
            mode,
            buffer: Vec::new(),
            echoed: 0,
            anchor: 0,
            console: Vec::new(),
            resolved: false,
        }
    }

    /// Feed one batch of received bytes.
    ///
    /// Returns the reply the first time a frame completes. Every later call
    /// returns `None` and routes its bytes to the console.
    pub fn feed(&mut self, batch: &[u8]) -> Option<ReplyFrame> {
        if self.resolved {
            self.console.extend_from_slice(batch);
            return None;
        }

        for (i, &byte) in batch.iter().enumerate() {
            self.buffer.push(byte);
            if !self.buffer.ends_with(&FRAME_TAIL) {
                continue;
            }

            if let Some(start) = self.find_frame_start() {
                self.resolved = true;
                if self.echoed < start {
                    self.console
                        .extend_from_slice(&self.buffer[self.echoed..start]);
                }
                self.echoed = self.buffer.len();
                self.console.extend_from_slice(&batch[i + 1..]);
                return self.codec.decode_frame(&self.buffer[start..]);
            }
        }

        if self.mode == DemuxMode::Immediate {
            self.echo_unsent();
        }
        None
    }

    /// Settle every byte received so far as console text.
    ///
    /// Called by the driver once the grace period passed without new data.
    /// Held bytes reach the console and no frame may start before the
    /// current end of the buffer afterwards.
    pub fn flush_held(&mut self) {
        self.echo_unsent();
        self.anchor = self.buffer.len();
    }

    /// Whether bytes received since the last quiet period are unsettled.
    pub fn has_held(&self) -> bool {
        !self.resolved && self.anchor < self.buffer.len()
    }

    /// Take the bytes destined for the console.
    pub fn take_console(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.console)
    }

    /// Whether a reply frame has been delivered.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Bytes accumulated since the request was sent.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    fn echo_unsent(&mut self) {
        if self.echoed < self.buffer.len() {
            self.console.extend_from_slice(&self.buffer[self.echoed..]);
            self.echoed = self.buffer.len();
        }
    }

    fn find_frame_start(&self) -> Option<usize> {
        let start = self.buffer[self.anchor..]
            .windows(FRAME_HEAD.len())
            .position(|w| w == FRAME_HEAD)?
            + self.anchor;
        (self.buffer.len() - start >= MIN_REPLY_LEN
            && self.codec.is_frame_complete(&self.buffer[start..]))
        .then_some(start)
    }
}
