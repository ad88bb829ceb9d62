//! Chunked file download to the device.
//!
//! A text payload is split into chunks of at most
//! [`TransferConfig::max_chunk_length`] characters. Chunk 0 creates the file
//! with `WriteFile` and every later chunk is sent with `AppendFile`. A closing
//! `FinishWrite` follows. Each chunk must be acknowledged before the next one
//! is sent.
//!
//! Progress is reported in percent. Every acknowledged chunk adds
//! `round2(100 / chunks)`. A `done` marker in the finish reply jumps to 100.
//! Without that marker a watchdog forces 100 once
//! [`TransferConfig::idle_fallback`] has passed since the start, so the call
//! does not return before that deadline. The watchdog only affects the
//! progress display; the exchange keeps going.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, error, info};

use crate::connection::Connection;
use crate::error::Error;
use crate::port::Port;
use crate::protocol::command::{CommandCode, contains_done_marker, file_payload};

/// Default maximum chunk size, in characters.
pub const DEFAULT_MAX_CHUNK_LENGTH: usize = 1000;

/// Default delay after which progress is forced to 100.
pub const DEFAULT_IDLE_FALLBACK: Duration = Duration::from_millis(3000);

/// Transfer tunables.
#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    /// Maximum characters per chunk.
    pub max_chunk_length: usize,
    /// Force progress to 100 after this long without a `done` reply.
    pub idle_fallback: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_chunk_length: DEFAULT_MAX_CHUNK_LENGTH,
            idle_fallback: DEFAULT_IDLE_FALLBACK,
        }
    }
}

/// One progress report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    /// Percentage points added by this report.
    pub increment: f64,
    /// Overall progress after this report, 0..=100.
    pub percent: f64,
}

/// Receiver of progress reports.
///
/// Reports may come from the watchdog thread, hence `Sync`.
pub trait TransferProgress: Sync {
    /// Handle one report.
    fn report(&self, update: ProgressUpdate);
}

impl<F> TransferProgress for F
where
    F: Fn(ProgressUpdate) + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        self(update);
    }
}

/// Progress sink that ignores every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl TransferProgress for NoProgress {
    fn report(&self, _update: ProgressUpdate) {}
}

/// Monotonic, clamped progress accumulator.
pub struct ProgressTracker<'a> {
    sink: &'a dyn TransferProgress,
    percent: Mutex<f64>,
}

impl<'a> ProgressTracker<'a> {
    /// Start at 0 and report it.
    pub fn start(sink: &'a dyn TransferProgress) -> Self {
        sink.report(ProgressUpdate {
            increment: 0.0,
            percent: 0.0,
        });
        Self {
            sink,
            percent: Mutex::new(0.0),
        }
    }

    /// Add `increment` percentage points, never going past 100.
    pub fn advance(&self, increment: f64) {
        let mut percent = self.percent.lock().unwrap_or_else(PoisonError::into_inner);
        let next = round2(*percent + increment).min(100.0);
        let applied = round2(next - *percent);
        if applied > 0.0 {
            *percent = next;
            self.sink.report(ProgressUpdate {
                increment: applied,
                percent: next,
            });
        }
    }

    /// Jump to 100.
    pub fn finish(&self) {
        let current = self.percent();
        self.advance(100.0 - current);
    }

    /// Current progress.
    pub fn percent(&self) -> f64 {
        *self.percent.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Step of a transfer that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    /// Sending the chunk with this zero-based index.
    Chunk(usize),
    /// The closing `FinishWrite`.
    Finish,
}

/// Result of [`bulk_download`].
#[derive(Debug)]
pub enum TransferOutcome {
    /// Every chunk and the finish command were acknowledged.
    Completed {
        /// Payload of the finish reply.
        status: Vec<u8>,
        /// Whether the finish reply contained the done marker.
        done: bool,
    },
    /// The transfer stopped at `stage`.
    Failed {
        /// Where the transfer stopped.
        stage: TransferStage,
        /// Why it stopped.
        error: Error,
    },
}

impl TransferOutcome {
    /// 1 on completion, 0 on failure.
    pub fn indicator(&self) -> u8 {
        u8::from(self.is_completed())
    }

    /// Whether every step was acknowledged.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Split `text` into chunks of at most `max_len` characters.
///
/// An empty text yields one empty chunk so the device still truncates the
/// target file.
pub fn split_chunks(text: &str, max_len: usize) -> Vec<&str> {
    let max_len = max_len.max(1);
    if text.is_empty() {
        return vec![""];
    }

    let mut chunks = Vec::with_capacity(text.len() / max_len + 1);
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == max_len {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    chunks.push(&text[start..]);
    chunks
}

/// Download `text` to `path` on the device with default settings.
pub fn bulk_download<P: Port>(
    conn: &Connection<P>,
    path: &str,
    text: &str,
    progress: &dyn TransferProgress,
) -> TransferOutcome {
    bulk_download_with(conn, path, text, progress, &TransferConfig::default())
}

/// Download `text` to `path` on the device.
///
/// Errors are logged and returned inside the outcome, never propagated.
pub fn bulk_download_with<P: Port>(
    conn: &Connection<P>,
    path: &str,
    text: &str,
    progress: &dyn TransferProgress,
    config: &TransferConfig,
) -> TransferOutcome {
    let chunks = split_chunks(text, config.max_chunk_length);
    #[allow(clippy::cast_precision_loss)] // Chunk counts are far below 2^52
    let increment = round2(100.0 / chunks.len() as f64);
    info!(
        "Downloading {path} to {}: {} chars in {} chunk(s)",
        conn.port_name(),
        text.chars().count(),
        chunks.len()
    );

    let tracker = ProgressTracker::start(progress);
    let (disarm_tx, disarm_rx) = mpsc::channel::<()>();

    let outcome = thread::scope(|s| {
        let tracker = &tracker;
        let fallback = config.idle_fallback;
        s.spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = disarm_rx.recv_timeout(fallback) {
                debug!("No completion after {fallback:?}, forcing progress to 100");
                tracker.finish();
            }
        });

        let outcome = send_chunks(conn, path, &chunks, increment, tracker);
        // Any other outcome leaves the watchdog to run to its deadline
        if let TransferOutcome::Completed { done: true, .. } = outcome {
            let _ = disarm_tx.send(());
        }
        outcome
    });

    match &outcome {
        TransferOutcome::Completed { done, .. } => {
            info!("Download of {path} finished (done marker: {done})");
        },
        TransferOutcome::Failed { stage, error } => {
            error!("Download of {path} failed at {stage:?}: {error}");
        },
    }
    outcome
}

fn send_chunks<P: Port>(
    conn: &Connection<P>,
    path: &str,
    chunks: &[&str],
    increment: f64,
    tracker: &ProgressTracker<'_>,
) -> TransferOutcome {
    for (index, chunk) in chunks.iter().enumerate() {
        let command = if index == 0 {
            CommandCode::WriteFile
        } else {
            CommandCode::AppendFile
        };
        debug!("Chunk {}/{}: {} chars", index + 1, chunks.len(), chunk.chars().count());

        if let Err(error) = conn.send_command(command, &file_payload(path, chunk), false) {
            return TransferOutcome::Failed {
                stage: TransferStage::Chunk(index),
                error,
            };
        }
        tracker.advance(increment);
    }

    match conn.send_command(CommandCode::FinishWrite, path, false) {
        Ok(status) => {
            let done = contains_done_marker(&status);
            if done {
                tracker.finish();
            }
            TransferOutcome::Completed { status, done }
        },
        Err(error) => TransferOutcome::Failed {
            stage: TransferStage::Finish,
            error,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LinkOptions;
    use crate::console::Console;
    use crate::port::mock::{Incoming, MockHandle, MockPort};
    use crate::protocol::command::split_file_payload;
    use crate::protocol::frame::{FRAME_HEAD, FrameCodec, STATUS_OK, TRAILER_LEN};

    fn config() -> TransferConfig {
        TransferConfig {
            max_chunk_length: 1000,
            idle_fallback: Duration::from_millis(500),
        }
    }

    fn options() -> LinkOptions {
        LinkOptions {
            reply_timeout: Some(Duration::from_secs(2)),
            poll_interval: Duration::from_millis(1),
            ..LinkOptions::default()
        }
    }

    /// Device double: acknowledges writes, answers `FinishWrite` with
    /// `finish_reply`, rejects the request with index `reject_at`.
    fn device(finish_reply: &'static [u8], reject_at: Option<usize>) -> (MockPort, MockHandle) {
        let (port, handle) = MockPort::new();
        let mut seen = 0;
        let port = port.with_responder(move |req| {
            let index = seen;
            seen += 1;
            let code = req[FRAME_HEAD.len()];
            let status = if Some(index) == reject_at { 0x01 } else { STATUS_OK };
            let payload = if code == CommandCode::FinishWrite.code() {
                finish_reply
            } else {
                b"ok"
            };
            vec![Incoming::Data(
                FrameCodec::new().encode_reply(code, status, payload),
            )]
        });
        (port, handle)
    }

    fn payload_of(request: &[u8]) -> String {
        String::from_utf8(request[FRAME_HEAD.len() + 1..request.len() - TRAILER_LEN].to_vec())
            .unwrap()
    }

    #[test]
    fn test_split_chunks() {
        let text = "a".repeat(2500);
        let chunks = split_chunks(&text, 1000);
        assert_eq!(
            chunks.iter().map(|c| c.len()).collect::<Vec<_>>(),
            vec![1000, 1000, 500]
        );
        assert_eq!(chunks.concat(), text);

        assert_eq!(split_chunks("", 1000), vec![""]);
        assert_eq!(split_chunks("abc", 3), vec!["abc"]);
        assert_eq!(split_chunks("abcd", 3), vec!["abc", "d"]);
    }

    #[test]
    fn test_split_chunks_counts_chars_not_bytes() {
        let text = "héllo wörld";
        let chunks = split_chunks(text, 4);
        assert_eq!(chunks, vec!["héll", "o wö", "rld"]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(100.0 / 3.0), 33.33);
        assert_eq!(round2(100.0 / 7.0), 14.29);
        assert_eq!(round2(100.0), 100.0);
    }

    #[test]
    fn test_tracker_is_monotonic_and_clamped() {
        let log = Mutex::new(Vec::new());
        let sink = |u: ProgressUpdate| log.lock().unwrap().push(u);
        let tracker = ProgressTracker::start(&sink);

        tracker.advance(60.0);
        tracker.advance(60.0);
        tracker.advance(5.0);
        tracker.finish();
        assert_eq!(tracker.percent(), 100.0);

        let updates = log.lock().unwrap().clone();
        let percents: Vec<f64> = updates.iter().map(|u| u.percent).collect();
        assert_eq!(percents, vec![0.0, 60.0, 100.0]);
        assert_eq!(updates[2].increment, 40.0);
    }

    #[test]
    fn test_three_chunks_then_done() {
        let (port, handle) = device(b"write done", None);
        let conn = Connection::new(port, Console::sink(), options());
        let log = Mutex::new(Vec::new());
        let sink = |u: ProgressUpdate| log.lock().unwrap().push(u);

        let text = "x".repeat(2500);
        let outcome = bulk_download_with(&conn, "/flash/main.py", &text, &sink, &config());

        assert!(matches!(outcome, TransferOutcome::Completed { done: true, .. }));
        assert_eq!(outcome.indicator(), 1);

        let requests = handle.requests();
        assert_eq!(requests.len(), 4);
        let codes: Vec<u8> = requests.iter().map(|r| r[FRAME_HEAD.len()]).collect();
        assert_eq!(codes, vec![0x03, 0x04, 0x04, 0x05]);

        let data: String = requests[..3]
            .iter()
            .map(|r| {
                let payload = payload_of(r);
                let (path, chunk) = split_file_payload(&payload).unwrap();
                assert_eq!(path, "/flash/main.py");
                chunk.to_string()
            })
            .collect();
        assert_eq!(data, text);
        assert_eq!(payload_of(&requests[3]), "/flash/main.py");

        let updates = log.lock().unwrap().clone();
        let increments: Vec<f64> = updates.iter().map(|u| u.increment).collect();
        assert_eq!(increments, vec![0.0, 33.33, 33.33, 33.33, 0.01]);
        assert_eq!(updates.last().unwrap().percent, 100.0);
    }

    #[test]
    fn test_rejected_chunk_stops_transfer() {
        let (port, handle) = device(b"done", Some(1));
        let conn = Connection::new(port, Console::sink(), options());

        let outcome =
            bulk_download_with(&conn, "/flash/big.py", &"y".repeat(2500), &NoProgress, &config());

        match &outcome {
            TransferOutcome::Failed { stage, error } => {
                assert_eq!(*stage, TransferStage::Chunk(1));
                assert!(matches!(error, Error::Device { status: 0x01 }));
            },
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(outcome.indicator(), 0);
        // Chunk 3 and the finish command are never sent
        assert_eq!(handle.requests().len(), 2);
        assert!(!conn.is_busy());
    }

    #[test]
    fn test_missing_done_marker_still_reaches_100_after_fallback() {
        let (port, _) = device(b"ok", None);
        let conn = Connection::new(port, Console::sink(), options());
        let log = Mutex::new(Vec::new());
        let sink = |u: ProgressUpdate| log.lock().unwrap().push(u);

        let config = TransferConfig {
            idle_fallback: Duration::from_millis(50),
            ..config()
        };
        let started = std::time::Instant::now();
        let outcome = bulk_download_with(&conn, "/a.py", &"z".repeat(2500), &sink, &config);
        assert!(matches!(outcome, TransferOutcome::Completed { done: false, .. }));
        assert!(started.elapsed() >= config.idle_fallback);

        let updates = log.lock().unwrap().clone();
        let percents: Vec<f64> = updates.iter().map(|u| u.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.last(), Some(&100.0));
    }

    #[test]
    fn test_done_marker_returns_without_waiting_for_fallback() {
        let (port, _) = device(b"done", None);
        let conn = Connection::new(port, Console::sink(), options());

        let config = TransferConfig {
            idle_fallback: Duration::from_secs(30),
            ..config()
        };
        let started = std::time::Instant::now();
        let outcome = bulk_download_with(&conn, "/a.py", "print(1)", &NoProgress, &config);
        assert!(outcome.is_completed());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_empty_text_sends_one_empty_chunk() {
        let (port, handle) = device(b"done", None);
        let conn = Connection::new(port, Console::sink(), options());

        let outcome = bulk_download_with(&conn, "/empty.txt", "", &NoProgress, &config());
        assert!(outcome.is_completed());

        let requests = handle.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(payload_of(&requests[0]), "/empty.txt\0");
    }

    #[test]
    fn test_idle_fallback_forces_completion_display() {
        let (port, _) = MockPort::new();
        let port = port.with_responder(|req| {
            thread::sleep(Duration::from_millis(80));
            let code = req[FRAME_HEAD.len()];
            vec![Incoming::Data(FrameCodec::new().encode_reply(code, STATUS_OK, b"saved"))]
        });
        let conn = Connection::new(port, Console::sink(), options());
        let log = Mutex::new(Vec::new());
        let sink = |u: ProgressUpdate| log.lock().unwrap().push(u);

        let config = TransferConfig {
            max_chunk_length: 4,
            idle_fallback: Duration::from_millis(20),
        };
        let outcome = bulk_download_with(&conn, "/slow.py", "abcdefgh", &sink, &config);
        assert!(matches!(outcome, TransferOutcome::Completed { done: false, .. }));

        let updates = log.lock().unwrap().clone();
        // 0, then the forced jump; later chunk acknowledgements are clamped away
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].percent, 100.0);
        assert_eq!(updates[1].increment, 100.0);
    }
}
