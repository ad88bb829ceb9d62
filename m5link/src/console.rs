//! Console output sink and text helpers.
//!
//! Device output that is not part of a reply frame is forwarded to a
//! [`Console`]. The console is just the sending half of a channel; whoever
//! owns the receiver decides how to present the text (terminal, log, UI).
//!
//! ```rust
//! use m5link::console::{Console, ConsoleEvent};
//!
//! let (console, events) = Console::channel();
//! console.output("MicroPython v1.22\r\n");
//! assert_eq!(
//!     events.try_recv().ok(),
//!     Some(ConsoleEvent::Output("MicroPython v1.22\r\n".to_string()))
//! );
//! ```

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

/// Event delivered to the console receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// Text received from the device.
    Output(String),
    /// Request to clear everything shown so far.
    Clear,
}

/// Append-only console sink.
///
/// Cloning yields another handle to the same channel. Events sent after the
/// receiver is dropped are discarded silently.
#[derive(Debug, Clone)]
pub struct Console {
    tx: Sender<ConsoleEvent>,
}

impl Console {
    /// Create a console and the receiver its events are delivered to.
    pub fn channel() -> (Self, Receiver<ConsoleEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    /// A console nobody listens to.
    pub fn sink() -> Self {
        Self::channel().0
    }

    /// Append text.
    pub fn output(&self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            let _ = self.tx.send(ConsoleEvent::Output(text));
        }
    }

    /// Clear the console now.
    pub fn clear(&self) {
        let _ = self.tx.send(ConsoleEvent::Clear);
    }

    /// Clear the console after `delay`, without blocking the caller.
    pub fn clear_after(&self, delay: Duration) {
        let console = self.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            console.clear();
        });
    }
}

/// Drain buffered bytes into displayable UTF-8 text without stalling on invalid bytes.
///
/// - Valid UTF-8 is emitted as-is.
/// - Invalid byte sequences emit the replacement char `�` and continue.
/// - Incomplete UTF-8 suffix is kept in `buffer` for the next read.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if valid_up_to > 0 {
                    if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                        output.push_str(valid);
                    }
                }

                match err.error_len() {
                    Some(invalid_len) => {
                        output.push('�');
                        let drain_to = valid_up_to.saturating_add(invalid_len).min(buffer.len());
                        buffer.drain(..drain_to);
                    },
                    None => {
                        if valid_up_to > 0 {
                            buffer.drain(..valid_up_to);
                        }
                        break;
                    },
                }
            },
        }
    }

    output
}

/// Drop control characters that would garble a terminal.
///
/// Keeps `\n`, `\t` and printable characters; a lone `\r` becomes `\n`.
pub fn clean_console_text(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    let mut out = String::with_capacity(normalized.len());
    for ch in normalized.chars() {
        match ch {
            '\n' | '\t' => out.push(ch),
            '\r' => out.push('\n'),
            _ if ch.is_control() => {},
            _ => out.push(ch),
        }
    }
    out
}

/// Format console text for a raw-mode terminal, optionally prefixing every
/// line with a wall-clock timestamp.
///
/// `at_line_start` carries the line position across calls.
pub fn format_console_output(text: &str, timestamp: bool, at_line_start: &mut bool) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(normalized.len() + 32);

    let stamp = timestamp.then(|| {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let total_secs = now.as_secs();
        format!(
            "\x1b[90m[{:02}:{:02}:{:02}.{:03}]\x1b[0m ",
            (total_secs / 3600) % 24,
            (total_secs / 60) % 60,
            total_secs % 60,
            now.subsec_millis()
        )
    });

    for c in normalized.chars() {
        if c == '\n' {
            out.push_str("\r\n");
            *at_line_start = true;
            continue;
        }
        if *at_line_start {
            if let Some(stamp) = &stamp {
                out.push_str(stamp);
            }
            *at_line_start = false;
        }
        out.push(c);
    }

    out
}
