//! Console monitor command implementation.
//!
//! Polls the device console on a background thread while the main thread
//! forwards keyboard input.

use anyhow::{Context, Result};
use console::style;
use log::error;
use m5link::{ConsoleEvent, Error as LinkError, format_console_output};
use std::io::{self, IsTerminal, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::Session;
use crate::config::Config;
use crate::{Cli, clear_interrupted_flag, was_interrupted};

const POLL_WAIT: Duration = Duration::from_millis(50);
const KEY_POLL: Duration = Duration::from_millis(50);

/// Run the console monitor.
///
/// - Poll thread: device console → terminal (with optional timestamps)
/// - Main thread: keyboard (crossterm raw mode) → device
/// - Ctrl+C: exit
/// - Ctrl+R: reset device (DTR/RTS pulse)
/// - Ctrl+T: toggle timestamp display
pub(crate) fn cmd_monitor(cli: &Cli, config: &mut Config, timestamp: bool) -> Result<()> {
    use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
    use crossterm::terminal;

    let tty_mode = io::stdout().is_terminal() && io::stderr().is_terminal();
    let term_lock = Arc::new(Mutex::new(()));
    let show_timestamp = Arc::new(AtomicBool::new(timestamp));
    let force_line_start = Arc::new(AtomicBool::new(false));

    let session = Session::open(
        cli,
        config,
        console_printer(
            Arc::clone(&term_lock),
            Arc::clone(&show_timestamp),
            Arc::clone(&force_line_start),
            tty_mode,
        ),
    )?;
    print_status_line(
        &term_lock,
        &style("Press Ctrl+C to exit, Ctrl+R to reset, Ctrl+T to toggle timestamps")
            .dim()
            .to_string(),
        tty_mode,
    );

    let conn = session.conn();
    let running = AtomicBool::new(true);
    // Keeps the poll thread off the port while the main thread resets it
    let paused = AtomicBool::new(false);
    clear_interrupted_flag();

    terminal::enable_raw_mode().context("Failed to enable raw terminal mode")?;
    let raw_guard = RawModeGuard;

    let result = thread::scope(|s| -> Result<()> {
        let running = &running;
        let paused = &paused;
        s.spawn(move || {
            while running.load(Ordering::Relaxed) {
                if paused.load(Ordering::Acquire) {
                    thread::sleep(POLL_WAIT);
                    continue;
                }
                if let Err(e) = conn.poll_console(POLL_WAIT) {
                    error!("Console read failed: {e}");
                    running.store(false, Ordering::Relaxed);
                }
            }
        });

        let keyboard = (|| -> Result<()> {
            while running.load(Ordering::Relaxed) {
                if was_interrupted() {
                    break;
                }
                if !event::poll(KEY_POLL)? {
                    continue;
                }
                let Event::Key(KeyEvent {
                    code, modifiers, ..
                }) = event::read()?
                else {
                    continue;
                };

                let bytes: Option<Vec<u8>> = match (code, modifiers) {
                    (KeyCode::Char('c'), KeyModifiers::CONTROL) => break,
                    (KeyCode::Char('r'), KeyModifiers::CONTROL) => {
                        force_line_start.store(true, Ordering::Relaxed);
                        print_status_line(
                            &term_lock,
                            &format!("{} Resetting device...", style("🔄").cyan()),
                            tty_mode,
                        );
                        paused.store(true, Ordering::Release);
                        let reset = reset_when_idle(|| conn.reset_device());
                        paused.store(false, Ordering::Release);
                        if let Err(e) = reset {
                            print_status_line(
                                &term_lock,
                                &format!("{} Reset failed: {e}", style("⚠").yellow()),
                                tty_mode,
                            );
                        }
                        None
                    },
                    (KeyCode::Char('t'), KeyModifiers::CONTROL) => {
                        let enabled = !show_timestamp.fetch_xor(true, Ordering::Relaxed);
                        force_line_start.store(true, Ordering::Relaxed);
                        let state = if enabled {
                            "Timestamps on"
                        } else {
                            "Timestamps off"
                        };
                        print_status_line(
                            &term_lock,
                            &format!("{} {state}", style("⏱").cyan()),
                            tty_mode,
                        );
                        None
                    },
                    // Send \r\n: the MicroPython REPL accepts both
                    (KeyCode::Enter, _) => Some(b"\r\n".to_vec()),
                    (KeyCode::Char(c), KeyModifiers::NONE | KeyModifiers::SHIFT) => {
                        let mut buf = [0u8; 4];
                        Some(c.encode_utf8(&mut buf).as_bytes().to_vec())
                    },
                    // Ctrl+D soft-reboots MicroPython
                    (KeyCode::Char('d'), KeyModifiers::CONTROL) => Some(vec![0x04]),
                    (KeyCode::Backspace, _) => Some(vec![0x08]),
                    (KeyCode::Tab, _) => Some(vec![0x09]),
                    (KeyCode::Esc, _) => Some(vec![0x1B]),
                    _ => None,
                };

                if let Some(bytes) = bytes {
                    conn.write(&bytes).context("Failed to write to device")?;
                }
            }
            Ok(())
        })();

        running.store(false, Ordering::Relaxed);
        keyboard
    });

    drop(raw_guard);
    clear_interrupted_flag();
    session.finish()?;
    print_status_line(
        &term_lock,
        &format!("{} Monitor closed", style("👋").cyan()),
        tty_mode,
    );
    result
}

/// Retry `reset` while the poll thread still holds the connection.
fn reset_when_idle(mut reset: impl FnMut() -> m5link::Result<()>) -> m5link::Result<()> {
    const ATTEMPTS: usize = 10;

    let mut last = Ok(());
    for _ in 0..ATTEMPTS {
        last = reset();
        match last {
            Err(LinkError::Busy) => thread::sleep(POLL_WAIT),
            _ => return last,
        }
    }
    last
}

/// Build the printer that renders console events in the terminal.
fn console_printer(
    term_lock: Arc<Mutex<()>>,
    show_timestamp: Arc<AtomicBool>,
    force_line_start: Arc<AtomicBool>,
    tty_mode: bool,
) -> impl FnMut(ConsoleEvent) + Send + 'static {
    // Must match the real cursor state or timestamps land mid-line
    let mut at_line_start = true;

    move |event| {
        let ConsoleEvent::Output(text) = event else {
            return;
        };
        let Ok(_guard) = term_lock.lock() else {
            return;
        };

        let mut out = String::new();
        if force_line_start.swap(false, Ordering::Relaxed) && !at_line_start {
            out.push_str("\r\n");
            at_line_start = true;
        }
        let formatted = format_console_output(
            &text,
            show_timestamp.load(Ordering::Relaxed),
            &mut at_line_start,
        );
        // Raw mode disables output post-processing
        if tty_mode {
            out.push_str(&formatted.replace("\r\n", "\n").replace('\n', "\r\n"));
            eprint!("{out}");
            io::stderr().flush().ok();
        } else {
            out.push_str(&formatted);
            print!("{out}");
            io::stdout().flush().ok();
        }
    }
}

/// Print a status line without tearing a partially printed device line.
fn print_status_line(term_lock: &Mutex<()>, message: &str, tty_mode: bool) {
    if let Ok(_guard) = term_lock.lock() {
        if tty_mode {
            eprint!("\r\x1b[2K{message}\r\n");
        } else {
            eprintln!("{message}");
        }
        io::stderr().flush().ok();
    }
}

/// RAII guard to restore terminal mode on drop.
struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}
