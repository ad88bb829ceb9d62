//! Command/reply connection to the on-device file agent.
//!
//! A [`Connection`] owns one open [`Port`] and allows a single outstanding
//! request at a time. Sending a command claims the busy flag, discards unread
//! input, writes the checksummed frame and drains the port. It then reads
//! until a complete reply frame shows up. Bytes that are not part of the
//! reply go to the [`Console`].
//!
//! ```text
//!   Closed ──open──> Opening ──> Idle ──send──> AwaitingReply
//!                                 ^                  │
//!                                 └── frame / error ─┘
//!   any ──close──> Closed
//! ```
//!
//! The busy flag is claimed before the port is touched, so a second sender
//! fails with [`Error::Busy`] instead of waiting behind the first one.

pub mod assembler;

pub use assembler::{DemuxMode, ReplyAssembler};

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};

use crate::console::{Console, drain_utf8_lossy};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::command::CommandCode;
use crate::protocol::frame::{FRAME_HEAD, FrameCodec, build_request};

/// Default time to wait for a reply frame.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default quiet period before held bytes are treated as console text.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(50);

/// Default read timeout of a single poll while awaiting a reply.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Delay between writing a command and clearing the console.
pub const CONSOLE_CLEAR_DELAY: Duration = Duration::from_millis(100);

const READ_BUF_LEN: usize = 1024;

/// Tunables for a [`Connection`].
#[derive(Debug, Clone, Copy)]
pub struct LinkOptions {
    /// Give up on a reply after this long. `None` waits forever.
    pub reply_timeout: Option<Duration>,
    /// How non-reply bytes reach the console.
    pub demux: DemuxMode,
    /// Quiet period used by [`DemuxMode::Deferred`].
    pub grace: Duration,
    /// Read timeout of one poll.
    pub poll_interval: Duration,
    /// Delay before a requested console clear.
    pub clear_delay: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            reply_timeout: Some(DEFAULT_REPLY_TIMEOUT),
            demux: DemuxMode::Immediate,
            grace: DEFAULT_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            clear_delay: CONSOLE_CLEAR_DELAY,
        }
    }
}

impl LinkOptions {
    /// Set the reply timeout.
    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Set the demultiplexing mode.
    #[must_use]
    pub fn with_demux(mut self, demux: DemuxMode) -> Self {
        self.demux = demux;
        self
    }
}

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The transport is closed; terminal.
    Closed,
    /// The transport is being opened.
    Opening,
    /// Open, no request outstanding.
    Idle,
    /// A request was written and its reply is being assembled.
    AwaitingReply,
}

struct Link<P> {
    port: Option<P>,
    /// Incomplete UTF-8 sequence left over from the last console batch.
    carry: Vec<u8>,
}

/// Clears the busy flag when the request ends, however it ends.
struct BusyGuard<'a> {
    busy: &'a AtomicBool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Single-outstanding-request connection over a [`Port`].
pub struct Connection<P: Port> {
    link: Mutex<Link<P>>,
    busy: AtomicBool,
    state: Mutex<ConnectionState>,
    console: Console,
    codec: FrameCodec,
    options: LinkOptions,
    port_name: String,
}

impl<P: Port> Connection<P> {
    /// Wrap an already opened port.
    pub fn new(port: P, console: Console, options: LinkOptions) -> Self {
        let port_name = port.name().to_string();
        debug!("{port_name}: {:?} -> {:?}", ConnectionState::Opening, ConnectionState::Idle);
        Self {
            link: Mutex::new(Link {
                port: Some(port),
                carry: Vec::new(),
            }),
            busy: AtomicBool::new(false),
            state: Mutex::new(ConnectionState::Idle),
            console,
            codec: FrameCodec::new(),
            options,
            port_name,
        }
    }

    /// Use a different frame codec.
    #[must_use]
    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Name of the underlying port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a request is outstanding.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// The console this connection writes to.
    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Options in effect.
    pub fn options(&self) -> &LinkOptions {
        &self.options
    }

    /// Send a command and wait for its reply payload.
    ///
    /// Fails with [`Error::Device`] when the device answers with a non-zero
    /// status, and with [`Error::Busy`] when another request is outstanding.
    pub fn send_command(
        &self,
        command: CommandCode,
        payload: &str,
        clear_output_first: bool,
    ) -> Result<Vec<u8>> {
        debug!(
            "{}: sending {} ({} payload bytes)",
            self.port_name,
            command.name(),
            payload.len()
        );
        self.send_command_with_buffer(&build_request(command.code(), payload), clear_output_first)
    }

    /// Send a caller-built request buffer; the checksum trailer is appended here.
    pub fn send_command_with_buffer(
        &self,
        request: &[u8],
        clear_output_first: bool,
    ) -> Result<Vec<u8>> {
        if !request.starts_with(&FRAME_HEAD) {
            return Err(Error::Protocol(format!(
                "request does not start with the frame head: {:02X?}",
                &request[..request.len().min(FRAME_HEAD.len())]
            )));
        }
        let _guard = self.claim()?;
        let mut link = self.lock_link();
        let Link { port, carry } = &mut *link;
        let port = port.as_mut().ok_or(Error::NotConnected)?;

        self.set_state(ConnectionState::AwaitingReply);
        let result = self.exchange(port, carry, request, clear_output_first);
        self.set_state(ConnectionState::Idle);

        match &result {
            Err(e) if e.is_request_local() => warn!("{}: request failed: {e}", self.port_name),
            Err(e) => error!("{}: request aborted by a link failure: {e}", self.port_name),
            Ok(_) => {},
        }
        result
    }

    /// Write raw bytes and wait for the port to drain them.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut link = self.lock_link();
        let port = link.port.as_mut().ok_or(Error::NotConnected)?;
        trace!("{}: raw write {:02X?}", self.port_name, bytes);
        write_and_drain(port, bytes)
    }

    /// Forward unsolicited device output to the console.
    ///
    /// Waits up to `wait` for data. Returns the number of bytes read; zero
    /// when nothing arrived or a request currently owns the port.
    pub fn poll_console(&self, wait: Duration) -> Result<usize> {
        let Ok(_guard) = self.claim() else {
            return Ok(0);
        };
        let mut link = self.lock_link();
        let Link { port, carry } = &mut *link;
        let port = port.as_mut().ok_or(Error::NotConnected)?;

        port.set_timeout(wait)?;
        let mut buf = [0u8; READ_BUF_LEN];
        match port.read(&mut buf) {
            Ok(n) => {
                self.emit(carry, &buf[..n]);
                Ok(n)
            },
            Err(e) if is_idle_read(&e) => Ok(0),
            Err(e) => {
                error!("{}: transport error: {e}", self.port_name);
                Err(Error::Transport(e))
            },
        }
    }

    /// Pulse the auto-reset circuit found on ESP32-based boards.
    pub fn reset_device(&self) -> Result<()> {
        let _guard = self.claim()?;
        let mut link = self.lock_link();
        let port = link.port.as_mut().ok_or(Error::NotConnected)?;

        info!("Resetting device on {}", self.port_name);
        port.set_dtr(false)?;
        port.set_rts(true)?;
        thread::sleep(Duration::from_millis(100));
        port.set_rts(false)?;
        Ok(())
    }

    /// Close the transport. Later requests fail with [`Error::NotConnected`].
    pub fn close(&self) -> Result<()> {
        let mut link = self.lock_link();
        let result = match link.port.take() {
            Some(mut port) => port.close(),
            None => Ok(()),
        };
        link.carry.clear();
        self.busy.store(false, Ordering::Release);
        self.set_state(ConnectionState::Closed);
        info!("closed connection on {}", self.port_name);
        result
    }

    fn claim(&self) -> Result<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        Ok(BusyGuard { busy: &self.busy })
    }

    fn lock_link(&self) -> MutexGuard<'_, Link<P>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != ConnectionState::Closed && *state != next {
            debug!("{}: {:?} -> {next:?}", self.port_name, *state);
            *state = next;
        }
    }

    fn exchange(
        &self,
        port: &mut P,
        carry: &mut Vec<u8>,
        request: &[u8],
        clear_output_first: bool,
    ) -> Result<Vec<u8>> {
        port.clear_buffers()?;

        let frame = self.codec.append_checksum(request);
        trace!("{}: -> {:02X?}", self.port_name, frame);
        write_and_drain(port, &frame)?;

        if clear_output_first {
            self.console.clear_after(self.options.clear_delay);
        }

        self.await_reply(port, carry)
    }

    fn await_reply(&self, port: &mut P, carry: &mut Vec<u8>) -> Result<Vec<u8>> {
        let mut assembler = ReplyAssembler::new(self.codec, self.options.demux);
        let started = Instant::now();
        let mut last_data = started;
        let mut buf = [0u8; READ_BUF_LEN];

        port.set_timeout(self.options.poll_interval)?;

        loop {
            match port.read(&mut buf) {
                Ok(0) => {},
                Ok(n) => {
                    trace!("{}: <- {:02X?}", self.port_name, &buf[..n]);
                    last_data = Instant::now();
                    let frame = assembler.feed(&buf[..n]);
                    self.emit(carry, &assembler.take_console());

                    if let Some(frame) = frame {
                        debug!(
                            "{}: reply code {:#04x} status {:#04x}, {} payload bytes",
                            self.port_name,
                            frame.code,
                            frame.status,
                            frame.payload.len()
                        );
                        return frame.into_result();
                    }
                },
                Err(e) if is_idle_read(&e) => {},
                Err(e) => {
                    error!("{}: transport error while awaiting reply: {e}", self.port_name);
                    assembler.flush_held();
                    self.emit(carry, &assembler.take_console());
                    return Err(Error::Transport(e));
                },
            }

            if assembler.has_held() && last_data.elapsed() >= self.options.grace {
                assembler.flush_held();
                self.emit(carry, &assembler.take_console());
            }

            if let Some(limit) = self.options.reply_timeout {
                if started.elapsed() >= limit {
                    assembler.flush_held();
                    self.emit(carry, &assembler.take_console());
                    return Err(Error::Timeout(format!(
                        "no reply frame within {} ms ({} bytes received)",
                        limit.as_millis(),
                        assembler.buffered().len()
                    )));
                }
            }
        }
    }

    fn emit(&self, carry: &mut Vec<u8>, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        carry.extend_from_slice(bytes);
        self.console.output(drain_utf8_lossy(carry));
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{Connection, ConnectionState, LinkOptions};
    use crate::console::Console;
    use crate::error::{Error, Result};
    use crate::port::{NativePort, SerialConfig};
    use log::{debug, info, warn};
    use std::thread;
    use std::time::Duration;

    const MAX_OPEN_PORT_ATTEMPTS: usize = 3;
    const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

    impl Connection<NativePort> {
        /// Open the serial port described by `config`.
        ///
        /// Retries a few times, since USB-UART bridges often need a moment
        /// after enumeration. A failure is reported once as [`Error::Open`].
        pub fn open(config: &SerialConfig, console: Console, options: LinkOptions) -> Result<Self> {
            config.validate()?;
            let port_name = &config.port_name;
            debug!(
                "{port_name}: {:?} -> {:?}",
                ConnectionState::Closed,
                ConnectionState::Opening
            );

            let mut last_error = None;
            for attempt in 1..=MAX_OPEN_PORT_ATTEMPTS {
                match NativePort::open(config) {
                    Ok(port) => {
                        if attempt > 1 {
                            debug!("Port opened on attempt {attempt}");
                        }
                        info!("opened connection on {port_name}");
                        return Ok(Self::new(port, console, options));
                    },
                    Err(e) => {
                        warn!(
                            "Failed to open port {port_name} (attempt {attempt}/{MAX_OPEN_PORT_ATTEMPTS}): {e}"
                        );
                        last_error = Some(e);
                        if attempt < MAX_OPEN_PORT_ATTEMPTS {
                            thread::sleep(OPEN_RETRY_DELAY);
                        }
                    },
                }
            }

            Err(Error::Open {
                port: port_name.clone(),
                reason: last_error.map_or_else(|| "unknown error".to_string(), |e| e.to_string()),
            })
        }
    }
}

fn write_and_drain<P: Port>(port: &mut P, bytes: &[u8]) -> Result<()> {
    port.write_all(bytes)
        .and_then(|()| port.flush())
        .map_err(Error::Write)
}

fn is_idle_read(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}
