//! Scripted in-memory port for unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

/// One scripted read result.
#[derive(Debug, Clone)]
pub(crate) enum Incoming {
    /// A batch of bytes delivered by a single `read`.
    Data(Vec<u8>),
    /// A read that fails with the given error kind.
    Error(io::ErrorKind),
    /// A read that blocks for the given time, then times out with no data.
    Pause(Duration),
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Incoming> + Send>;

#[derive(Default)]
struct Shared {
    inbox: VecDeque<Incoming>,
    requests: Vec<Vec<u8>>,
    clears: usize,
    flush_error: Option<io::ErrorKind>,
    lines: Vec<(&'static str, bool)>,
    closed: bool,
}

/// Port whose reads come from a script and whose writes are recorded.
pub(crate) struct MockPort {
    name: String,
    shared: Arc<Mutex<Shared>>,
    pending: Vec<u8>,
    responder: Option<Responder>,
}

/// Test-side view of a [`MockPort`] after it was moved into a connection.
#[derive(Clone)]
pub(crate) struct MockHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MockPort {
    pub(crate) fn new() -> (Self, MockHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let port = Self {
            name: "mock0".to_string(),
            shared: Arc::clone(&shared),
            pending: Vec::new(),
            responder: None,
        };
        (port, MockHandle { shared })
    }

    /// Answer every flushed request with the batches returned by `responder`.
    pub(crate) fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<Incoming> + Send + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }
}

impl MockHandle {
    pub(crate) fn push(&self, bytes: &[u8]) {
        self.shared
            .lock()
            .unwrap()
            .inbox
            .push_back(Incoming::Data(bytes.to_vec()));
    }

    pub(crate) fn requests(&self) -> Vec<Vec<u8>> {
        self.shared.lock().unwrap().requests.clone()
    }

    pub(crate) fn clears(&self) -> usize {
        self.shared.lock().unwrap().clears
    }

    pub(crate) fn fail_next_flush(&self, kind: io::ErrorKind) {
        self.shared.lock().unwrap().flush_error = Some(kind);
    }

    pub(crate) fn lines(&self) -> Vec<(&'static str, bool)> {
        self.shared.lock().unwrap().lines.clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.lock().unwrap().closed
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut shared = self.shared.lock().unwrap();
        match shared.inbox.pop_front() {
            Some(Incoming::Data(mut data)) => {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    shared.inbox.push_front(Incoming::Data(rest));
                }
                Ok(n)
            },
            Some(Incoming::Error(kind)) => Err(io::Error::new(kind, "scripted failure")),
            Some(Incoming::Pause(gap)) => {
                drop(shared);
                std::thread::sleep(gap);
                Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
            },
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let request = std::mem::take(&mut self.pending);
        if let Some(kind) = self.shared.lock().unwrap().flush_error.take() {
            return Err(io::Error::new(kind, "scripted drain failure"));
        }

        let replies = match self.responder.as_mut() {
            Some(responder) => responder(&request),
            None => Vec::new(),
        };

        let mut shared = self.shared.lock().unwrap();
        shared.requests.push(request);
        shared.inbox.extend(replies);
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.inbox.clear();
        shared.clears += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.shared.lock().unwrap().lines.push(("dtr", level));
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.shared.lock().unwrap().lines.push(("rts", level));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.shared.lock().unwrap().closed = true;
        Ok(())
    }
}
