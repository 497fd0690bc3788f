//! Scripted in-memory port for unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// Inspection handle shared with a [`MockPort`] after it has been moved
/// into a session.
#[derive(Clone, Default)]
pub(crate) struct MockHandle {
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    closes: Arc<AtomicUsize>,
    lines: Arc<Mutex<Vec<(&'static str, bool)>>>,
}

impl MockHandle {
    /// Every frame written, one entry per `write` call.
    pub(crate) fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Written frames whose first byte is `opcode`.
    pub(crate) fn frames_with(&self, opcode: u8) -> Vec<Vec<u8>> {
        self.written()
            .into_iter()
            .filter(|f| f.first() == Some(&opcode))
            .collect()
    }

    /// How many times `close` was called.
    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// DTR/RTS transitions in call order.
    pub(crate) fn line_changes(&self) -> Vec<(&'static str, bool)> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

/// Port whose replies are produced by a closure over each written frame.
///
/// Each reply is a list of chunks, delivered one per `read` call so tests
/// can exercise fragmented responses. With nothing queued, `read` reports
/// `TimedOut`, `Ok(0)` once [`MockPort::eof_when_idle`] is set, or the
/// error kind given to [`MockPort::fail_reads_with`].
pub(crate) struct MockPort {
    responder: Responder,
    pending: VecDeque<Vec<u8>>,
    handle: MockHandle,
    eof_when_idle: bool,
    read_error: Option<io::ErrorKind>,
    fail_lines: bool,
    timeout: Duration,
}

impl MockPort {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        Self {
            responder: Box::new(responder),
            pending: VecDeque::new(),
            handle: MockHandle::default(),
            eof_when_idle: false,
            read_error: None,
            fail_lines: false,
            timeout: Duration::from_millis(10),
        }
    }

    /// A port that never answers.
    pub(crate) fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    /// Queue bytes to be read before anything is written.
    pub(crate) fn with_pending(mut self, chunks: Vec<Vec<u8>>) -> Self {
        self.pending.extend(chunks);
        self
    }

    pub(crate) fn eof_when_idle(mut self) -> Self {
        self.eof_when_idle = true;
        self
    }

    /// Report `kind` from `read` whenever nothing is queued.
    pub(crate) fn fail_reads_with(mut self, kind: io::ErrorKind) -> Self {
        self.read_error = Some(kind);
        self
    }

    /// Make every DTR/RTS change fail.
    pub(crate) fn fail_line_changes(mut self) -> Self {
        self.fail_lines = true;
        self
    }

    fn set_line(&mut self, line: &'static str, level: bool) -> Result<()> {
        if self.fail_lines {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "modem lines unavailable").into());
        }
        if let Ok(mut l) = self.handle.lines.lock() {
            l.push((line, level));
        }
        Ok(())
    }

    pub(crate) fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(mut chunk) = self.pending.pop_front() else {
            if let Some(kind) = self.read_error {
                return Err(io::Error::new(kind, "injected read failure"));
            }
            if self.eof_when_idle {
                return Ok(0);
            }
            std::thread::sleep(self.timeout.min(Duration::from_millis(1)));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            chunk.drain(..n);
            self.pending.push_front(chunk);
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut w) = self.handle.written.lock() {
            w.push(buf.to_vec());
        }
        let reply = (self.responder)(buf);
        self.pending
            .extend(reply.into_iter().filter(|c| !c.is_empty()));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.set_line("dtr", level)
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.set_line("rts", level)
    }

    fn close(&mut self) -> Result<()> {
        self.handle.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
