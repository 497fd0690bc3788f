//! Response collection from the bootloader.
//!
//! Replies are located by their leading `STK_INSYNC` byte; anything before
//! it (line noise, a stale `NOSYNC`, application output from before the
//! reset) is discarded. A reply is complete once exactly the expected number
//! of bytes has been collected.

use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result, hex_bytes};
use crate::port::Port;
use crate::protocol::stk500::STK_INSYNC;

/// Port read timeout used while waiting without a deadline.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Assembly progress of a single response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// Discarding bytes until `STK_INSYNC` shows up.
    Seeking,
    /// Collecting bytes after `STK_INSYNC`.
    Accumulating,
    /// Exactly the expected number of bytes has been collected.
    Done,
}

/// Pure chunk-consuming state machine behind [`ResponseReceiver`].
#[derive(Debug)]
pub struct ResponseAssembler {
    expected_len: usize,
    buf: Vec<u8>,
    state: AssemblerState,
}

impl ResponseAssembler {
    /// Create an assembler for a response of `expected_len` bytes.
    pub fn new(expected_len: usize) -> Self {
        Self {
            expected_len,
            buf: Vec::with_capacity(expected_len),
            state: AssemblerState::Seeking,
        }
    }

    /// Current state.
    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Bytes collected so far, starting at `STK_INSYNC`.
    pub fn collected(&self) -> &[u8] {
        &self.buf
    }

    /// Consume one chunk.
    ///
    /// Returns the complete response once the expected length is reached.
    /// A chunk that pushes the response past the expected length fails with
    /// [`Error::Overflow`], even when it also contained the final byte.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>> {
        let data = match self.state {
            AssemblerState::Seeking => match chunk.iter().position(|&b| b == STK_INSYNC) {
                Some(start) => {
                    if start > 0 {
                        trace!("Discarding {start} bytes before INSYNC");
                    }
                    self.state = AssemblerState::Accumulating;
                    &chunk[start..]
                },
                None => {
                    trace!("Discarding [{}]", hex_bytes(chunk));
                    return Ok(None);
                },
            },
            AssemblerState::Accumulating => chunk,
            AssemblerState::Done => return Ok(None),
        };

        self.buf.extend_from_slice(data);
        if self.buf.len() > self.expected_len {
            return Err(Error::Overflow {
                got: self.buf.len(),
                limit: self.expected_len,
            });
        }
        if self.buf.len() == self.expected_len {
            self.state = AssemblerState::Done;
            return Ok(Some(std::mem::take(&mut self.buf)));
        }
        Ok(None)
    }
}

/// Reads one response from a port.
pub struct ResponseReceiver<'a, P: Port + ?Sized> {
    port: &'a mut P,
}

impl<'a, P: Port + ?Sized> ResponseReceiver<'a, P> {
    /// Wrap a port for the duration of one response.
    pub fn new(port: &'a mut P) -> Self {
        Self { port }
    }

    /// Collect a response of `expected_len` bytes.
    ///
    /// `timeout` bounds the whole receive; `Duration::ZERO` waits
    /// indefinitely.
    pub fn receive(&mut self, timeout: Duration, expected_len: usize) -> Result<Vec<u8>> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let mut assembler = ResponseAssembler::new(expected_len);
        let mut chunk = [0u8; 256];

        loop {
            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        trace!(
                            "Timed out with [{}] collected",
                            hex_bytes(assembler.collected())
                        );
                        return Err(Error::Timeout(timeout));
                    }
                    remaining
                },
                None => IDLE_POLL,
            };
            self.port
                .set_timeout(wait)?;

            match self
                .port
                .read(&mut chunk)
            {
                Ok(0) => return Err(Error::StreamClosed),
                Ok(n) => {
                    trace!("RX [{}]", hex_bytes(&chunk[..n]));
                    if let Some(response) = assembler.feed(&chunk[..n])? {
                        return Ok(response);
                    }
                },
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {},
                Err(e) => return Err(e.into()),
            }
        }
    }
}
