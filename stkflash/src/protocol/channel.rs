//! Request/response exchange over a port.

use std::time::Duration;

use log::trace;

use crate::error::{Error, Result, hex_bytes};
use crate::port::Port;
use crate::protocol::receiver::ResponseReceiver;
use crate::protocol::stk500::CRC_EOP;

/// What a command's reply must look like.
#[derive(Debug, Clone, Copy)]
pub enum Expectation<'a> {
    /// The reply must equal these bytes.
    Exact(&'a [u8]),
    /// The reply is this many bytes; content is checked by the caller.
    Length(usize),
}

impl Expectation<'_> {
    /// Number of bytes to collect.
    pub fn len(&self) -> usize {
        match self {
            Self::Exact(bytes) => bytes.len(),
            Self::Length(len) => *len,
        }
    }

    /// Whether no bytes are expected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sends one command at a time and waits for its reply.
pub struct CommandChannel<'a, P: Port + ?Sized> {
    port: &'a mut P,
    timeout: Duration,
}

impl<'a, P: Port + ?Sized> CommandChannel<'a, P> {
    /// Create a channel with a per-command timeout.
    pub fn new(port: &'a mut P, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    /// Frame `command`, write it, and collect the reply.
    ///
    /// `CRC_EOP` is appended unless `command` already ends with it.
    pub fn send(&mut self, command: &[u8], expectation: Expectation<'_>) -> Result<Vec<u8>> {
        let mut frame = command.to_vec();
        if frame.last() != Some(&CRC_EOP) {
            frame.push(CRC_EOP);
        }

        trace!("TX [{}]", hex_bytes(&frame));
        self.port.write_all_bytes(&frame)?;

        let response =
            ResponseReceiver::new(&mut *self.port).receive(self.timeout, expectation.len())?;

        if let Expectation::Exact(expected) = expectation {
            if response != expected {
                return Err(Error::ResponseMismatch {
                    got: response,
                    expected: expected.to_vec(),
                });
            }
        }
        Ok(response)
    }
}
