//! Board profiles.
//!
//! A board profile fixes everything the bootloader session needs to know
//! about a target: the speed its bootloader listens at, the signature of the
//! microcontroller, and the flash page size.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Static description of a supported board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BoardProfile {
    /// Canonical lowercase name.
    pub name: &'static str,
    /// Baud rate of the bootloader.
    pub baud_rate: u32,
    /// Expected device signature.
    pub signature: [u8; 3],
    /// Flash page size in bytes.
    pub page_size: u16,
    /// Per-command timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Every supported board.
pub const BOARDS: &[BoardProfile] = &[
    BoardProfile {
        name: "uno",
        baud_rate: 115200,
        signature: [0x1E, 0x95, 0x0F],
        page_size: 128,
        timeout_ms: 400,
    },
    BoardProfile {
        name: "nano",
        baud_rate: 57600,
        signature: [0x1E, 0x95, 0x0F],
        page_size: 128,
        timeout_ms: 400,
    },
    BoardProfile {
        name: "mega",
        baud_rate: 115200,
        signature: [0x1E, 0x98, 0x01],
        page_size: 256,
        timeout_ms: 400,
    },
];

impl BoardProfile {
    /// Look up a board by name, ignoring case.
    pub fn lookup(name: &str) -> Result<&'static Self> {
        BOARDS
            .iter()
            .find(|b| {
                b.name
                    .eq_ignore_ascii_case(name)
            })
            .ok_or_else(|| Error::UnknownBoard {
                name: name.to_string(),
            })
    }

    /// Names of all supported boards.
    pub fn names() -> impl Iterator<Item = &'static str> {
        BOARDS
            .iter()
            .map(|b| b.name)
    }

    /// Per-command timeout.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Signature formatted as `1e 95 0f`.
    pub fn signature_hex(&self) -> String {
        crate::error::hex_bytes(&self.signature)
    }
}

impl fmt::Display for BoardProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} baud, {}-byte pages, signature {})",
            self.name,
            self.baud_rate,
            self.page_size,
            self.signature_hex()
        )
    }
}
