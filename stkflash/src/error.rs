//! Error types for stkflash.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for stkflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for stkflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Malformed Intel HEX input.
    #[error("HEX parse error at line {line}: {reason}")]
    Parse {
        /// 1-based record number.
        line: usize,
        /// What was wrong with the record.
        reason: String,
    },

    /// Board name not present in the board table.
    #[error("Unknown board: {name}")]
    UnknownBoard {
        /// Requested board name.
        name: String,
    },

    /// The bootloader never answered the sync command.
    #[error("Sync failed after {attempts} attempts")]
    SyncFailed {
        /// Number of attempts made.
        attempts: usize,
    },

    /// The bootloader answered, but not with the expected bytes.
    #[error("Response mismatch: got [{}], expected [{}]", hex_bytes(.got), hex_bytes(.expected))]
    ResponseMismatch {
        /// Bytes received.
        got: Vec<u8>,
        /// Bytes expected.
        expected: Vec<u8>,
    },

    /// No complete response arrived within the command timeout.
    #[error("Timeout after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// More bytes arrived than the response may hold.
    #[error("Buffer overflow {got} > {limit}")]
    Overflow {
        /// Bytes accumulated.
        got: usize,
        /// Expected response length.
        limit: usize,
    },

    /// The transport reported end-of-stream before the response completed.
    #[error("Serial stream closed before response completed")]
    StreamClosed,

    /// The serial port could not be opened.
    #[error("Serial port {port} unavailable: {reason}")]
    TransportUnavailable {
        /// Port name/path.
        port: String,
        /// Underlying failure.
        reason: String,
    },

    /// The image extends past what 16-bit word addressing can reach.
    #[error("Image of {len} bytes exceeds the {limit}-byte addressable flash")]
    ImageTooLarge {
        /// Image length in bytes.
        len: usize,
        /// Largest uploadable image.
        limit: usize,
    },

    /// Read-back of a flash page did not match the uploaded image.
    #[error("Verification failed for page at 0x{address:05X}")]
    VerifyFailed {
        /// Byte address of the first page that differs.
        address: usize,
    },
}

impl Error {
    /// Whether this error means the device or its transport misbehaved,
    /// as opposed to bad input.
    pub fn is_device_error(&self) -> bool {
        match self {
            Self::Io(_)
            | Self::SyncFailed { .. }
            | Self::ResponseMismatch { .. }
            | Self::Timeout(_)
            | Self::Overflow { .. }
            | Self::StreamClosed
            | Self::TransportUnavailable { .. }
            | Self::VerifyFailed { .. } => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            Self::Parse { .. } | Self::UnknownBoard { .. } | Self::ImageTooLarge { .. } => false,
        }
    }
}

/// Render bytes as space-separated lowercase hex, e.g. `14 10`.
pub(crate) fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
