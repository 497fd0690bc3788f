//! Intel HEX decoding into a flat flash image.
//!
//! ## Record Format
//!
//! ```text
//! +-------+-------+---------+------+-----------------+----------+
//! | Start | Count | Address | Type |      Data       | Checksum |
//! +-------+-------+---------+------+-----------------+----------+
//! |  ':'  |  LL   |  AAAA   |  TT  |  DD ... (LL)    |    CC    |
//! +-------+-------+---------+------+-----------------+----------+
//! ```
//!
//! Every field is encoded as pairs of hexadecimal digits. The checksum pair
//! is decoded but never validated, matching what AVR bootloader uploaders
//! have always accepted.
//!
//! Bytes that no data record touches are left at the erased-flash value
//! `0xFF`, so records may arrive in any order.

use crate::error::{Error, Result};
use log::{debug, trace};
use std::ops::Deref;

/// Value of erased flash; fills every gap between data records.
pub const EMPTY_VALUE: u8 = 0xFF;

/// Initial backing buffer size.
const INITIAL_CAPACITY: usize = 8192;

/// Largest image the decoder will materialize (16 MiB).
pub const MAX_IMAGE_LEN: usize = 16 * 1024 * 1024;

/// Intel HEX record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// Data bytes at the record address.
    Data,
    /// End of file; stops decoding.
    EndOfFile,
    /// Sets the address base to `value << 4`.
    ExtendedSegmentAddress,
    /// Sets the address base to `value << 16`.
    ExtendedLinearAddress,
    /// Any other type (start address records and the like); ignored.
    Other(u8),
}

impl From<u8> for RecordType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Data,
            1 => Self::EndOfFile,
            2 => Self::ExtendedSegmentAddress,
            4 => Self::ExtendedLinearAddress,
            v => Self::Other(v),
        }
    }
}

/// One decoded record. Only lives for the duration of a parse step.
#[derive(Debug)]
struct HexRecord {
    address: u16,
    record_type: RecordType,
    data: Vec<u8>,
    checksum: u8,
}

impl HexRecord {
    /// Decode a single `:LLAAAATT...CC` token.
    fn decode(token: &str, line: usize) -> Result<Self> {
        let Some(body) = token.strip_prefix(':') else {
            return Err(parse_error(line, "record does not start with ':'"));
        };

        let mut digits = HexDigits {
            digits: body.as_bytes(),
            pos: 0,
            line,
        };

        let count = digits.byte("byte count")?;
        let address = u16::from_be_bytes([digits.byte("address")?, digits.byte("address")?]);
        let record_type = RecordType::from(digits.byte("record type")?);

        let mut data = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            data.push(digits.byte("data")?);
        }
        let checksum = digits.byte("checksum")?;

        Ok(Self {
            address,
            record_type,
            data,
            checksum,
        })
    }

    /// Big-endian 16-bit payload of an extended address record.
    fn address_base(&self, line: usize) -> Result<usize> {
        match self.data[..] {
            [high, low] => Ok(usize::from(u16::from_be_bytes([high, low]))),
            _ => Err(parse_error(
                line,
                format!(
                    "address record carries {} data bytes, expected 2",
                    self.data.len()
                ),
            )),
        }
    }
}

/// Cursor over the hexadecimal digits of one record.
struct HexDigits<'a> {
    digits: &'a [u8],
    pos: usize,
    line: usize,
}

impl HexDigits<'_> {
    fn byte(&mut self, field: &str) -> Result<u8> {
        let pair = self
            .digits
            .get(self.pos..self.pos + 2)
            .ok_or_else(|| parse_error(self.line, format!("record truncated in {field}")))?;

        let nibble = |c: u8| {
            char::from(c)
                .to_digit(16)
                .and_then(|d| u8::try_from(d).ok())
                .ok_or_else(|| {
                    parse_error(
                        self.line,
                        format!("invalid hex digit {:?} in {field}", char::from(c)),
                    )
                })
        };

        let value = (nibble(pair[0])? << 4) | nibble(pair[1])?;
        self.pos += 2;
        Ok(value)
    }
}

fn parse_error(line: usize, reason: impl Into<String>) -> Error {
    Error::Parse {
        line,
        reason: reason.into(),
    }
}

/// Flat flash image addressed from zero.
///
/// Unwritten bytes are [`EMPTY_VALUE`]. The length is the end of the
/// highest data record.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct FlashImage {
    data: Vec<u8>,
}

impl FlashImage {
    /// Wrap raw bytes as an image.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Decode Intel HEX text.
    pub fn from_hex(text: &str) -> Result<Self> {
        parse(text)
    }

    /// Number of pages of `page_size` bytes needed to hold the image.
    pub fn page_count(&self, page_size: usize) -> usize {
        if page_size == 0 {
            return 0;
        }
        self.data.len().div_ceil(page_size)
    }

    /// Range covering every byte that differs from [`EMPTY_VALUE`].
    pub fn used_range(&self) -> Option<std::ops::Range<usize>> {
        let first = self.data.iter().position(|&b| b != EMPTY_VALUE)?;
        let last = self.data.iter().rposition(|&b| b != EMPTY_VALUE)?;
        Some(first..last + 1)
    }
}

impl Deref for FlashImage {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for FlashImage {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for FlashImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashImage")
            .field("len", &self.data.len())
            .finish()
    }
}

/// Decode Intel HEX text into a [`FlashImage`].
///
/// Records are separated by any whitespace. Line numbers in errors count
/// records from 1. A missing end-of-file record is tolerated.
pub fn parse(text: &str) -> Result<FlashImage> {
    let mut buf: Vec<u8> = Vec::with_capacity(INITIAL_CAPACITY);
    let mut base: usize = 0;

    for (index, token) in text.split_ascii_whitespace().enumerate() {
        let line = index + 1;
        let record = HexRecord::decode(token, line)?;

        match record.record_type {
            RecordType::Data => {
                let start = base.saturating_add(usize::from(record.address));
                let end = match start.checked_add(record.data.len()) {
                    Some(end) if end <= MAX_IMAGE_LEN => end,
                    _ => {
                        return Err(parse_error(
                            line,
                            format!(
                                "address 0x{start:X} is beyond the {MAX_IMAGE_LEN} byte image limit"
                            ),
                        ));
                    },
                };
                trace!(
                    "data: {} bytes @ 0x{start:05X} (checksum {:#04x} not verified)",
                    record.data.len(),
                    record.checksum
                );
                if end > buf.len() {
                    // Vec growth is amortized; the gap is erased flash.
                    buf.resize(end, EMPTY_VALUE);
                }
                buf[start..end].copy_from_slice(&record.data);
            },
            RecordType::EndOfFile => {
                debug!("End of file at line {line}, image is {} bytes", buf.len());
                return Ok(FlashImage::from_bytes(buf));
            },
            RecordType::ExtendedSegmentAddress => {
                base = record.address_base(line)? << 4;
                trace!("segment base 0x{base:X}");
            },
            RecordType::ExtendedLinearAddress => {
                base = record.address_base(line)? << 16;
                trace!("linear base 0x{base:X}");
            },
            RecordType::Other(kind) => {
                trace!("ignoring record type {kind:#04x} at line {line}");
            },
        }
    }

    debug!("No end-of-file record, image is {} bytes", buf.len());
    Ok(FlashImage::from_bytes(buf))
}
