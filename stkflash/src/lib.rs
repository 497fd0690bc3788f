//! # stkflash
//!
//! A library for uploading firmware to AVR boards through an STK500v1
//! serial bootloader (optiboot and compatible).
//!
//! This crate provides:
//!
//! - Intel HEX parsing into a flat flash image
//! - STK500v1 command encoding and response collection
//! - A bootloader session that resets the board, syncs, identifies the
//!   device and writes the image page by page
//! - Board profiles for Uno, Nano and Mega
//! - Serial port discovery for common Arduino USB bridges
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via `serialport`
//! - `serde`: Serialization support for reports and board profiles
//!
//! ## Example
//!
//! ```rust,no_run
//! use stkflash::SessionOptions;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hex = std::fs::read_to_string("blink.hex")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let report = stkflash::upload_to_serial(
//!             "/dev/ttyACM0",
//!             &hex,
//!             "uno",
//!             SessionOptions::default(),
//!             |percent| println!("Upload progress: {percent}%"),
//!         )?;
//!         println!("Wrote {} bytes", report.bytes_written);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod target;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
#[cfg(feature = "native")]
pub use target::{upload_image_to_serial, upload_to_serial};
pub use {
    device::{DetectedPort, DeviceKind, format_port_list, select_port},
    error::{Error, Result},
    image::{FlashImage, parse},
    port::{Port, SerialConfig},
    target::{
        BOARDS, BoardProfile, BootloaderSession, SessionOptions, SessionState, UploadReport,
        parse_hex_required, upload,
    },
};
