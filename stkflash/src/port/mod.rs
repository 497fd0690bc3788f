//! Port abstraction for the serial link to the bootloader.
//!
//! The protocol layer never talks to a concrete serial driver. It needs a
//! duplex byte channel with a timed read, two modem control lines for the
//! reset pulse, and a way to release the device:
//!
//! ```text
//! +--------------------+
//! |  BootloaderSession |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |   CommandChannel   |
//! |  ResponseReceiver  |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |     Port trait     |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |     NativePort     |
//! |    (serialport)    |
//! +--------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
///
/// STK500v1 bootloaders always run 8 data bits, no parity, one stop bit and
/// no flow control, so only the name, speed and read timeout vary.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Initial read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }
}

/// Duplex byte channel to a bootloader.
///
/// `read` follows the usual serial driver conventions: it returns
/// `ErrorKind::TimedOut` when nothing arrived within the current timeout,
/// and `Ok(0)` only when the stream has ended.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

#[cfg(feature = "native")]
pub use native::NativePort;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.timeout, Duration::from_millis(1000));
        assert!(config.port_name.is_empty());
    }

    #[test]
    fn test_serial_config_new_keeps_default_timeout() {
        let config = SerialConfig::new("/dev/ttyACM0", 57600);

        assert_eq!(config.port_name, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 57600);
        assert_eq!(config.timeout, Duration::from_millis(1000));
    }
}
