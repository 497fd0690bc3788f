//! Upload targets and the bootloader session.

pub mod board;
pub mod session;

pub use board::{BOARDS, BoardProfile};
pub use session::{BootloaderSession, SessionOptions, SessionState, UploadReport};

use log::debug;

use crate::error::{Error, Result};
use crate::image::FlashImage;
use crate::port::Port;

/// Parse `hex_text` and upload it to `board_name` over an open port.
///
/// The port is closed before this returns, whatever the outcome.
pub fn upload<P, F>(
    mut port: P,
    hex_text: &str,
    board_name: &str,
    options: SessionOptions,
    progress: F,
) -> Result<UploadReport>
where
    P: Port,
    F: FnMut(u8),
{
    let board = match BoardProfile::lookup(board_name) {
        Ok(board) => board,
        Err(e) => {
            if let Err(close_err) = port.close() {
                debug!("Error closing {}: {close_err}", port.name());
            }
            return Err(e);
        },
    };
    // From here on the session's drop guard closes the port.
    let mut session = BootloaderSession::with_options(port, board, options);
    let image = parse_hex_required(hex_text)?;
    session.run(&image, progress)
}

/// Upload `hex_text` to `board_name` over the serial port `port_name`,
/// opened at the board's baud rate.
#[cfg(feature = "native")]
pub fn upload_to_serial<F>(
    port_name: &str,
    hex_text: &str,
    board_name: &str,
    options: SessionOptions,
    progress: F,
) -> Result<UploadReport>
where
    F: FnMut(u8),
{
    // Board errors win over HEX errors.
    BoardProfile::lookup(board_name)?;
    let image = parse_hex_required(hex_text)?;
    upload_image_to_serial(port_name, &image, board_name, options, progress)
}

/// Upload an already parsed image to `board_name` over the serial port
/// `port_name`, opened at the board's baud rate.
#[cfg(feature = "native")]
pub fn upload_image_to_serial<F>(
    port_name: &str,
    image: &FlashImage,
    board_name: &str,
    options: SessionOptions,
    progress: F,
) -> Result<UploadReport>
where
    F: FnMut(u8),
{
    let board = BoardProfile::lookup(board_name)?;

    log::info!("Opening {port_name} for {board}");
    let port = crate::port::NativePort::open_simple(port_name, board.baud_rate)?;
    BootloaderSession::with_options(port, board, options).run(image, progress)
}

/// Parse HEX text, rejecting input that holds no records at all.
pub fn parse_hex_required(hex_text: &str) -> Result<FlashImage> {
    if hex_text.trim().is_empty() {
        return Err(Error::Parse {
            line: 0,
            reason: "HEX data is required".to_string(),
        });
    }
    FlashImage::from_hex(hex_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;
    use crate::protocol::stk500::OK_RESPONSE;
    use std::time::Duration;

    const BLINK: &str = ":0300300002337A1E\n:0B0030000C94360000000000000000FD\n:00000001FF\n";

    fn fast_options() -> SessionOptions {
        SessionOptions::new()
            .with_page_write_delay(Duration::ZERO)
            .with_reset_timing(Duration::ZERO, Duration::ZERO)
            .with_command_timeout(Duration::from_millis(20))
    }

    fn responsive_port() -> MockPort {
        MockPort::new(|frame| {
            if frame[0] == 0x75 {
                vec![vec![0x14, 0x1E, 0x95, 0x0F, 0x10]]
            } else {
                vec![OK_RESPONSE.to_vec()]
            }
        })
    }

    #[test]
    fn test_upload_hex_text() {
        let port = responsive_port();
        let handle = port.handle();
        let report = upload(port, BLINK, "uno", fast_options(), |_| {}).unwrap();
        assert_eq!(report.bytes_written, 0x3B);
        assert_eq!(report.pages, 1);
        assert_eq!(handle.close_count(), 1);
    }

    #[test]
    fn test_upload_unknown_board_closes_port() {
        let port = responsive_port();
        let handle = port.handle();
        let err = upload(port, BLINK, "due", fast_options(), |_| {}).unwrap_err();
        assert!(matches!(err, Error::UnknownBoard { .. }));
        assert!(handle.written().is_empty());
        assert_eq!(handle.close_count(), 1);
    }

    #[test]
    fn test_upload_requires_hex() {
        let port = responsive_port();
        let handle = port.handle();
        let err = upload(port, "  \n", "uno", fast_options(), |_| {}).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 0, .. }));
        assert!(handle.written().is_empty());
        assert_eq!(handle.close_count(), 1);
    }

    #[test]
    fn test_upload_bad_hex_sends_nothing() {
        let port = responsive_port();
        let handle = port.handle();
        let err = upload(port, "0300300002337A1E", "uno", fast_options(), |_| {}).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));
        assert!(handle.written().is_empty());
        assert_eq!(handle.close_count(), 1);
    }

    #[cfg(feature = "native")]
    #[test]
    fn test_upload_to_missing_serial_port() {
        let err = upload_to_serial(
            "/nonexistent/stkflash-port",
            BLINK,
            "uno",
            fast_options(),
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, Error::TransportUnavailable { .. }));
    }

    #[test]
    fn test_parse_hex_required() {
        let image = parse_hex_required(BLINK).unwrap();
        assert_eq!(image.len(), 0x3B);
        assert!(matches!(
            parse_hex_required("\n\t"),
            Err(Error::Parse { line: 0, .. })
        ));
    }

    #[cfg(feature = "native")]
    #[test]
    fn test_upload_image_checks_board_before_opening_port() {
        let image = parse_hex_required(BLINK).unwrap();
        let err = upload_image_to_serial(
            "/nonexistent/stkflash-port",
            &image,
            "due",
            fast_options(),
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownBoard { .. }));

        let err = upload_image_to_serial(
            "/nonexistent/stkflash-port",
            &image,
            "uno",
            fast_options(),
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, Error::TransportUnavailable { .. }));
    }
}
