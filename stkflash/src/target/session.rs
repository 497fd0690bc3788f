//! STK500v1 bootloader session.
//!
//! A session owns an open port for the duration of one upload and walks the
//! bootloader through a fixed sequence:
//!
//! ```text
//! Idle -> Reset -> Syncing -> Identifying -> Configuring
//!      -> ProgrammingModeEnter -> Uploading -> [Verifying]
//!      -> ProgrammingModeExit -> Done
//! ```
//!
//! Any failure moves the session to `Failed` and ends it. The port is
//! closed exactly once whichever way the session ends.

use std::fmt;
use std::thread;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::error::{Error, Result, hex_bytes};
use crate::image::FlashImage;
use crate::port::Port;
use crate::protocol::channel::{CommandChannel, Expectation};
use crate::protocol::stk500::{
    CommandFrame, OK_RESPONSE, SIGNATURE_RESPONSE_LEN, STK_OK,
};
use crate::target::board::BoardProfile;

/// Default attempts per sync round.
pub const DEFAULT_SYNC_ATTEMPTS: usize = 3;

/// Default number of consecutive successful syncs required.
pub const DEFAULT_SYNC_ROUNDS: usize = 3;

/// Default pause after each page write.
pub const DEFAULT_PAGE_WRITE_DELAY: Duration = Duration::from_millis(4);

/// Default time DTR/RTS are held asserted.
pub const DEFAULT_RESET_PULSE: Duration = Duration::from_millis(250);

/// Default wait for the bootloader to start after the reset pulse.
pub const DEFAULT_RESET_SETTLE: Duration = Duration::from_millis(50);

/// Largest image LOAD_ADDRESS can reach: 64 Ki words of 2 bytes.
pub const MAX_ADDRESSABLE_LEN: usize = 0x20000;

/// Progress is reported at multiples of this percentage.
const PROGRESS_STEP: u8 = 20;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing sent yet.
    Idle,
    /// Pulsing DTR/RTS.
    Reset,
    /// Waiting for the bootloader to answer GET_SYNC.
    Syncing,
    /// Reading the device signature.
    Identifying,
    /// Sending SET_DEVICE.
    Configuring,
    /// Entering programming mode.
    ProgrammingModeEnter,
    /// Writing pages.
    Uploading,
    /// Reading pages back.
    Verifying,
    /// Leaving programming mode.
    ProgrammingModeExit,
    /// Upload finished.
    Done,
    /// A step failed; the session is over.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Reset => "reset",
            Self::Syncing => "syncing",
            Self::Identifying => "identifying",
            Self::Configuring => "configuring",
            Self::ProgrammingModeEnter => "entering programming mode",
            Self::Uploading => "uploading",
            Self::Verifying => "verifying",
            Self::ProgrammingModeExit => "leaving programming mode",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Attempts per sync round before giving up. Values below 1 count as 1.
    pub sync_attempts: usize,
    /// Number of sync rounds performed back to back. Values below 1 count as 1.
    pub sync_rounds: usize,
    /// Pause after each page write.
    pub page_write_delay: Duration,
    /// Time DTR/RTS are held asserted.
    pub reset_pulse: Duration,
    /// Wait after releasing DTR/RTS.
    pub reset_settle: Duration,
    /// Per-command timeout; `None` uses the board's.
    pub command_timeout: Option<Duration>,
    /// Read every page back after writing.
    pub verify: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            sync_attempts: DEFAULT_SYNC_ATTEMPTS,
            sync_rounds: DEFAULT_SYNC_ROUNDS,
            page_write_delay: DEFAULT_PAGE_WRITE_DELAY,
            reset_pulse: DEFAULT_RESET_PULSE,
            reset_settle: DEFAULT_RESET_SETTLE,
            command_timeout: None,
            verify: false,
        }
    }
}

impl SessionOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set attempts per sync round, at least 1.
    #[must_use]
    pub fn with_sync_attempts(mut self, attempts: usize) -> Self {
        self.sync_attempts = attempts.max(1);
        self
    }

    /// Set the number of sync rounds, at least 1.
    #[must_use]
    pub fn with_sync_rounds(mut self, rounds: usize) -> Self {
        self.sync_rounds = rounds.max(1);
        self
    }

    /// Set the pause after each page write.
    #[must_use]
    pub fn with_page_write_delay(mut self, delay: Duration) -> Self {
        self.page_write_delay = delay;
        self
    }

    /// Set the reset pulse and settle times.
    #[must_use]
    pub fn with_reset_timing(mut self, pulse: Duration, settle: Duration) -> Self {
        self.reset_pulse = pulse;
        self.reset_settle = settle;
        self
    }

    /// Override the board's per-command timeout.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Enable read-back verification.
    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UploadReport {
    /// Board the image was uploaded to.
    pub board: String,
    /// Image length in bytes.
    pub bytes_written: usize,
    /// Number of pages written.
    pub pages: usize,
    /// Signature read from the device.
    pub signature: [u8; 3],
    /// Whether the signature matched the board profile.
    pub signature_matches: bool,
    /// Whether pages were read back and compared.
    pub verified: bool,
}

/// Tracks which 20% milestones have been reported.
#[derive(Debug, Default)]
struct ProgressMilestones {
    last: Option<u8>,
}

impl ProgressMilestones {
    /// Percentage to report for `written` of `total` bytes, if it is a new
    /// milestone.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn advance(&mut self, written: usize, total: usize) -> Option<u8> {
        if total == 0 {
            return None;
        }
        let percent = ((written as f64 / total as f64) * 100.0).round() as u8;
        if percent % PROGRESS_STEP != 0 || self.last == Some(percent) {
            return None;
        }
        self.last = Some(percent);
        Some(percent)
    }
}

/// One upload over an exclusively owned port.
pub struct BootloaderSession<P: Port> {
    port: P,
    board: &'static BoardProfile,
    options: SessionOptions,
    state: SessionState,
    closed: bool,
}

impl<P: Port> BootloaderSession<P> {
    /// Create a session with default options.
    pub fn new(port: P, board: &'static BoardProfile) -> Self {
        Self::with_options(port, board, SessionOptions::default())
    }

    /// Create a session with explicit options.
    pub fn with_options(port: P, board: &'static BoardProfile, options: SessionOptions) -> Self {
        Self {
            port,
            board,
            options,
            state: SessionState::Idle,
            closed: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Board this session targets.
    pub fn board(&self) -> &'static BoardProfile {
        self.board
    }

    /// Run the whole upload sequence, then close the port.
    ///
    /// `progress` receives percentages at each 20% milestone.
    pub fn run<F>(&mut self, image: &FlashImage, mut progress: F) -> Result<UploadReport>
    where
        F: FnMut(u8),
    {
        let result = self.run_sequence(image, &mut progress);
        match &result {
            Ok(_) => self.transition(SessionState::Done),
            Err(e) => {
                debug!("Session failed in {} state: {e}", self.state);
                self.transition(SessionState::Failed);
            },
        }
        let closed = self.close();
        let report = result?;
        closed?;
        Ok(report)
    }

    /// Close the port if it is still open.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.port
            .close()
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session: {} -> {}", self.state, next);
        self.state = next;
    }

    fn timeout(&self) -> Duration {
        self.options
            .command_timeout
            .unwrap_or_else(|| {
                self.board
                    .command_timeout()
            })
    }

    fn channel(&mut self) -> CommandChannel<'_, P> {
        let timeout = self.timeout();
        CommandChannel::new(&mut self.port, timeout)
    }

    fn expect_ok(&mut self, frame: &CommandFrame) -> Result<()> {
        self.channel()
            .send(&frame.build(), Expectation::Exact(&OK_RESPONSE))?;
        Ok(())
    }

    fn run_sequence(
        &mut self,
        image: &FlashImage,
        progress: &mut dyn FnMut(u8),
    ) -> Result<UploadReport> {
        if image.len() > MAX_ADDRESSABLE_LEN {
            return Err(Error::ImageTooLarge {
                len: image.len(),
                limit: MAX_ADDRESSABLE_LEN,
            });
        }

        self.transition(SessionState::Reset);
        self.reset()?;

        self.transition(SessionState::Syncing);
        info!("Syncing with bootloader on {}...", self.port.name());
        let rounds = self.options.sync_rounds.max(1);
        for round in 1..=rounds {
            trace!("Sync round {round}/{rounds}");
            self.sync()?;
        }

        self.transition(SessionState::Identifying);
        let signature = self.read_signature()?;
        let signature_matches = signature == self.board.signature;
        if signature_matches {
            info!("Device signature: {}", hex_bytes(&signature));
        } else {
            warn!(
                "Device signature {} does not match {} ({}), continuing",
                hex_bytes(&signature),
                self.board.name,
                self.board.signature_hex()
            );
        }

        self.transition(SessionState::Configuring);
        self.expect_ok(&CommandFrame::set_device(self.board.page_size))?;

        self.transition(SessionState::ProgrammingModeEnter);
        self.expect_ok(&CommandFrame::enter_progmode())?;

        self.transition(SessionState::Uploading);
        let pages = self.upload_pages(image, progress)?;

        if self.options.verify {
            self.transition(SessionState::Verifying);
            self.verify_pages(image)?;
        }

        self.transition(SessionState::ProgrammingModeExit);
        self.expect_ok(&CommandFrame::leave_progmode())?;

        info!("Upload complete: {} bytes in {pages} pages", image.len());
        Ok(UploadReport {
            board: self.board.name.to_string(),
            bytes_written: image.len(),
            pages,
            signature,
            signature_matches,
            verified: self.options.verify,
        })
    }

    /// Pulse DTR/RTS to restart the board into its bootloader.
    fn reset(&mut self) -> Result<()> {
        info!("Resetting board...");
        self.port.set_dtr(true)?;
        self.port.set_rts(true)?;
        thread::sleep(self.options.reset_pulse);
        self.port.set_dtr(false)?;
        self.port.set_rts(false)?;
        thread::sleep(self.options.reset_settle);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        let attempts = self.options.sync_attempts.max(1);
        let frame = CommandFrame::get_sync().build();
        for attempt in 1..=attempts {
            match self
                .channel()
                .send(&frame, Expectation::Exact(&OK_RESPONSE))
            {
                Ok(_) => {
                    trace!("In sync after {attempt} attempt(s)");
                    return Ok(());
                },
                Err(e) => {
                    warn!("Sync attempt {attempt}/{attempts} failed: {e}");
                },
            }
        }
        Err(Error::SyncFailed { attempts })
    }

    fn read_signature(&mut self) -> Result<[u8; 3]> {
        let response = self.channel().send(
            &CommandFrame::read_signature().build(),
            Expectation::Length(SIGNATURE_RESPONSE_LEN),
        )?;
        Ok([response[1], response[2], response[3]])
    }

    /// Word address of a byte offset below [`MAX_ADDRESSABLE_LEN`].
    #[allow(clippy::cast_possible_truncation)]
    fn word_address(byte_address: usize) -> u16 {
        (byte_address / 2) as u16
    }

    fn upload_pages(&mut self, image: &FlashImage, progress: &mut dyn FnMut(u8)) -> Result<usize> {
        let page_size = usize::from(self.board.page_size);
        let total = image.len();
        let mut milestones = ProgressMilestones::default();
        let mut pages = 0;

        info!("Uploading {total} bytes...");
        for (index, page) in image
            .chunks(page_size)
            .enumerate()
        {
            let address = index * page_size;
            debug!("Writing page at 0x{address:05X} ({} bytes)", page.len());
            self.expect_ok(&CommandFrame::load_address(Self::word_address(address)))?;
            self.expect_ok(&CommandFrame::prog_page(page))?;
            thread::sleep(self.options.page_write_delay);
            pages += 1;

            if let Some(percent) = milestones.advance(address + page.len(), total) {
                info!("Upload progress: {percent}%");
                progress(percent);
            }
        }
        Ok(pages)
    }

    #[allow(clippy::cast_possible_truncation)] // pages are at most 256 bytes
    fn verify_pages(&mut self, image: &FlashImage) -> Result<()> {
        let page_size = usize::from(self.board.page_size);

        info!("Verifying {} bytes...", image.len());
        for (index, page) in image
            .chunks(page_size)
            .enumerate()
        {
            let address = index * page_size;
            self.expect_ok(&CommandFrame::load_address(Self::word_address(address)))?;
            let response = self.channel().send(
                &CommandFrame::read_page(page.len() as u16).build(),
                Expectation::Length(page.len() + 2),
            )?;

            let trailer = response[response.len() - 1];
            if trailer != STK_OK {
                return Err(Error::ResponseMismatch {
                    got: vec![trailer],
                    expected: vec![STK_OK],
                });
            }
            if &response[1..=page.len()] != page {
                return Err(Error::VerifyFailed { address });
            }
            trace!("Page at 0x{address:05X} verified");
        }
        Ok(())
    }
}

impl<P: Port> Drop for BootloaderSession<P> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Error closing port on drop: {e}");
        }
    }
}
