//! STK500v1 command encoding.
//!
//! Every command is an opcode followed by its parameters and terminated by
//! `CRC_EOP` (0x20, an ASCII space, not a checksum). Replies start with
//! `STK_INSYNC` and end with `STK_OK`:
//!
//! ```text
//! host:   +--------+------------------+---------+
//!         | opcode |    parameters    | CRC_EOP |
//!         +--------+------------------+---------+
//!
//! device: +-----------+-----------------+--------+
//!         | STK_INSYNC|  payload (opt.) | STK_OK |
//!         +-----------+-----------------+--------+
//! ```

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

/// End-of-command marker appended to every request.
pub const CRC_EOP: u8 = 0x20;
/// First byte of every reply from a synchronized bootloader.
pub const STK_INSYNC: u8 = 0x14;
/// Last byte of every successful reply.
pub const STK_OK: u8 = 0x10;
/// Sent by the bootloader when it lost track of framing.
pub const STK_NOSYNC: u8 = 0x15;

/// Reply to every command that carries no payload.
pub const OK_RESPONSE: [u8; 2] = [STK_INSYNC, STK_OK];

/// Memory type byte in PROG_PAGE / READ_PAGE, `'F'` for flash.
pub const MEMTYPE_FLASH: u8 = 0x46;

/// Length of the READ_SIGN reply: INSYNC, three signature bytes, OK.
pub const SIGNATURE_RESPONSE_LEN: usize = 5;

/// STK500v1 opcodes used for flashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Check for a listening bootloader.
    GetSync = 0x30,
    /// Program the device parameter block.
    SetDevice = 0x42,
    /// Enter programming mode.
    EnterProgmode = 0x50,
    /// Leave programming mode and start the application.
    LeaveProgmode = 0x51,
    /// Set the word address for the next page operation.
    LoadAddress = 0x55,
    /// Write one page of flash.
    ProgPage = 0x64,
    /// Read one page of flash.
    ReadPage = 0x74,
    /// Read the three-byte device signature.
    ReadSign = 0x75,
}

/// Command frame builder.
#[derive(Debug, Clone)]
pub struct CommandFrame {
    cmd: Command,
    data: Vec<u8>,
}

impl CommandFrame {
    /// Create a frame with no parameters.
    pub fn new(cmd: Command) -> Self {
        Self {
            cmd,
            data: Vec::new(),
        }
    }

    /// GET_SYNC handshake.
    pub fn get_sync() -> Self {
        Self::new(Command::GetSync)
    }

    /// READ_SIGN request.
    pub fn read_signature() -> Self {
        Self::new(Command::ReadSign)
    }

    /// SET_DEVICE parameter block for an ATmega-class part.
    ///
    /// Only the page size varies between supported boards; the remaining
    /// fields describe a device with 4 KiB of EEPROM and 32 KiB of flash,
    /// which optiboot ignores.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn set_device(page_size: u16) -> Self {
        let mut frame = Self::new(Command::SetDevice);
        frame
            .data
            .extend_from_slice(&[
                0x86, // device code
                0x00, // revision
                0x00, // progtype: parallel and serial
                0x01, // parmode: full parallel
                0x01, // polling
                0x01, // selftimed
                0x01, // lock bytes
                0x03, // fuse bytes
                0xFF, 0xFF, // flash poll values
                0xFF, 0xFF, // eeprom poll values
            ]);
        frame
            .data
            .write_u16::<BigEndian>(page_size)
            .unwrap();
        frame
            .data
            .extend_from_slice(&[
                0x00, 0x04, // eeprom size
                0x00, 0x00, 0x80, 0x00, // flash size
            ]);
        frame
    }

    /// ENTER_PROGMODE.
    pub fn enter_progmode() -> Self {
        Self::new(Command::EnterProgmode)
    }

    /// LEAVE_PROGMODE.
    pub fn leave_progmode() -> Self {
        Self::new(Command::LeaveProgmode)
    }

    /// LOAD_ADDRESS with a 16-bit word address, low byte first.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn load_address(word_address: u16) -> Self {
        let mut frame = Self::new(Command::LoadAddress);
        frame
            .data
            .write_u16::<LittleEndian>(word_address)
            .unwrap();
        frame
    }

    /// PROG_PAGE carrying `bytes` for flash memory.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    #[allow(clippy::cast_possible_truncation)] // pages are at most 256 bytes
    pub fn prog_page(bytes: &[u8]) -> Self {
        let mut frame = Self::new(Command::ProgPage);
        frame
            .data
            .write_u16::<BigEndian>(bytes.len() as u16)
            .unwrap();
        frame
            .data
            .push(MEMTYPE_FLASH);
        frame
            .data
            .extend_from_slice(bytes);
        frame
    }

    /// READ_PAGE of `len` flash bytes at the last loaded address.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn read_page(len: u16) -> Self {
        let mut frame = Self::new(Command::ReadPage);
        frame
            .data
            .write_u16::<BigEndian>(len)
            .unwrap();
        frame
            .data
            .push(MEMTYPE_FLASH);
        frame
    }

    /// Opcode plus parameters, without the trailer.
    pub fn body(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.data.len() + 1);
        buf.push(self.cmd as u8);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Build the complete frame, including `CRC_EOP`.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = self.body();
        buf.push(CRC_EOP);
        buf
    }

    /// Get the command type.
    pub fn command(&self) -> Command {
        self.cmd
    }
}
