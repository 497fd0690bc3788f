//! Serial port discovery and classification.
//!
//! Ports are classified by the USB VID/PID of the bridge behind them. Boards
//! with an ATmega16U2 bridge report Arduino's own VID and a board-specific
//! PID, which is enough to suggest a board profile; clone boards with CH340,
//! FTDI or CP210x bridges only tell us that an AVR board is likely attached.

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Known USB bridge kinds found on Arduino-class boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceKind {
    /// Genuine Arduino board (ATmega16U2/8U2 USB bridge).
    Arduino,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// FTDI FT232 USB-to-Serial converter.
    Ftdi,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches any PID.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0x2341, &[], DeviceKind::Arduino),
    (0x2A03, &[], DeviceKind::Arduino),
    (0x1A86, &[0x7523, 0x7522, 0x5523], DeviceKind::Ch340),
    (0x0403, &[0x6001, 0x6015], DeviceKind::Ftdi),
    (0x10C4, &[0xEA60], DeviceKind::Cp210x),
];

/// Arduino PIDs that identify the board, for boards in the profile table.
const ARDUINO_BOARD_PIDS: &[(u16, &str)] = &[
    (0x0001, "uno"),
    (0x0043, "uno"),
    (0x0243, "uno"),
    (0x0010, "mega"),
    (0x0042, "mega"),
    (0x0242, "mega"),
];

impl DeviceKind {
    /// Classify a VID/PID combination.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_DEVICES
            .iter()
            .find(|(known_vid, pids, _)| {
                vid == *known_vid && (pids.is_empty() || pids.contains(&pid))
            })
            .map_or(Self::Unknown, |(_, _, device)| *device)
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Arduino => "Arduino",
            Self::Ch340 => "CH340/CH341",
            Self::Ftdi => "FTDI",
            Self::Cp210x => "CP210x",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Discovered serial port.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// A port with no USB metadata.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    /// Check if this port is likely an AVR board.
    pub fn is_likely_board(&self) -> bool {
        self.device.is_known()
    }

    /// Board profile name suggested by the USB identity, if any.
    pub fn suggested_board(&self) -> Option<&'static str> {
        if self.device != DeviceKind::Arduino {
            return None;
        }
        let pid = self.pid?;
        ARDUINO_BOARD_PIDS
            .iter()
            .find(|(known, _)| *known == pid)
            .map(|(_, board)| *board)
    }
}

/// Detect all available serial ports with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut detected = DetectedPort::plain(port_info.port_name.clone());

                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    detected.vid = Some(usb_info.vid);
                    detected.pid = Some(usb_info.pid);
                    detected.manufacturer = usb_info.manufacturer;
                    detected.product = usb_info.product;
                    detected.serial = usb_info.serial_number;
                    detected.device = DeviceKind::from_vid_pid(usb_info.vid, usb_info.pid);

                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                        port_info.port_name, usb_info.vid, usb_info.pid, detected.device
                    );
                }

                result.push(detected);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    result
}

/// Detect all available serial ports (no native support - always empty).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Pick the most likely board among `ports`.
///
/// Genuine Arduino bridges win over clone bridges, which win over any other
/// port.
pub fn select_port(ports: &[DetectedPort]) -> Option<&DetectedPort> {
    ports
        .iter()
        .find(|p| p.device == DeviceKind::Arduino)
        .or_else(|| {
            ports
                .iter()
                .find(|p| p.device.is_known())
        })
        .or_else(|| ports.first())
}

/// Auto-detect a single board port.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Option<DetectedPort> {
    let ports = detect_ports();
    let port = select_port(&ports)?;
    if port.device.is_known() {
        info!("Auto-detected {} on {}", port.device.name(), port.name);
    } else {
        info!("Using first available port: {}", port.name);
    }
    Some(port.clone())
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    let mut result = Vec::new();

    for port in ports {
        let device_info = if port.device.is_known() {
            format!(" [{}]", port.device.name())
        } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };

        let board_info = port
            .suggested_board()
            .map(|b| format!(" ({b})"))
            .unwrap_or_default();

        let product_info = port
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        result.push(format!(
            "{}{}{}{}",
            port.name, device_info, board_info, product_info
        ));
    }

    result
}
