//! Device discovery and classification.
//!
//! A Flipper shows up as a USB CDC-ACM port:
//!
//! - macOS: `/dev/cu.usbmodemflip_<Name>1`
//! - Linux: `/dev/ttyACM<N>`, with a `/dev/serial/by-id/usb-Flipper_Devices_Inc._Flipper_<Name>_...` link
//! - any platform: USB VID:PID `0483:5740`

#[cfg(feature = "native")]
use log::{debug, trace};

/// USB vendor ID of the device CDC interface.
pub const FLIPPER_VID: u16 = 0x0483;

/// USB product ID of the device CDC interface.
pub const FLIPPER_PID: u16 = 0x5740;

/// How a discovered port was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceKind {
    /// Matches the device's USB IDs or naming convention.
    Flipper,
    /// Anything else.
    Unknown,
}

impl DeviceKind {
    /// Classify a port by name and optional USB IDs.
    #[must_use]
    pub fn classify(name: &str, vid: Option<u16>, pid: Option<u16>) -> Self {
        if vid == Some(FLIPPER_VID) && pid == Some(FLIPPER_PID) {
            return Self::Flipper;
        }
        if name.contains("usbmodemflip_") && !name.starts_with("/dev/tty.") {
            return Self::Flipper;
        }
        if name.contains("/by-id/") && name.contains("Flipper") {
            return Self::Flipper;
        }
        Self::Unknown
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Flipper => "Flipper",
            Self::Unknown => "Unknown",
        }
    }
}

/// Discovered serial port.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Port path (e.g., "/dev/ttyACM0" or "COM3").
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
    fn plain(name: String) -> Self {
        let device = DeviceKind::classify(&name, None, None);
        Self {
            name,
            device,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    /// Whether this port is classified as a Flipper.
    pub fn is_flipper(&self) -> bool {
        self.device == DeviceKind::Flipper
    }

    /// Generic CDC-ACM port that may still be a Flipper.
    pub fn is_acm(&self) -> bool {
        self.name
            .starts_with("/dev/ttyACM")
    }
}

/// Enumerate all serial ports with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut detected = DetectedPort::plain(port_info.port_name);

                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    detected.vid = Some(usb_info.vid);
                    detected.pid = Some(usb_info.pid);
                    detected.manufacturer = usb_info.manufacturer;
                    detected.product = usb_info.product;
                    detected.serial = usb_info.serial_number;
                    detected.device =
                        DeviceKind::classify(&detected.name, detected.vid, detected.pid);

                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                        detected.name, usb_info.vid, usb_info.pid, detected.device
                    );
                }

                result.push(detected);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    result.extend(by_id_links());
    result
}

/// Enumerate all serial ports (no native backend: always empty).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// `/dev/serial/by-id` links; only present on Linux.
#[cfg(feature = "native")]
fn by_id_links() -> Vec<DetectedPort> {
    let Ok(entries) = std::fs::read_dir("/dev/serial/by-id") else {
        return Vec::new();
    };
    entries
        .filter_map(std::result::Result::ok)
        .map(|entry| {
            entry
                .path()
                .to_string_lossy()
                .into_owned()
        })
        .map(DetectedPort::plain)
        .collect()
}

/// Ports classified as a Flipper.
pub fn detect_flipper_ports() -> Vec<DetectedPort> {
    detect_ports()
        .into_iter()
        .filter(DetectedPort::is_flipper)
        .collect()
}

/// Ports to try, in order, when no port was given.
///
/// Classified Flipper ports come first, then any remaining `/dev/ttyACM*`
/// ports (a Flipper whose USB metadata could not be read).
pub fn candidate_ports() -> Vec<String> {
    order_candidates(detect_ports())
}

fn order_candidates(ports: Vec<DetectedPort>) -> Vec<String> {
    let (mut flipper, other): (Vec<_>, Vec<_>) = ports
        .into_iter()
        .partition(DetectedPort::is_flipper);
    flipper.sort_by(|a, b| a.name.cmp(&b.name));

    let mut candidates: Vec<String> = flipper
        .into_iter()
        .map(|p| p.name)
        .collect();
    let mut acm: Vec<String> = other
        .into_iter()
        .filter(DetectedPort::is_acm)
        .map(|p| p.name)
        .collect();
    acm.sort();

    for name in acm {
        if !candidates.contains(&name) {
            candidates.push(name);
        }
    }
    candidates
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let ids = match (port.vid, port.pid) {
                (Some(vid), Some(pid)) => format!(" [{vid:04X}:{pid:04X}]"),
                _ => String::new(),
            };
            let kind = if port.is_flipper() { " (Flipper)" } else { "" };
            let product = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();
            format!("{}{ids}{kind}{product}", port.name)
        })
        .collect()
}
