//! Host-side utilities for serial port discovery.

use crate::device::DetectedPort;

/// Discover all available serial ports.
#[must_use]
pub fn discover_ports() -> Vec<DetectedPort> {
    crate::device::detect_ports()
}

/// Discover serial ports classified as a Flipper.
#[must_use]
pub fn discover_flipper_ports() -> Vec<DetectedPort> {
    crate::device::detect_flipper_ports()
}

/// Ports auto-connect will try, in order.
#[must_use]
pub fn candidate_ports() -> Vec<String> {
    crate::device::candidate_ports()
}
