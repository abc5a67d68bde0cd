//! # flipdeploy
//!
//! A library for talking to the Flipper Zero serial CLI.
//!
//! This crate provides:
//!
//! - Serial transport with exclusive port ownership and device discovery
//! - Response normalization (VT100 control sequences stripped before matching)
//! - Command/response sessions with drain-before-send and bounded deadlines
//! - Chunked file transfer over `storage write_chunk` with a single retry
//!   per chunk
//! - Remote filesystem operations: `mkdir`, `stat`, `list`
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use flipdeploy::DeviceClient;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let mut client = DeviceClient::connect(Some("/dev/ttyACM0"))?;
//!         client.mkdir("/ext/badusb")?;
//!
//!         let outcome = client.write_file_with_progress(
//!             b"STRING hello\n",
//!             "/ext/badusb/hello.txt",
//!             &mut |sent, total| println!("{sent}/{total}"),
//!         );
//!         outcome.into_result()?;
//!         client.disconnect()?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod client;
pub mod device;
pub mod error;
pub mod host;
pub mod port;
pub mod protocol;
pub mod storage;

#[cfg(test)]
pub(crate) mod sim;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). The connection in
/// use is closed and the operation fails with [`Error::Cancelled`].
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
thread_local! {
    static TEST_INTERRUPTED: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Per-thread interrupt flag, so parallel tests do not cancel each other.
#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    static INSTALLED: OnceLock<()> = OnceLock::new();

    INSTALLED.get_or_init(|| {
        set_interrupt_checker(|| TEST_INTERRUPTED.with(std::cell::Cell::get));
    });
    TEST_INTERRUPTED.with(|flag| flag.set(value));
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    client::{DeviceClient, DeviceInfo, UploadProgress, UploadReport},
    device::{DetectedPort, DeviceKind},
    error::{Error, Result},
    host::{candidate_ports, discover_flipper_ports, discover_ports},
    port::{DEFAULT_BAUD, Port, SerialConfig},
    protocol::{Command, CommandSession, Response, SessionConfig},
    storage::{Entry, EntryKind, PathStat, TransferConfig, TransferOutcome, TransferStatus},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }
}
