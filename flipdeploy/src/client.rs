//! High-level device client.
//!
//! [`DeviceClient`] owns one connection and exposes the operations an
//! application needs: write files, create directories, query paths and read
//! device information.
//!
//! ```rust,no_run
//! use flipdeploy::DeviceClient;
//!
//! fn main() -> flipdeploy::Result<()> {
//!     let mut client = DeviceClient::connect(None)?;
//!     println!("{}", client.device_info()?.firmware_identifier());
//!     client.mkdir("/ext/infrared")?;
//!     let outcome = client.write_file(b"Filetype: IR signals file\n", "/ext/infrared/TV.ir");
//!     println!("{} bytes in {} chunks", outcome.bytes_sent, outcome.chunks);
//!     client.disconnect()
//! }
//! ```

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::port::Port;
#[cfg(feature = "native")]
use crate::port::{NativePort, SerialConfig};
use crate::protocol::{Command, CommandSession, SessionConfig};
use crate::storage::{self, Entry, PathStat, TransferConfig, TransferOutcome};

/// Parsed `device_info` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceInfo {
    /// `key : value` pairs in device order.
    pub fields: Vec<(String, String)>,
}

impl DeviceInfo {
    /// Parse `key : value` lines; other lines are ignored.
    pub fn parse(body: &str) -> Self {
        let fields = body
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .filter(|(key, _)| !key.is_empty())
            .collect();
        Self { fields }
    }

    /// Value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Device name, e.g. `Mazincea`.
    pub fn hardware_name(&self) -> Option<&str> {
        self.get("hardware_name")
    }

    /// Firmware fork, version and commit, e.g. `Momentum 0.103.1 (1a2b3c4d)`,
    /// or `unknown`.
    pub fn firmware_identifier(&self) -> String {
        let origin = self
            .get("firmware_origin_fork")
            .or_else(|| self.get("firmware_origin"));
        let parts: Vec<&str> = [origin, self.get("firmware_version")]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();

        if parts.is_empty() {
            return "unknown".to_string();
        }
        let mut id = parts.join(" ");
        if let Some(commit) = self
            .get("firmware_commit")
            .filter(|c| !c.is_empty())
        {
            id.push_str(&format!(" ({commit})"));
        }
        id
    }
}

/// Aggregate result of [`DeviceClient::upload_all`].
#[derive(Debug, Default)]
pub struct UploadReport {
    /// Files written completely.
    pub succeeded: usize,
    /// Files that failed.
    pub failed: usize,
    /// Bytes acknowledged across all files.
    pub total_bytes: usize,
    /// Per-file outcomes in upload order.
    pub outcomes: Vec<TransferOutcome>,
}

impl UploadReport {
    /// Whether every file was written.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, outcome: TransferOutcome) {
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.total_bytes += outcome.bytes_sent;
        self.outcomes
            .push(outcome);
    }
}

/// Progress events emitted by [`DeviceClient::upload_all`].
#[derive(Debug, Clone, Copy)]
pub enum UploadProgress<'a> {
    /// A file is about to be written.
    FileStarted {
        /// 0-based file index.
        index: usize,
        /// Number of files in the batch.
        count: usize,
        /// Remote destination.
        path: &'a str,
        /// Payload size.
        size: usize,
    },
    /// A chunk of the current file was acknowledged.
    Bytes {
        /// Bytes of the current file acknowledged so far.
        sent: usize,
        /// Size of the current file.
        total: usize,
    },
    /// The current file finished.
    FileFinished {
        /// Outcome of the file.
        outcome: &'a TransferOutcome,
    },
}

/// Client for one device connection.
///
/// Not `Clone`: the connection is exclusively owned and every operation takes
/// `&mut self`, so at most one exchange is in flight.
pub struct DeviceClient<P: Port> {
    session: CommandSession<P>,
    transfer: TransferConfig,
}

#[cfg(feature = "native")]
impl DeviceClient<NativePort> {
    /// Connect to `port`, or auto-discover when `None`.
    pub fn connect(port: Option<&str>) -> Result<Self> {
        let serial = SerialConfig {
            port_name: port
                .unwrap_or_default()
                .to_string(),
            ..SerialConfig::default()
        };
        Self::connect_with(serial, SessionConfig::default(), TransferConfig::default())
    }

    /// Connect with explicit configuration. An empty `serial.port_name`
    /// triggers auto-discovery.
    pub fn connect_with(
        serial: SerialConfig,
        session: SessionConfig,
        transfer: TransferConfig,
    ) -> Result<Self> {
        if !serial
            .port_name
            .is_empty()
        {
            let port = NativePort::open(&serial)?;
            return Self::handshake(port, session, transfer);
        }

        let candidates = crate::device::candidate_ports();
        debug!("Auto-discovery candidates: {candidates:?}");

        for name in candidates {
            let config = SerialConfig {
                port_name: name.clone(),
                ..serial.clone()
            };
            match NativePort::open(&config) {
                Ok(port) => {
                    info!("Auto-selected {name}");
                    return Self::handshake(port, session, transfer);
                },
                Err(e) => warn!("Skipping {name}: {e}"),
            }
        }

        Err(Error::NoDeviceFound)
    }
}

impl<P: Port> DeviceClient<P> {
    /// Wrap an already opened port without waiting for the banner.
    pub fn from_port(port: P, session: SessionConfig, transfer: TransferConfig) -> Self {
        Self {
            session: CommandSession::new(port, session),
            transfer,
        }
    }

    /// Wrap an opened port and wait for the CLI prompt.
    pub fn handshake(port: P, session: SessionConfig, transfer: TransferConfig) -> Result<Self> {
        let mut client = Self::from_port(port, session, transfer);
        client
            .session
            .await_prompt()?;
        info!(
            "Connected to {}",
            client
                .session
                .port()
                .name()
        );
        Ok(client)
    }

    /// Name of the connected port.
    pub fn port_name(&self) -> &str {
        self.session
            .port()
            .name()
    }

    /// Whether the connection is open.
    pub fn is_connected(&self) -> bool {
        self.session
            .is_open()
    }

    /// Command session, for raw exchanges.
    pub fn session_mut(&mut self) -> &mut CommandSession<P> {
        &mut self.session
    }

    /// Read and parse `device_info`.
    pub fn device_info(&mut self) -> Result<DeviceInfo> {
        let response = self
            .session
            .execute(&Command::device_info())?;
        let info = DeviceInfo::parse(&response.body());
        if info
            .fields
            .is_empty()
        {
            return Err(Error::ProtocolViolation(format!(
                "device_info returned no fields: {:?}",
                response.text()
            )));
        }
        Ok(info)
    }

    /// Create a directory; succeeds if it already exists.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        storage::mkdir(&mut self.session, path)
    }

    /// Create a directory and its missing ancestors.
    pub fn mkdir_all(&mut self, path: &str) -> Result<()> {
        storage::mkdir_all(&mut self.session, path)
    }

    /// Query a path.
    pub fn stat(&mut self, path: &str) -> Result<PathStat> {
        storage::stat(&mut self.session, path)
    }

    /// List a directory.
    pub fn list(&mut self, path: &str) -> Result<Vec<Entry>> {
        storage::list(&mut self.session, path)
    }

    /// List every file below a directory.
    pub fn walk(&mut self, path: &str) -> Result<Vec<Entry>> {
        storage::walk(&mut self.session, path)
    }

    /// Write `data` to `remote`.
    pub fn write_file(&mut self, data: &[u8], remote: &str) -> TransferOutcome {
        self.write_file_with_progress(data, remote, &mut |_, _| {})
    }

    /// Write `data` to `remote`, reporting `(bytes_sent, total)` per chunk.
    pub fn write_file_with_progress(
        &mut self,
        data: &[u8],
        remote: &str,
        progress: &mut dyn FnMut(usize, usize),
    ) -> TransferOutcome {
        storage::write_file(&mut self.session, &self.transfer, remote, data, progress)
    }

    /// Create every directory the batch needs, then write each file.
    ///
    /// A failed file does not stop the batch, and neither does a directory
    /// that cannot be created: the files below it are counted as failed
    /// without being attempted. Cancellation and a closed connection do stop
    /// it; the remaining files are counted as failed.
    pub fn upload_all(
        &mut self,
        items: &[(String, Vec<u8>)],
        progress: &mut dyn FnMut(UploadProgress<'_>),
    ) -> Result<UploadReport> {
        let dirs = storage::required_dirs(
            items
                .iter()
                .map(|(remote, _)| remote.as_str()),
        );
        let mut failed_dirs: Vec<(String, String)> = Vec::new();
        for dir in &dirs {
            if failed_dirs
                .iter()
                .any(|(failed, _)| is_under(dir, failed))
            {
                continue;
            }
            match storage::mkdir(&mut self.session, dir) {
                Ok(()) => {},
                Err(e @ (Error::Cancelled | Error::ConnectionClosed)) => return Err(e),
                Err(e) => {
                    warn!("Cannot create {dir}: {e}");
                    failed_dirs.push((dir.clone(), e.to_string()));
                },
            }
        }

        let mut report = UploadReport::default();
        let count = items.len();
        for (index, (remote, data)) in items
            .iter()
            .enumerate()
        {
            if !self.is_connected() || crate::is_interrupted_requested() {
                report.record(TransferOutcome::failed(remote, Error::Cancelled));
                continue;
            }
            if let Some((dir, reason)) = failed_dirs
                .iter()
                .find(|(dir, _)| is_under(remote, dir))
            {
                let error = Error::TransferFailed {
                    path: remote.clone(),
                    offset: 0,
                    source: Box::new(Error::NotFound(format!("{dir} (mkdir failed: {reason})"))),
                };
                warn!("Skipping {remote}: {error}");
                let outcome = TransferOutcome::failed(remote, error);
                progress(UploadProgress::FileFinished { outcome: &outcome });
                report.record(outcome);
                continue;
            }

            progress(UploadProgress::FileStarted {
                index,
                count,
                path: remote,
                size: data.len(),
            });
            let outcome = self.write_file_with_progress(data, remote, &mut |sent, total| {
                progress(UploadProgress::Bytes { sent, total });
            });
            if let Some(e) = outcome.error() {
                warn!("Upload of {remote} failed: {e}");
            }
            progress(UploadProgress::FileFinished { outcome: &outcome });
            report.record(outcome);
        }

        info!(
            "Upload finished: {} succeeded, {} failed, {} bytes",
            report.succeeded, report.failed, report.total_bytes
        );
        Ok(report)
    }

    /// Close the connection. Further operations fail with
    /// [`Error::ConnectionClosed`].
    pub fn disconnect(&mut self) -> Result<()> {
        self.session
            .close()
    }
}

/// Whether `path` lies below the directory `dir`.
fn is_under(path: &str, dir: &str) -> bool {
    path.strip_prefix(dir)
        .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDevice, fast_session_config};
    use std::time::Duration;

    fn client(device: SimDevice) -> DeviceClient<SimDevice> {
        DeviceClient::handshake(
            device,
            fast_session_config(),
            TransferConfig::default().with_chunk_delay(Duration::ZERO),
        )
        .unwrap()
    }

    #[test]
    fn test_device_info() {
        let mut client = client(SimDevice::new().with_escaped_echo());
        let info = client
            .device_info()
            .unwrap();
        assert_eq!(info.hardware_name(), Some("Mazincea"));
        assert_eq!(info.get("firmware_branch"), Some("release"));
        assert_eq!(info.firmware_identifier(), "Momentum 0.103.1 (1a2b3c4d)");
    }

    #[test]
    fn test_firmware_identifier_fallbacks() {
        let info = DeviceInfo::parse("firmware_origin : Unleashed\nfirmware_version : 0.80\n");
        assert_eq!(info.firmware_identifier(), "Unleashed 0.80");
        assert_eq!(DeviceInfo::default().firmware_identifier(), "unknown");
    }

    #[test]
    fn test_device_info_parse_keeps_order_and_colons_in_values() {
        let info = DeviceInfo::parse("b : 2\na : 1\nradio_stack : 1.17:3\nnoise\n");
        assert_eq!(
            info.fields,
            vec![
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "1".to_string()),
                ("radio_stack".to_string(), "1.17:3".to_string()),
            ]
        );
    }

    #[test]
    fn test_write_and_verify() {
        let mut client = client(SimDevice::new());
        client
            .mkdir("/ext/badusb")
            .unwrap();
        let outcome = client.write_file(b"STRING hello\n", "/ext/badusb/hello.txt");
        assert!(outcome.is_success());
        assert_eq!(
            client
                .stat("/ext/badusb/hello.txt")
                .unwrap(),
            PathStat::Exists {
                kind: storage::EntryKind::File,
                size: Some(13)
            }
        );
    }

    #[test]
    fn test_upload_all_continues_past_failures() {
        // Chunk commands: 0 ok (a.ir), 1+2 rejected (b.ir), 3 ok (c.nfc)
        let mut client = client(SimDevice::new().bad_ack_on_chunk(1).bad_ack_on_chunk(2));
        let items = vec![
            ("/ext/infrared/a.ir".to_string(), b"aaaa".to_vec()),
            ("/ext/infrared/b.ir".to_string(), b"bbbb".to_vec()),
            ("/ext/nfc/amiibo/c.nfc".to_string(), b"cc".to_vec()),
        ];
        let mut started = Vec::new();
        let report = client
            .upload_all(&items, &mut |event| {
                if let UploadProgress::FileStarted { path, .. } = event {
                    started.push(path.to_string());
                }
            })
            .unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.total_bytes, 6);
        assert!(!report.all_succeeded());
        assert!(!report.outcomes[1].is_success());
        assert_eq!(started.len(), 3);

        let device = client
            .session_mut()
            .port();
        assert!(device.has_dir("/ext/nfc/amiibo"));
        assert_eq!(device.file("/ext/nfc/amiibo/c.nfc"), Some(&b"cc"[..]));
    }

    #[test]
    fn test_upload_all_skips_files_below_an_uncreatable_dir() {
        // A plain file where a parent directory should be
        let device = SimDevice::new().with_file("/ext/nfc", b"");
        let mut client = client(device);
        let items = vec![
            ("/ext/infrared/a.ir".to_string(), b"aaaa".to_vec()),
            ("/ext/nfc/amiibo/c.nfc".to_string(), b"cc".to_vec()),
            ("/ext/nfc/amiibo/deep/d.nfc".to_string(), b"dd".to_vec()),
        ];
        let mut finished = Vec::new();
        let report = client
            .upload_all(&items, &mut |event| {
                if let UploadProgress::FileFinished { outcome } = event {
                    finished.push(outcome.path.clone());
                }
            })
            .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.total_bytes, 4);
        assert_eq!(finished.len(), 3);
        for outcome in &report.outcomes[1..] {
            match outcome.error() {
                Some(Error::TransferFailed { path, offset, source }) => {
                    assert_eq!(path, &outcome.path);
                    assert_eq!(*offset, 0);
                    match &**source {
                        Error::NotFound(message) => assert!(message.starts_with("/ext/nfc/amiibo ")),
                        other => panic!("unexpected source: {other:?}"),
                    }
                },
                other => panic!("unexpected: {other:?}"),
            }
        }

        let device = client
            .session_mut()
            .port();
        assert_eq!(device.file("/ext/infrared/a.ir"), Some(&b"aaaa"[..]));
        assert_eq!(device.chunk_commands(), 1);
        let written = String::from_utf8_lossy(device.written());
        assert!(!written.contains("mkdir /ext/nfc/amiibo/deep"));
    }

    #[test]
    fn test_upload_all_continues_past_an_invalid_dir() {
        let mut client = client(SimDevice::new());
        let items = vec![
            ("/ext/infrared/a.ir".to_string(), b"aaaa".to_vec()),
            ("/ext/we\"ird/b.ir".to_string(), b"bbbb".to_vec()),
        ];
        let report = client
            .upload_all(&items, &mut |_| {})
            .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert!(report.outcomes[0].is_success());
        assert!(matches!(
            report.outcomes[1].error(),
            Some(Error::TransferFailed { .. })
        ));
        assert_eq!(
            client
                .session_mut()
                .port()
                .file("/ext/infrared/a.ir"),
            Some(&b"aaaa"[..])
        );
    }

    #[test]
    fn test_is_under() {
        assert!(is_under("/ext/nfc/a.nfc", "/ext/nfc"));
        assert!(is_under("/ext/nfc/amiibo", "/ext/nfc"));
        assert!(!is_under("/ext/nfc2/a.nfc", "/ext/nfc"));
        assert!(!is_under("/ext/nfc", "/ext/nfc"));
    }

    #[test]
    fn test_operations_after_disconnect_fail() {
        let mut client = client(SimDevice::new());
        client
            .disconnect()
            .unwrap();
        client
            .disconnect()
            .unwrap();
        assert!(!client.is_connected());
        assert!(matches!(client.device_info(), Err(Error::ConnectionClosed)));
        assert!(matches!(client.mkdir("/ext/x"), Err(Error::ConnectionClosed)));
        assert!(!client.write_file(b"x", "/ext/x").is_success());
    }

    #[test]
    fn test_handshake_times_out_on_silent_port() {
        let result = DeviceClient::handshake(
            SimDevice::new()
                .without_banner()
                .mute(),
            fast_session_config(),
            TransferConfig::default(),
        );
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
