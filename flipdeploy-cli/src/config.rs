//! Configuration file support for flipdeploy.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (FLIPDEPLOY_*)
//! 3. Local config file (./flipdeploy.toml)
//! 4. Global config file (~/.config/flipdeploy/config.toml)
//!
//! ```toml
//! [connection]
//! port = "/dev/cu.usbmodemflip_Mazincea1"
//! baud = 230400
//!
//! [transfer]
//! chunk_delay_ms = 50
//! command_timeout_ms = 10000
//! ```

use directories::ProjectDirs;
use flipdeploy::{Error, SessionConfig, TransferConfig};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-project config file.
pub const LOCAL_CONFIG_FILE: &str = "flipdeploy.toml";

/// Upper bound accepted for any configured duration.
const MAX_DURATION_MS: u64 = 10 * 60 * 1000;

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub port: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
}

/// Transfer tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferSection {
    /// Pause between chunk commands, in milliseconds.
    pub chunk_delay_ms: Option<u64>,
    /// Deadline for every command step, in milliseconds.
    pub command_timeout_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Transfer settings.
    #[serde(default)]
    pub transfer: TransferSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "flipdeploy").map(|dirs| {
            dirs.config_dir()
                .to_path_buf()
        })
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other
            .connection
            .port
            .is_some()
        {
            self.connection
                .port = other
                .connection
                .port;
        }
        if other
            .connection
            .baud
            .is_some()
        {
            self.connection
                .baud = other
                .connection
                .baud;
        }
        if other
            .transfer
            .chunk_delay_ms
            .is_some()
        {
            self.transfer
                .chunk_delay_ms = other
                .transfer
                .chunk_delay_ms;
        }
        if other
            .transfer
            .command_timeout_ms
            .is_some()
        {
            self.transfer
                .command_timeout_ms = other
                .transfer
                .command_timeout_ms;
        }
    }

    /// Session and transfer settings, with configured values applied.
    pub fn protocol_settings(&self) -> Result<(SessionConfig, TransferConfig), Error> {
        let mut session = SessionConfig::default();
        let mut transfer = TransferConfig::default();

        if let Some(ms) = self
            .transfer
            .command_timeout_ms
        {
            if ms == 0 || ms > MAX_DURATION_MS {
                return Err(Error::Config(format!(
                    "transfer.command_timeout_ms must be between 1 and {MAX_DURATION_MS}, got {ms}"
                )));
            }
            let timeout = Duration::from_millis(ms);
            session = session
                .with_command_timeout(timeout)
                .with_chunk_timeouts(timeout);
        }

        if let Some(ms) = self
            .transfer
            .chunk_delay_ms
        {
            if ms > MAX_DURATION_MS {
                return Err(Error::Config(format!(
                    "transfer.chunk_delay_ms must be at most {MAX_DURATION_MS}, got {ms}"
                )));
            }
            transfer = transfer.with_chunk_delay(Duration::from_millis(ms));
        }

        Ok((session, transfer))
    }
}
