//! Serial port resolution and device connection.
//!
//! The port is taken from, in order: `--port` / `FLIPDEPLOY_PORT`, the config
//! file, auto-discovery. In non-interactive mode auto-discovery must find
//! exactly one Flipper so scripted runs never pick a device by accident.

use {
    crate::{CliError, config::Config},
    anyhow::{Context, Result},
    flipdeploy::{
        DEFAULT_BAUD, DeviceClient, Error as DeviceError, NativePort, SerialConfig,
        discover_flipper_ports,
    },
    log::{debug, info},
};

/// Options for port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI or environment.
    pub port: Option<String>,
    /// Explicit baud rate specified via CLI or environment.
    pub baud: Option<u32>,
    /// Non-interactive mode (fail instead of guessing).
    pub non_interactive: bool,
}

fn usage_err(message: impl Into<String>) -> anyhow::Error {
    // Port selection failures are setup problems, exit code 2
    CliError::Usage(message.into()).into()
}

/// Port to open, or `None` to let the library try every candidate.
pub fn resolve_port(options: &SerialOptions, config: &Config) -> Result<Option<String>> {
    if let Some(port) = &options.port {
        debug!("Using port from command line: {port}");
        return Ok(Some(port.clone()));
    }

    if let Some(port) = &config
        .connection
        .port
    {
        debug!("Using port from config: {port}");
        return Ok(Some(port.clone()));
    }

    if !options.non_interactive {
        return Ok(None);
    }

    let ports = discover_flipper_ports();
    match ports.as_slice() {
        [only] => {
            info!("Auto-selected port: {}", only.name);
            Ok(Some(
                only.name
                    .clone(),
            ))
        },
        [] => Err(usage_err(
            "No Flipper found. Connect the device or pass --port.",
        )),
        many => {
            let names: Vec<&str> = many
                .iter()
                .map(|p| p.name.as_str())
                .collect();
            Err(usage_err(format!(
                "Found multiple Flipper ports ({}); pass --port to choose one.",
                names.join(", ")
            )))
        },
    }
}

/// Effective baud rate.
pub fn resolve_baud(options: &SerialOptions, config: &Config) -> u32 {
    options
        .baud
        .or(config
            .connection
            .baud)
        .unwrap_or(DEFAULT_BAUD)
}

/// Connect to the device using CLI options and configuration.
pub fn connect(options: &SerialOptions, config: &Config) -> Result<DeviceClient<NativePort>> {
    let port = resolve_port(options, config)?;
    let baud = resolve_baud(options, config);
    let (session, transfer) = config
        .protocol_settings()
        .context("Invalid configuration")?;

    let serial = SerialConfig::new(port.unwrap_or_default(), baud);
    match DeviceClient::connect_with(serial, session, transfer) {
        Ok(client) => Ok(client),
        Err(DeviceError::NoDeviceFound) => Err(usage_err(
            DeviceError::NoDeviceFound
                .remediation_hint()
                .map_or_else(
                    || DeviceError::NoDeviceFound.to_string(),
                    |hint| format!("{}. {hint}", DeviceError::NoDeviceFound),
                ),
        )),
        Err(e) => Err(anyhow::Error::new(e).context("Failed to connect to the device")),
    }
}
