//! Command/response exchanges over an exclusively owned port.
//!
//! A [`CommandSession`] owns its [`Port`]. Every operation takes `&mut self`,
//! so at most one command is ever outstanding on a connection.
//!
//! ## Exchange
//!
//! ```text
//! drain (discard stale bytes until prompt or quiet)
//!   -> write command + terminator
//!   -> read / normalize / look for marker, until deadline
//! ```
//!
//! Stale bytes are drained rather than flushed with a leading line
//! terminator: the CLI treats a bare terminator as an empty command, which only
//! adds more output to the buffer.

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::ansi;
use crate::protocol::command::{Command, Marker, Response};
use log::{debug, trace, warn};
use std::time::{Duration, Instant};

/// Timing parameters of a command session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound for a single read call.
    pub read_poll: Duration,
    /// Overall deadline for an ordinary command.
    pub command_timeout: Duration,
    /// Deadline for the `Ready` line after a chunk command.
    pub ready_timeout: Duration,
    /// Deadline for the acknowledgement after chunk payload.
    pub ack_timeout: Duration,
    /// Silence that ends a drain when no prompt shows up.
    pub drain_quiescence: Duration,
    /// Hard limit on the time spent draining.
    pub drain_limit: Duration,
    /// Time allowed for the startup banner to end in a prompt.
    pub banner_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_poll: Duration::from_millis(50),
            command_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
            drain_quiescence: Duration::from_millis(30),
            drain_limit: Duration::from_secs(2),
            banner_timeout: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    /// Set the ordinary command deadline.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set both chunk step deadlines (`Ready` and acknowledgement).
    #[must_use]
    pub fn with_chunk_timeouts(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self.ack_timeout = timeout;
        self
    }

    /// Set the startup banner deadline.
    #[must_use]
    pub fn with_banner_timeout(mut self, timeout: Duration) -> Self {
        self.banner_timeout = timeout;
        self
    }
}

/// Serialized command/response channel to the device CLI.
pub struct CommandSession<P: Port> {
    port: P,
    config: SessionConfig,
}

impl<P: Port> CommandSession<P> {
    /// Wrap an opened port.
    pub fn new(port: P, config: SessionConfig) -> Self {
        Self { port, config }
    }

    /// Session timing parameters.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Whether the connection is still open.
    pub fn is_open(&self) -> bool {
        self.port
            .is_open()
    }

    /// Close the connection. Safe to call from any state, any number of times.
    pub fn close(&mut self) -> Result<()> {
        self.port
            .close()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    fn check_interrupted(&mut self) -> Result<()> {
        if crate::is_interrupted_requested() {
            warn!("Interrupt requested, closing {}", self.port.name());
            let _ = self.close();
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Consume the startup banner and wait for the first prompt.
    ///
    /// If the banner never ends in a prompt, a single bare CR is sent to make
    /// the CLI print one. This happens only here and in [`Self::recover`].
    pub fn await_prompt(&mut self) -> Result<()> {
        self.ensure_open()?;
        let timeout = self.config.banner_timeout;

        match self.collect("", &[Marker::Prompt], timeout) {
            Ok(_) => return Ok(()),
            Err(Error::Timeout(_)) => {
                debug!("No prompt after banner, soliciting one");
            },
            Err(e) => return Err(e),
        }

        self.port
            .write_all_bytes(b"\r")?;
        match self.collect("", &[Marker::Prompt], timeout) {
            Ok(_) => Ok(()),
            Err(Error::Timeout(_)) => Err(Error::Timeout(format!(
                "no CLI prompt on {} after {:?}; is the device CLI reachable on this port?",
                self.port.name(),
                timeout * 2
            ))),
            Err(e) => Err(e),
        }
    }

    /// Read and discard pending output.
    ///
    /// Stops when the prompt has been seen, when the line has been quiet for
    /// `drain_quiescence`, or after `drain_limit`. Returns whether a prompt was
    /// seen.
    pub fn drain(&mut self) -> Result<bool> {
        self.ensure_open()?;
        let start = Instant::now();
        let mut last_data = start;
        let mut discarded: Vec<u8> = Vec::new();
        let poll = self
            .config
            .read_poll
            .min(self.config.drain_quiescence);

        loop {
            let bytes = self
                .port
                .read_available(poll)?;
            if bytes.is_empty() {
                if last_data.elapsed() >= self.config.drain_quiescence {
                    break;
                }
            } else {
                last_data = Instant::now();
                discarded.extend_from_slice(&bytes);
                if Marker::Prompt.is_present(&ansi::normalize(&discarded)) {
                    break;
                }
            }
            if start.elapsed() >= self.config.drain_limit {
                break;
            }
        }

        if !discarded.is_empty() {
            trace!(
                "Drained {} stale bytes: {:?}",
                discarded.len(),
                ansi::normalize(&discarded)
            );
        }
        Ok(Marker::Prompt.is_present(&ansi::normalize(&discarded)))
    }

    /// Resynchronize after an ambiguous exchange.
    ///
    /// Clears host-side buffers and drains. If the device does not show a
    /// prompt on its own, one bare CR is sent and the drain repeated.
    pub fn recover(&mut self) -> Result<()> {
        self.ensure_open()?;
        warn!("Recovering command channel on {}", self.port.name());
        self.port
            .clear_buffers()?;

        if self.drain()? {
            return Ok(());
        }

        self.port
            .write_all_bytes(b"\r")?;
        let timeout = self.config.command_timeout;
        match self.collect("", &[Marker::Prompt], timeout) {
            Ok(_) => Ok(()),
            Err(Error::Timeout(msg)) => Err(Error::Timeout(format!("recovery failed: {msg}"))),
            Err(e) => Err(e),
        }
    }

    /// Drain, then write `command` with its terminator.
    pub fn send(&mut self, command: &Command) -> Result<()> {
        self.ensure_open()?;
        command.validate()?;
        self.check_interrupted()?;
        self.drain()?;

        debug!("> {}", command.text());
        self.port
            .write_all_bytes(&command.to_bytes())
    }

    /// Write raw payload bytes, no terminator.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;
        trace!("Writing {} raw bytes", bytes.len());
        self.port
            .write_all_bytes(bytes)
    }

    /// Read until one of `markers` appears in the normalized text.
    pub fn collect(
        &mut self,
        command_text: &str,
        markers: &[Marker],
        timeout: Duration,
    ) -> Result<Response> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        let mut raw: Vec<u8> = Vec::new();

        loop {
            self.check_interrupted()?;

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let poll = self
                .config
                .read_poll
                .min(deadline - now);

            let bytes = self
                .port
                .read_available(poll)?;
            if bytes.is_empty() {
                continue;
            }
            raw.extend_from_slice(&bytes);

            let text = ansi::normalize(&raw);
            if let Some(marker) = markers
                .iter()
                .copied()
                .find(|m| m.is_present(&text))
            {
                trace!("< {text:?}");
                return Ok(Response::new(command_text, raw, text, marker));
            }
        }

        let text = ansi::normalize(&raw);
        let tail: String = text
            .chars()
            .rev()
            .take(200)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let wanted: Vec<String> = markers
            .iter()
            .map(ToString::to_string)
            .collect();
        Err(Error::Timeout(format!(
            "no {} after {timeout:?} for '{command_text}'; received {} bytes: {tail:?}",
            wanted.join("/"),
            raw.len()
        )))
    }

    /// Send an ordinary command and wait for the prompt.
    pub fn execute(&mut self, command: &Command) -> Result<Response> {
        self.send(command)?;
        let timeout = self.config.command_timeout;
        self.collect(command.text(), &[Marker::Prompt], timeout)
    }
}

impl<P: Port> Drop for CommandSession<P> {
    fn drop(&mut self) {
        let _ = self
            .port
            .close();
    }
}
