//! Command framing and response markers for the device CLI.
//!
//! ## Line terminators
//!
//! The CLI dispatches a command as soon as it sees `\r`. A `\n` following it
//! is *not* consumed by the line reader; it stays queued in the device's
//! input buffer. For ordinary commands that is harmless, but `write_chunk`
//! switches the device into a raw read of N payload bytes right after
//! dispatch, and the queued `\n` becomes payload byte 0:
//!
//! ```text
//! host:   "storage write_chunk /ext/a 4\r\n" "WXYZ"
//! device: dispatch ------------------------^ read 4 -> "\nWXY"
//!         next command line starts with "Z" ...
//! ```
//!
//! Commands that are immediately followed by raw payload bytes therefore use
//! [`Terminator::Cr`]. [`Command::write_chunk`] is the only constructor for
//! such commands and always picks `Cr`.

use crate::error::{Error, Result};

/// Idle prompt printed by the CLI after every command.
pub const PROMPT: &str = ">: ";

/// Line printed by `storage write_chunk` once it is waiting for payload.
pub const READY: &str = "Ready";

/// Prefix of every storage error line.
pub const STORAGE_ERROR: &str = "Storage error";

/// How a command line is terminated on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// Carriage return + line feed, for ordinary commands.
    CrLf,
    /// Carriage return only, for commands followed by raw payload bytes.
    Cr,
}

impl Terminator {
    /// Wire bytes of the terminator.
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::CrLf => b"\r\n",
            Self::Cr => b"\r",
        }
    }
}

/// One CLI instruction plus its terminator policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    terminator: Terminator,
}

impl Command {
    /// Ordinary command, terminated with CR LF.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            terminator: Terminator::CrLf,
        }
    }

    /// `device_info`.
    pub fn device_info() -> Self {
        Self::new("device_info")
    }

    /// `storage mkdir <path>`.
    pub fn storage_mkdir(path: &str) -> Result<Self> {
        Ok(Self::new(format!("storage mkdir {}", quote_path(path)?)))
    }

    /// `storage stat <path>`.
    pub fn storage_stat(path: &str) -> Result<Self> {
        Ok(Self::new(format!("storage stat {}", quote_path(path)?)))
    }

    /// `storage list <path>`.
    pub fn storage_list(path: &str) -> Result<Self> {
        Ok(Self::new(format!("storage list {}", quote_path(path)?)))
    }

    /// `storage write_chunk <path> <len>`, terminated with CR only.
    pub fn write_chunk(path: &str, len: usize) -> Result<Self> {
        Ok(Self {
            text: format!("storage write_chunk {} {len}", quote_path(path)?),
            terminator: Terminator::Cr,
        })
    }

    /// Command text without terminator.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Terminator policy.
    pub fn terminator(&self) -> Terminator {
        self.terminator
    }

    /// Whether raw payload bytes follow this command.
    pub fn expects_payload(&self) -> bool {
        self.terminator == Terminator::Cr
    }

    /// Serialize for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.text.len() + 2);
        bytes.extend_from_slice(self.text.as_bytes());
        bytes.extend_from_slice(
            self.terminator
                .as_bytes(),
        );
        bytes
    }

    /// Reject text the CLI line reader would split or misparse.
    pub fn validate(&self) -> Result<()> {
        if self.text.is_empty()
            || !self.text.is_ascii()
            || self
                .text
                .bytes()
                .any(|b| b.is_ascii_control())
        {
            return Err(Error::InvalidCommand(self.text.clone()));
        }
        Ok(())
    }
}

/// Quote a remote path for the CLI tokenizer.
///
/// Paths with spaces are wrapped in double quotes; paths that contain a quote
/// or control characters cannot be expressed and are rejected.
pub fn quote_path(path: &str) -> Result<String> {
    if path.is_empty()
        || path.contains('"')
        || path
            .chars()
            .any(char::is_control)
    {
        return Err(Error::InvalidCommand(path.to_string()));
    }
    if path.contains(' ') {
        Ok(format!("\"{path}\""))
    } else {
        Ok(path.to_string())
    }
}

/// Terminal markers that complete a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// The idle prompt.
    Prompt,
    /// A `Ready` line from `write_chunk`.
    Ready,
}

impl Marker {
    /// Whether normalized `text` contains this marker.
    pub fn is_present(self, text: &str) -> bool {
        match self {
            Self::Prompt => text
                .trim_end()
                .ends_with(PROMPT.trim_end()),
            Self::Ready => split_lines(text).any(|line| line.trim() == READY),
        }
    }
}

impl std::fmt::Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prompt => write!(f, "prompt"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\r', '\n'])
}

/// Response to one command.
#[derive(Debug, Clone)]
pub struct Response {
    command: String,
    raw: Vec<u8>,
    text: String,
    marker: Marker,
}

impl Response {
    /// Build a response from the raw bytes and their normalized text.
    pub fn new(command: impl Into<String>, raw: Vec<u8>, text: String, marker: Marker) -> Self {
        Self {
            command: command.into(),
            raw,
            text,
            marker,
        }
    }

    /// Raw bytes as received.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Normalized text (control sequences removed).
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Marker that completed the response.
    pub fn marker(&self) -> Marker {
        self.marker
    }

    /// Output lines of the command: echo and trailing prompt removed.
    pub fn body(&self) -> String {
        let lines: Vec<&str> = split_lines(&self.text)
            .filter(|line| !line.trim().is_empty())
            .collect();

        let command = self
            .command
            .trim();
        let start = if command.is_empty() {
            0
        } else {
            lines
                .iter()
                .position(|line| {
                    let line = line.trim();
                    line == command || line.ends_with(command)
                })
                .map_or(0, |i| i + 1)
        };

        let mut output = &lines[start.min(lines.len())..];
        while let Some((last, rest)) = output.split_last() {
            if last.trim() == PROMPT.trim_end() {
                output = rest;
            } else {
                break;
            }
        }

        output
            .iter()
            .map(|line| line.trim_end())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// First line that starts with `Storage error`, if the device reported
    /// one. Listing lines that merely contain the words do not count.
    pub fn storage_error(&self) -> Option<String> {
        split_lines(&self.text)
            .map(str::trim)
            .find(|line| line.starts_with(STORAGE_ERROR))
            .map(str::to_string)
    }
}
