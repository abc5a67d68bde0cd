//! In-memory device CLI used by the unit tests.
//!
//! [`SimDevice`] implements [`Port`] and reproduces the parts of the device
//! line discipline the client depends on:
//!
//! - every received command character is echoed back, optionally wrapped in
//!   insert-mode toggles
//! - a command is dispatched on `\r`; a `\n` is ignored in line mode
//! - after `storage write_chunk` dispatches, the next N bytes are payload,
//!   whatever they are (including a `\n` left over from a CR LF terminator)
//!
//! Faults can be injected per `write_chunk` command (counted from 0).

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::{DEFAULT_BAUD, Port};
use crate::protocol::SessionConfig;

const PROMPT: &[u8] = b"\r\n>: ";
const BANNER: &[u8] = b"\r\n              _.-------.._ \r\n  Welcome to Flipper Zero Command Line Interface!\r\n";
const NOT_EXIST: &str = "Storage error: file/dir not exist";
const ALREADY_EXIST: &str = "Storage error: file/dir already exist";
const INTERNAL: &str = "Storage error: internal error";

/// Session timings short enough for tests that wait on timeouts.
pub fn fast_session_config() -> SessionConfig {
    // RUST_LOG=trace shows the simulated traffic of a failing test
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
    SessionConfig {
        read_poll: Duration::from_millis(2),
        command_timeout: Duration::from_millis(300),
        ready_timeout: Duration::from_millis(100),
        ack_timeout: Duration::from_millis(100),
        drain_quiescence: Duration::from_millis(5),
        drain_limit: Duration::from_millis(200),
        banner_timeout: Duration::from_millis(100),
    }
}

enum Mode {
    Line,
    Payload {
        path: String,
        remaining: usize,
        data: Vec<u8>,
        chunk: usize,
    },
}

/// Simulated device CLI.
pub struct SimDevice {
    open: bool,
    timeout: Duration,
    responsive: bool,
    escaped_echo: bool,
    output: VecDeque<u8>,
    written: Vec<u8>,
    line: Vec<u8>,
    mode: Mode,
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    swallow_chunks: HashSet<usize>,
    bad_ack_chunks: HashSet<usize>,
    noisy_ack_chunks: HashSet<usize>,
    reply_chunks: HashSet<usize>,
    chunk_commands: usize,
    ready_count: usize,
    ack_count: usize,
}

impl SimDevice {
    /// Device with the startup banner pending and `/ext`, `/int`,
    /// `/ext/infrared` present.
    pub fn new() -> Self {
        let mut output = VecDeque::new();
        output.extend(BANNER);
        output.extend(PROMPT);
        Self {
            open: true,
            timeout: Duration::from_millis(100),
            responsive: true,
            escaped_echo: false,
            output,
            written: Vec::new(),
            line: Vec::new(),
            mode: Mode::Line,
            dirs: ["/ext", "/int", "/ext/infrared"]
                .into_iter()
                .map(String::from)
                .collect(),
            files: BTreeMap::new(),
            swallow_chunks: HashSet::new(),
            bad_ack_chunks: HashSet::new(),
            noisy_ack_chunks: HashSet::new(),
            reply_chunks: HashSet::new(),
            chunk_commands: 0,
            ready_count: 0,
            ack_count: 0,
        }
    }

    /// Start without any pending banner output.
    pub fn without_banner(mut self) -> Self {
        self.output
            .clear();
        self
    }

    /// Never answer anything.
    pub fn mute(mut self) -> Self {
        self.responsive = false;
        self
    }

    /// Echo each character wrapped in `ESC[4h` / `ESC[4l`.
    pub fn with_escaped_echo(mut self) -> Self {
        self.escaped_echo = true;
        self
    }

    /// Add a directory.
    pub fn with_dir(mut self, path: &str) -> Self {
        self.dirs
            .insert(path.to_string());
        self
    }

    /// Add a file.
    pub fn with_file(mut self, path: &str, data: &[u8]) -> Self {
        self.files
            .insert(path.to_string(), data.to_vec());
        self
    }

    /// Ignore the `n`th `write_chunk` command entirely.
    pub fn swallow_chunk(mut self, n: usize) -> Self {
        self.swallow_chunks
            .insert(n);
        self
    }

    /// Reject the payload of the `n`th `write_chunk` command.
    pub fn bad_ack_on_chunk(mut self, n: usize) -> Self {
        self.bad_ack_chunks
            .insert(n);
        self
    }

    /// Store the payload of the `n`th `write_chunk` command, then print a
    /// stray line before the prompt.
    pub fn noisy_ack_on_chunk(mut self, n: usize) -> Self {
        self.noisy_ack_chunks
            .insert(n);
        self
    }

    /// Answer the `n`th `write_chunk` command with a plain line instead of
    /// `Ready`.
    pub fn reply_instead_of_ready(mut self, n: usize) -> Self {
        self.reply_chunks
            .insert(n);
        self
    }

    /// Queue bytes as if the device had printed them.
    pub fn push_output(&mut self, bytes: &[u8]) {
        self.output
            .extend(bytes);
    }

    /// Everything the host has written so far.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Contents of a stored file.
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files
            .get(path)
            .map(Vec::as_slice)
    }

    /// Whether a directory exists.
    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs
            .contains(path)
    }

    /// Number of `write_chunk` commands dispatched.
    pub fn chunk_commands(&self) -> usize {
        self.chunk_commands
    }

    /// Number of `Ready` lines printed.
    pub fn ready_count(&self) -> usize {
        self.ready_count
    }

    /// Number of payloads stored.
    pub fn ack_count(&self) -> usize {
        self.ack_count
    }

    fn print(&mut self, text: &str) {
        self.output
            .extend(text.as_bytes());
    }

    fn print_line(&mut self, text: &str) {
        self.print(text);
        self.print("\r\n");
    }

    fn echo(&mut self, byte: u8) {
        if self.escaped_echo {
            self.output
                .extend(b"\x1b[4h");
            self.output
                .push_back(byte);
            self.output
                .extend(b"\x1b[4l");
        } else {
            self.output
                .push_back(byte);
        }
    }

    fn receive(&mut self, byte: u8) {
        if let Mode::Payload {
            remaining, data, ..
        } = &mut self.mode
        {
            data.push(byte);
            *remaining -= 1;
            if *remaining == 0 {
                self.finish_payload();
            }
            return;
        }

        match byte {
            b'\n' => {},
            b'\r' => {
                self.print("\r\n");
                let line = String::from_utf8_lossy(&self.line).into_owned();
                self.line
                    .clear();
                self.dispatch(&line);
            },
            other => {
                self.line
                    .push(other);
                self.echo(other);
            },
        }
    }

    fn finish_payload(&mut self) {
        let Mode::Payload {
            path, data, chunk, ..
        } = std::mem::replace(&mut self.mode, Mode::Line)
        else {
            return;
        };

        if self
            .bad_ack_chunks
            .contains(&chunk)
        {
            self.print_line(INTERNAL);
        } else {
            self.files
                .entry(path)
                .or_default()
                .extend_from_slice(&data);
            self.ack_count += 1;
            if self
                .noisy_ack_chunks
                .contains(&chunk)
            {
                self.print_line("[I][Storage] card sync");
            }
        }
        self.output
            .extend(PROMPT);
    }

    fn dispatch(&mut self, line: &str) {
        let args = tokenize(line);
        let argv: Vec<&str> = args
            .iter()
            .map(String::as_str)
            .collect();

        match argv.as_slice() {
            [] => {},
            ["device_info"] => {
                for line in [
                    "hardware_model : Flipper Zero",
                    "hardware_name : Mazincea",
                    "hardware_region : 0",
                    "firmware_commit : 1a2b3c4d",
                    "firmware_branch : release",
                    "firmware_version : 0.103.1",
                    "firmware_origin_fork : Momentum",
                ] {
                    self.print_line(line);
                }
            },
            ["storage", "mkdir", path] => self.mkdir(path),
            ["storage", "stat", path] => self.stat(path),
            ["storage", "list", path] => self.list(path),
            ["storage", "write_chunk", path, len] => {
                let chunk = self.chunk_commands;
                self.chunk_commands += 1;
                if self
                    .swallow_chunks
                    .contains(&chunk)
                {
                    return;
                }
                if self
                    .reply_chunks
                    .contains(&chunk)
                {
                    self.print_line("Usage: storage write_chunk <path> <size>");
                } else {
                    self.write_chunk(path, len, chunk);
                    return;
                }
            },
            [name, ..] => {
                let message = format!("`{name}` command not found");
                self.print_line(&message);
            },
        }
        self.output
            .extend(PROMPT);
    }

    fn parent_exists(&self, path: &str) -> bool {
        match path.rsplit_once('/') {
            Some(("", _)) => true,
            Some((parent, _)) => self.has_dir(parent),
            None => false,
        }
    }

    fn mkdir(&mut self, path: &str) {
        if self.has_dir(path) || self.files.contains_key(path) {
            self.print_line(ALREADY_EXIST);
        } else if !self.parent_exists(path) {
            self.print_line(NOT_EXIST);
        } else {
            self.dirs
                .insert(path.to_string());
        }
    }

    fn stat(&mut self, path: &str) {
        if path == "/ext" || path == "/int" {
            self.print_line("Storage, 3.8GiB total, 3.7GiB free");
        } else if self.has_dir(path) {
            self.print_line("Directory");
        } else if let Some(size) = self
            .files
            .get(path)
            .map(Vec::len)
        {
            let line = format!("File, size: {size}b");
            self.print_line(&line);
        } else {
            self.print_line(NOT_EXIST);
        }
    }

    fn list(&mut self, path: &str) {
        if !self.has_dir(path) {
            self.print_line(NOT_EXIST);
            return;
        }
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let direct_child = |p: &String| {
            p.strip_prefix(&prefix)
                .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                .map(str::to_string)
        };

        let mut lines: Vec<String> = self
            .dirs
            .iter()
            .filter_map(direct_child)
            .map(|name| format!("\t[D] {name}"))
            .collect();
        lines.extend(
            self.files
                .iter()
                .filter_map(|(p, data)| direct_child(p).map(|name| (name, data.len())))
                .map(|(name, size)| format!("\t[F] {name} {size}b")),
        );

        if lines.is_empty() {
            self.print_line("\tEmpty");
        }
        for line in lines {
            self.print_line(&line);
        }
    }

    fn write_chunk(&mut self, path: &str, len: &str, chunk: usize) {
        let Ok(len) = len.parse::<usize>() else {
            self.print_line("Invalid size");
            self.output
                .extend(PROMPT);
            return;
        };
        if !self.parent_exists(path) || self.has_dir(path) {
            self.print_line(NOT_EXIST);
            self.output
                .extend(PROMPT);
            return;
        }

        self.print_line("Ready");
        self.ready_count += 1;
        self.mode = Mode::Payload {
            path: path.to_string(),
            remaining: len,
            data: Vec::with_capacity(len),
            chunk,
        };
        if len == 0 {
            self.finish_payload();
        }
    }
}

fn tokenize(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut has_token = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                has_token = true;
            },
            ' ' if !quoted => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            },
            other => {
                current.push(other);
                has_token = true;
            },
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

impl Read for SimDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self
            .output
            .is_empty()
        {
            std::thread::sleep(
                self.timeout
                    .min(Duration::from_millis(1)),
            );
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf
            .len()
            .min(
                self.output
                    .len(),
            );
        for (slot, byte) in buf
            .iter_mut()
            .zip(
                self.output
                    .drain(..n),
            )
        {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written
            .extend_from_slice(buf);
        if self.responsive {
            for &byte in buf {
                self.receive(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimDevice {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn baud_rate(&self) -> u32 {
        DEFAULT_BAUD
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.output
            .clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "sim"
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_quoted_path() {
        assert_eq!(
            tokenize("storage write_chunk \"/ext/a b.txt\" 12"),
            vec!["storage", "write_chunk", "/ext/a b.txt", "12"]
        );
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn test_queued_lf_becomes_payload_byte() {
        let mut device = SimDevice::new().without_banner();
        device
            .write_all(b"storage write_chunk /ext/a 4\r\nWXYZ")
            .unwrap();
        assert_eq!(device.file("/ext/a"), Some(&b"\nWXY"[..]));
        assert_eq!(device.line, b"Z");
    }
}
