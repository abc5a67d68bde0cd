//! Chunked file transfer with `storage write_chunk`.
//!
//! Each chunk is one exchange:
//!
//! ```text
//! host                                   device
//!  |  storage write_chunk <path> <n> \r    |
//!  |-------------------------------------->|
//!  |                              Ready\r\n|
//!  |<--------------------------------------|
//!  |  <n raw bytes>                        |
//!  |-------------------------------------->|
//!  |                                \r\n>: |  (nothing else before the prompt)
//!  |<--------------------------------------|
//! ```
//!
//! A timeout or device-reported error triggers one recovery drain and a
//! single retry of the same chunk. The device appends, so once the payload has
//! gone out a failed acknowledgement is ambiguous. In that case the remote size
//! is checked with `storage stat` first: a chunk the device already stored is
//! counted as written, and any size other than `offset` or `offset + len`
//! fails the file instead of resending.

use std::thread::sleep;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{ChunkPlan, Command, CommandSession, Marker, WRITE_CHUNK_MAX};
use crate::storage::{EntryKind, PathStat, stat};

/// Delay between consecutive chunk commands.
pub const CHUNK_DELAY: Duration = Duration::from_millis(50);

/// Attempts per chunk: the first try plus one retry.
pub const ATTEMPTS_PER_CHUNK: usize = 2;

/// Transfer parameters.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Largest chunk to send; clamped to `1..=512`.
    pub max_chunk: usize,
    /// Pause between consecutive chunk commands.
    pub chunk_delay: Duration,
    /// Attempts per chunk before the file is failed.
    pub attempts_per_chunk: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_chunk: WRITE_CHUNK_MAX,
            chunk_delay: CHUNK_DELAY,
            attempts_per_chunk: ATTEMPTS_PER_CHUNK,
        }
    }
}

impl TransferConfig {
    /// Set the inter-chunk delay.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Set the maximum chunk size.
    #[must_use]
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk;
        self
    }
}

/// Final state of one file transfer.
#[derive(Debug)]
pub enum TransferStatus {
    /// Every chunk was acknowledged.
    Success,
    /// The transfer stopped; chunks before the failing one remain on the device.
    Failed(Error),
}

/// Result of writing one file.
#[derive(Debug)]
pub struct TransferOutcome {
    /// Remote destination path.
    pub path: String,
    /// Bytes acknowledged by the device.
    pub bytes_sent: usize,
    /// Chunks acknowledged by the device.
    pub chunks: usize,
    /// Chunk retries performed.
    pub retries: usize,
    /// Final status.
    pub status: TransferStatus,
}

impl TransferOutcome {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            bytes_sent: 0,
            chunks: 0,
            retries: 0,
            status: TransferStatus::Success,
        }
    }

    /// Outcome of a file that was never attempted.
    pub(crate) fn failed(path: &str, error: Error) -> Self {
        Self::new(path).fail(error)
    }

    fn fail(mut self, error: Error) -> Self {
        self.status = TransferStatus::Failed(error);
        self
    }

    /// Whether the whole payload was written.
    pub fn is_success(&self) -> bool {
        matches!(self.status, TransferStatus::Success)
    }

    /// The failure, if any.
    pub fn error(&self) -> Option<&Error> {
        match &self.status {
            TransferStatus::Success => None,
            TransferStatus::Failed(e) => Some(e),
        }
    }

    /// Convert into a `Result`, giving up the byte counters on failure.
    pub fn into_result(self) -> Result<Self> {
        match self.status {
            TransferStatus::Success => Ok(self),
            TransferStatus::Failed(e) => Err(e),
        }
    }
}

/// Result of one chunk exchange.
#[derive(Debug)]
enum ChunkAttempt {
    /// Payload written and acknowledged.
    Written,
    /// Timed out or rejected before the payload went out; may be retried
    /// after recovery.
    Retryable(Error),
    /// Payload sent but not cleanly acknowledged; the device may hold it.
    Unconfirmed(Error),
    /// Unexpected response shape, cancellation or a dead port.
    Fatal(Error),
}

/// Write `data` to `remote` in chunks, reporting `(bytes_sent, total)` after
/// every acknowledged chunk.
///
/// An empty payload is a no-op success: no command is sent and the remote
/// file is not created.
pub fn write_file<P: Port>(
    session: &mut CommandSession<P>,
    config: &TransferConfig,
    remote: &str,
    data: &[u8],
    progress: &mut dyn FnMut(usize, usize),
) -> TransferOutcome {
    let plan = ChunkPlan::new(data.len(), config.max_chunk);
    let mut outcome = TransferOutcome::new(remote);

    if plan.is_empty() {
        debug!("Empty payload for {remote}, nothing to write");
        return outcome;
    }
    if let Err(e) = Command::write_chunk(remote, 0) {
        return outcome.fail(e);
    }

    info!(
        "Writing {} bytes to {remote} in {} chunk(s)",
        data.len(),
        plan.len()
    );
    let attempts = config
        .attempts_per_chunk
        .max(1);

    for (index, range) in plan
        .ranges()
        .iter()
        .enumerate()
    {
        if index > 0 && !config.chunk_delay.is_zero() {
            sleep(config.chunk_delay);
        }
        if crate::is_interrupted_requested() {
            let _ = session.close();
            return outcome.fail(Error::Cancelled);
        }

        let offset = range.start;
        let chunk = &data[range.clone()];
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                outcome.retries += 1;
                if let Err(e) = session.recover() {
                    last_error = Some(e);
                    break;
                }
            }

            match attempt_chunk(session, remote, offset, chunk) {
                ChunkAttempt::Written => {
                    last_error = None;
                    break;
                },
                ChunkAttempt::Retryable(e) => {
                    warn!(
                        "Chunk {index} of {remote} (offset {offset}) failed on attempt {attempt}/{attempts}: {e}"
                    );
                    last_error = Some(e);
                },
                ChunkAttempt::Unconfirmed(e) => {
                    warn!(
                        "Chunk {index} of {remote} (offset {offset}) unconfirmed on attempt {attempt}/{attempts}: {e}"
                    );
                    match confirm_chunk(session, remote, offset, chunk.len()) {
                        Ok(true) => {
                            info!("Chunk {index} of {remote} (offset {offset}) was stored");
                            last_error = None;
                            break;
                        },
                        Ok(false) => last_error = Some(e),
                        Err(check) => {
                            last_error = Some(check);
                            break;
                        },
                    }
                },
                ChunkAttempt::Fatal(e) => {
                    last_error = Some(e);
                    break;
                },
            }
        }

        if let Some(e) = last_error {
            return outcome.fail(transfer_failed(remote, offset, e));
        }

        outcome.bytes_sent += chunk.len();
        outcome.chunks += 1;
        trace!(
            "Chunk {index} of {remote} acknowledged ({}/{} bytes)",
            outcome.bytes_sent,
            data.len()
        );
        progress(outcome.bytes_sent, data.len());
    }

    info!(
        "Wrote {remote}: {} bytes, {} chunk(s), {} retr{}",
        outcome.bytes_sent,
        outcome.chunks,
        outcome.retries,
        if outcome.retries == 1 { "y" } else { "ies" }
    );
    outcome
}

fn transfer_failed(remote: &str, offset: usize, source: Error) -> Error {
    match source {
        Error::Cancelled => Error::Cancelled,
        source => Error::TransferFailed {
            path: remote.to_string(),
            offset,
            source: Box::new(source),
        },
    }
}

fn attempt_chunk<P: Port>(
    session: &mut CommandSession<P>,
    remote: &str,
    offset: usize,
    chunk: &[u8],
) -> ChunkAttempt {
    let mut payload_sent = false;
    match exchange_chunk(session, remote, offset, chunk, &mut payload_sent) {
        Ok(()) => ChunkAttempt::Written,
        Err(e) if e.is_retryable() && payload_sent => ChunkAttempt::Unconfirmed(e),
        Err(e) if e.is_retryable() => ChunkAttempt::Retryable(e),
        Err(e) => ChunkAttempt::Fatal(e),
    }
}

/// Whether the chunk at `offset` reached `remote`, judged by its size.
///
/// `Ok(false)` means the file ends at `offset` and the chunk can be resent.
fn confirm_chunk<P: Port>(
    session: &mut CommandSession<P>,
    remote: &str,
    offset: usize,
    len: usize,
) -> Result<bool> {
    session.recover()?;
    let size = match stat(session, remote)? {
        PathStat::Missing => 0,
        PathStat::Exists {
            kind: EntryKind::File,
            size: Some(size),
        } => size,
        other => {
            return Err(Error::ProtocolViolation(format!(
                "cannot confirm chunk at offset {offset} of {remote}: stat reported {other:?}"
            )));
        },
    };

    let end = offset + len;
    if size == end as u64 {
        Ok(true)
    } else if size == offset as u64 {
        Ok(false)
    } else {
        Err(Error::ProtocolViolation(format!(
            "{remote} holds {size} bytes after an unconfirmed chunk, expected {offset} or {end}"
        )))
    }
}

fn exchange_chunk<P: Port>(
    session: &mut CommandSession<P>,
    remote: &str,
    offset: usize,
    chunk: &[u8],
    payload_sent: &mut bool,
) -> Result<()> {
    let command = Command::write_chunk(remote, chunk.len())?;
    session.send(&command)?;

    let ready_timeout = session
        .config()
        .ready_timeout;
    let response = session.collect(
        command.text(),
        &[Marker::Ready, Marker::Prompt],
        ready_timeout,
    )?;
    if response.marker() == Marker::Prompt {
        return Err(match response.storage_error() {
            Some(message) => Error::DeviceReported {
                path: remote.to_string(),
                offset,
                message,
            },
            None => Error::ProtocolViolation(format!(
                "expected Ready for {remote} at offset {offset}, got {:?}",
                response.body()
            )),
        });
    }

    trace!("Ready for {remote} at offset {offset}");
    session.write_raw(chunk)?;
    *payload_sent = true;

    let ack_timeout = session
        .config()
        .ack_timeout;
    let ack = session.collect("", &[Marker::Prompt], ack_timeout)?;
    let body = ack.body();
    if body.is_empty() {
        return Ok(());
    }

    warn!("Unexpected acknowledgement for {remote} at offset {offset}: {body:?}");
    Err(Error::DeviceReported {
        path: remote.to_string(),
        offset,
        message: ack
            .storage_error()
            .unwrap_or(body),
    })
}
