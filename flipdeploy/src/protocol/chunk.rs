//! Chunk planning for `storage write_chunk`.

use std::ops::Range;

/// Largest payload the device accepts in one `write_chunk`.
pub const WRITE_CHUNK_MAX: usize = 512;

/// Ordered, gap-free partition of a payload into bounded byte ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    ranges: Vec<Range<usize>>,
    total: usize,
}

impl ChunkPlan {
    /// Plan `len` bytes in chunks of at most `max_chunk` bytes.
    ///
    /// `max_chunk` is clamped to `1..=WRITE_CHUNK_MAX`. An empty payload
    /// yields an empty plan.
    pub fn new(len: usize, max_chunk: usize) -> Self {
        let max_chunk = max_chunk.clamp(1, WRITE_CHUNK_MAX);
        let ranges = (0..len)
            .step_by(max_chunk)
            .map(|start| start..(start + max_chunk).min(len))
            .collect();
        Self { ranges, total: len }
    }

    /// Plan with the protocol maximum chunk size.
    pub fn for_len(len: usize) -> Self {
        Self::new(len, WRITE_CHUNK_MAX)
    }

    /// The byte ranges, in transfer order.
    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.ranges
            .len()
    }

    /// Whether the plan has no chunks (empty payload).
    pub fn is_empty(&self) -> bool {
        self.ranges
            .is_empty()
    }

    /// Payload length covered by the plan.
    pub fn total(&self) -> usize {
        self.total
    }
}
