// Bit-level storage and streaming.
//
// This module provides:
// - `buffer`  — BitBuffer: growable in-memory bit stream with pad header
// - `stream`  — ChunkedBitWriter/ChunkedBitReader: bounded-memory streaming,
//               plus BitCounter, a statistics-only sink
// - `stats`   — BitStats: per-metric bit accounting

pub mod buffer;
pub mod stats;
pub mod stream;

pub use buffer::BitBuffer;
pub use stats::{BitStats, Metric, MetricSummary};
pub use stream::{BitCounter, ChunkedBitReader, ChunkedBitWriter, DEFAULT_CHUNK_SIZE};

use crate::error::Result;

/// Append-only bit sink. All stream writes are most-significant-bit-first;
/// a value wider than `n` bits is silently truncated to its low `n` bits.
pub trait BitWrite {
    /// Append the `n` (0..=64) low bits of `value`.
    fn write_bits(&mut self, value: u64, n: u32) -> Result<()>;

    /// Name the unit class the following writes belong to.
    fn set_metric(&mut self, metric: Metric);

    /// Finalize the sink. Streaming sinks drain buffered bytes here.
    fn close(&mut self) -> Result<()>;
}

/// Sequential bit source.
pub trait BitRead {
    /// Consume the next `n` (0..=64) bits, most-significant-bit-first.
    /// Fails with `Error::BufferExhausted` when fewer than `n` bits remain.
    fn read_bits(&mut self, n: u32) -> Result<u64>;

    /// Bits known to remain, when the source can tell. In-memory buffers
    /// report an exact count; chunked readers do not know their source's
    /// length until it is exhausted.
    fn remaining_hint(&self) -> Option<u64> {
        None
    }
}
