// Chunked streaming bit I/O.
//
// The writer flushes full fixed-size chunks to its byte sink as they fill
// and drains the partial chunk on close; the reader reloads chunks from its
// source when the current one is consumed. Memory stays bounded by the
// chunk size regardless of stream length. The streaming form carries no
// pad-count header: the final byte is zero-padded and a read that runs off
// the end of the source reports exhaustion.

use std::io::{Read, Write};

use log::trace;

use crate::bits::stats::{BitStats, Metric};
use crate::bits::{BitRead, BitWrite};
use crate::error::{Error, Result};

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Bit sink that streams full chunks to an underlying `Write`.
pub struct ChunkedBitWriter<W: Write> {
    sink: W,
    chunk: Vec<u8>,
    /// Bits accumulated in the current partial byte.
    cur_byte: u8,
    bits_in_cur: u32,
    chunk_size: usize,
    stats: BitStats,
}

impl<W: Write> ChunkedBitWriter<W> {
    pub fn new(sink: W) -> Self {
        Self::with_chunk_size(sink, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(sink: W, chunk_size: usize) -> Self {
        debug_assert!(chunk_size > 0);
        Self {
            sink,
            chunk: Vec::with_capacity(chunk_size),
            cur_byte: 0,
            bits_in_cur: 0,
            chunk_size,
            stats: BitStats::new(),
        }
    }

    pub fn stats(&self) -> &BitStats {
        &self.stats
    }

    fn push_byte(&mut self, byte: u8) -> Result<()> {
        self.chunk.push(byte);
        if self.chunk.len() >= self.chunk_size {
            trace!("flushing full {}-byte chunk", self.chunk.len());
            self.sink.write_all(&self.chunk)?;
            self.chunk.clear();
        }
        Ok(())
    }
}

impl<W: Write> BitWrite for ChunkedBitWriter<W> {
    fn write_bits(&mut self, value: u64, n: u32) -> Result<()> {
        debug_assert!(n <= 64);
        if n == 0 {
            return Ok(());
        }
        let value = if n == 64 { value } else { value & ((1u64 << n) - 1) };
        let mut left = n;
        while left > 0 {
            let free = 8 - self.bits_in_cur;
            let take = left.min(free);
            let chunk = ((value >> (left - take)) & ((1u64 << take) - 1)) as u8;
            self.cur_byte |= chunk << (free - take);
            self.bits_in_cur += take;
            left -= take;
            if self.bits_in_cur == 8 {
                let byte = self.cur_byte;
                self.cur_byte = 0;
                self.bits_in_cur = 0;
                self.push_byte(byte)?;
            }
        }
        self.stats.measure(u64::from(n));
        Ok(())
    }

    fn set_metric(&mut self, metric: Metric) {
        self.stats.set_metric(metric);
    }

    /// Drain the partial chunk (used bytes only, final byte zero-padded)
    /// and flush the sink.
    fn close(&mut self) -> Result<()> {
        if self.bits_in_cur > 0 {
            let byte = self.cur_byte;
            self.cur_byte = 0;
            self.bits_in_cur = 0;
            self.chunk.push(byte);
        }
        if !self.chunk.is_empty() {
            self.sink.write_all(&self.chunk)?;
            self.chunk.clear();
        }
        self.sink.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Bit source that reloads fixed-size chunks from an underlying `Read`.
pub struct ChunkedBitReader<R: Read> {
    source: R,
    chunk: Vec<u8>,
    chunk_len: usize,
    byte_pos: usize,
    /// Bits already consumed from the current byte.
    bit_in_byte: u32,
    eof: bool,
}

impl<R: Read> ChunkedBitReader<R> {
    pub fn new(source: R) -> Self {
        Self::with_chunk_size(source, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(source: R, chunk_size: usize) -> Self {
        debug_assert!(chunk_size > 0);
        Self {
            source,
            chunk: vec![0; chunk_size],
            chunk_len: 0,
            byte_pos: 0,
            bit_in_byte: 0,
            eof: false,
        }
    }

    /// Reload the chunk; returns false on end of source.
    fn reload(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let n = self.source.read(&mut self.chunk)?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }
        self.chunk_len = n;
        self.byte_pos = 0;
        Ok(true)
    }

    /// Bits left before the next reload would be needed.
    fn buffered_bits(&self) -> u64 {
        if self.byte_pos >= self.chunk_len {
            return 0;
        }
        (self.chunk_len - self.byte_pos) as u64 * 8 - u64::from(self.bit_in_byte)
    }
}

impl<R: Read> BitRead for ChunkedBitReader<R> {
    fn read_bits(&mut self, n: u32) -> Result<u64> {
        debug_assert!(n <= 64);
        if n == 0 {
            return Ok(0);
        }
        let mut value = 0u64;
        let mut left = n;
        while left > 0 {
            if self.byte_pos >= self.chunk_len && !self.reload()? {
                return Err(Error::BufferExhausted {
                    requested: n,
                    available: u64::from(n - left),
                });
            }
            let byte = self.chunk[self.byte_pos];
            let avail = 8 - self.bit_in_byte;
            let take = left.min(avail);
            let chunk = (byte >> (avail - take)) & ((1u16 << take) - 1) as u8;
            value = (value << take) | u64::from(chunk);
            self.bit_in_byte += take;
            left -= take;
            if self.bit_in_byte == 8 {
                self.bit_in_byte = 0;
                self.byte_pos += 1;
            }
        }
        Ok(value)
    }

    fn remaining_hint(&self) -> Option<u64> {
        // Only the buffered portion is known; the source length is not.
        if self.eof { Some(self.buffered_bits()) } else { None }
    }
}

// ---------------------------------------------------------------------------
// Counting sink
// ---------------------------------------------------------------------------

/// Bit sink that discards data and accumulates statistics only.
#[derive(Debug, Default)]
pub struct BitCounter {
    bits: u64,
    stats: BitStats,
}

impl BitCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bits accepted so far.
    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn stats(&self) -> &BitStats {
        &self.stats
    }
}

impl BitWrite for BitCounter {
    fn write_bits(&mut self, _value: u64, n: u32) -> Result<()> {
        debug_assert!(n <= 64);
        self.bits += u64::from(n);
        self.stats.measure(u64::from(n));
        Ok(())
    }

    fn set_metric(&mut self, metric: Metric) {
        self.stats.set_metric(metric);
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
