// In-memory bit buffer.
//
// Append-only, bit-addressable storage, most-significant-bit-first. The
// first `header_width` bits of the stream are reserved at construction and
// patched at serialize time with the number of unused padding bits in the
// last byte, so the exact bit length survives a byte-level round trip.

use crate::bits::stats::{BitStats, Metric};
use crate::bits::{BitRead, BitWrite};
use crate::error::{Error, Result};

/// Default width of the pad-count header. Three bits hold the 0..=7 range.
pub const DEFAULT_HEADER_WIDTH: u32 = 3;

/// Growable in-memory bit stream.
///
/// Writing appends the `n` low bits of a value MSB-first; reading consumes
/// from an independent cursor. `to_bytes` / `from_bytes` round-trip the
/// exact bit length through the pad-count header.
#[derive(Debug, Clone)]
pub struct BitBuffer {
    buf: Vec<u8>,
    /// Total bits written, including the reserved header.
    bit_len: u64,
    /// Read cursor, in bits from the start of the stream.
    read_pos: u64,
    header_width: u32,
    stats: BitStats,
}

impl BitBuffer {
    pub fn new() -> Self {
        Self::with_header_width(DEFAULT_HEADER_WIDTH)
    }

    /// Create a buffer whose pad-count header is `width` bits wide.
    /// The width must hold values up to 7 and stay within the first byte.
    pub fn with_header_width(width: u32) -> Self {
        debug_assert!((3..=8).contains(&width));
        let mut buf = Self {
            buf: Vec::new(),
            bit_len: 0,
            read_pos: 0,
            header_width: width,
            stats: BitStats::new(),
        };
        // Reserve the header; the value is patched in `to_bytes`.
        buf.push_bits(0, width);
        buf.read_pos = width as u64;
        buf
    }

    /// Rehydrate a buffer from serialized bytes, reading the pad-count
    /// header back and positioning the read cursor after it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes_with_header_width(bytes, DEFAULT_HEADER_WIDTH)
    }

    pub fn from_bytes_with_header_width(bytes: &[u8], width: u32) -> Result<Self> {
        debug_assert!((3..=8).contains(&width));
        if bytes.is_empty() {
            return Err(Error::BufferExhausted {
                requested: width,
                available: 0,
            });
        }
        let pad = (u64::from(bytes[0]) >> (8 - width)) & ((1 << width) - 1);
        if pad > 7 {
            return Err(Error::MalformedCacheBlob {
                reason: format!("pad header {pad} exceeds 7 bits"),
            });
        }
        let bit_len = bytes.len() as u64 * 8 - pad;
        // A pad claim that eats into the header itself cannot come from
        // `to_bytes` and would put the cursor past the end of the stream.
        if bit_len < u64::from(width) {
            return Err(Error::MalformedCacheBlob {
                reason: format!("pad header {pad} leaves a {bit_len}-bit stream"),
            });
        }
        Ok(Self {
            buf: bytes.to_vec(),
            bit_len,
            read_pos: width as u64,
            header_width: width,
            stats: BitStats::new(),
        })
    }

    /// Total bits written (pad header included, padding excluded).
    pub fn bit_len(&self) -> u64 {
        self.bit_len
    }

    /// Bits left to read from the cursor.
    pub fn remaining_bits(&self) -> u64 {
        self.bit_len - self.read_pos
    }

    /// Rewind the read cursor to just after the pad header.
    pub fn rewind(&mut self) {
        self.read_pos = self.header_width as u64;
    }

    /// The `i`-th bit of the stream; negative indices count from the end.
    pub fn bit(&self, i: i64) -> Option<u8> {
        let idx = if i < 0 { self.bit_len as i64 + i } else { i };
        if idx < 0 || idx as u64 >= self.bit_len {
            return None;
        }
        let idx = idx as u64;
        Some((self.buf[(idx >> 3) as usize] >> (7 - (idx & 7))) & 1)
    }

    /// Serialize the used bytes, patching the pad-count header with the
    /// number of unused bits in the last byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let byte_len = self.bit_len.div_ceil(8) as usize;
        let pad = (byte_len as u64 * 8 - self.bit_len) as u8;
        let mut out = self.buf[..byte_len].to_vec();
        out[0] |= pad << (8 - self.header_width);
        out
    }

    pub fn stats(&self) -> &BitStats {
        &self.stats
    }

    fn push_bits(&mut self, value: u64, n: u32) {
        debug_assert!(n <= 64);
        if n == 0 {
            return;
        }
        let value = if n == 64 { value } else { value & ((1u64 << n) - 1) };
        let mut left = n;
        while left > 0 {
            let used = (self.bit_len & 7) as u32;
            if used == 0 {
                self.buf.push(0);
            }
            let free = 8 - used;
            let take = left.min(free);
            let chunk = ((value >> (left - take)) & ((1u64 << take) - 1)) as u8;
            let last = self.buf.len() - 1;
            self.buf[last] |= chunk << (free - take);
            self.bit_len += u64::from(take);
            left -= take;
        }
    }
}

impl Default for BitBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl BitWrite for BitBuffer {
    fn write_bits(&mut self, value: u64, n: u32) -> Result<()> {
        self.push_bits(value, n);
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

impl BitRead for BitBuffer {
    fn read_bits(&mut self, n: u32) -> Result<u64> {
        debug_assert!(n <= 64);
        if n == 0 {
            return Ok(0);
        }
        let available = self.remaining_bits();
        if u64::from(n) > available {
            return Err(Error::BufferExhausted {
                requested: n,
                available,
            });
        }
        let mut value = 0u64;
        let mut left = n;
        while left > 0 {
            let byte = self.buf[(self.read_pos >> 3) as usize];
            let used = (self.read_pos & 7) as u32;
            let avail = 8 - used;
            let take = left.min(avail);
            let chunk = (byte >> (avail - take)) & ((1u16 << take) - 1) as u8;
            value = (value << take) | u64::from(chunk);
            self.read_pos += u64::from(take);
            left -= take;
        }
        Ok(value)
    }

    fn remaining_hint(&self) -> Option<u64> {
        Some(self.remaining_bits())
    }
}

// A pipeline buried behind trait objects still needs its output recovered
// after close, so the in-memory sink is shared through a handle.
impl BitWrite for std::rc::Rc<std::cell::RefCell<BitBuffer>> {
    fn write_bits(&mut self, value: u64, n: u32) -> Result<()> {
        self.borrow_mut().write_bits(value, n)
    }

    fn set_metric(&mut self, metric: Metric) {
        self.borrow_mut().set_metric(metric);
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
