// Tagged variable-width value codecs.
//
// Every type shares the same shape: a leading "is-zero" bit, then for
// non-zero values a short header selecting a compact window or the full
// width. Each encoder has an estimator that agrees with it bit-for-bit;
// the similarity search ranks candidates by these estimates, so drift
// between the two would corrupt the cost model.

use crate::bits::{BitRead, BitWrite};
use crate::error::{Error, Result};

/// Wire width of an integer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    /// Dates: days since epoch.
    W16,
    /// Plain 32-bit integers.
    W32,
    /// Timestamps: microseconds since epoch.
    W64,
}

impl IntWidth {
    #[inline]
    pub fn bits(self) -> u32 {
        match self {
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }
}

// ---------------------------------------------------------------------------
// Integers (int16 / int32 / int64)
// ---------------------------------------------------------------------------

/// Encode a signed integer: `0` for zero; `10` + biased 8 bits when the
/// value fits [-128, 127]; `11` + biased full width otherwise.
pub fn encode_int<W: BitWrite>(w: &mut W, value: i64, width: IntWidth) -> Result<()> {
    if value == 0 {
        return w.write_bits(0, 1);
    }
    if (-128..=127).contains(&value) {
        w.write_bits(0b10, 2)?;
        return w.write_bits((value + 128) as u64, 8);
    }
    w.write_bits(0b11, 2)?;
    match width {
        IntWidth::W16 => {
            if !(-(1 << 15)..(1 << 15)).contains(&value) {
                return Err(Error::ValueOutOfRange {
                    what: format!("{value} does not fit a 16-bit field"),
                });
            }
            w.write_bits((value + (1 << 15)) as u64, 16)
        }
        IntWidth::W32 => {
            if !(-(1 << 31)..(1 << 31)).contains(&value) {
                return Err(Error::ValueOutOfRange {
                    what: format!("{value} does not fit a 32-bit field"),
                });
            }
            w.write_bits((value + (1 << 31)) as u64, 32)
        }
        IntWidth::W64 => w.write_bits(value as u64 ^ (1 << 63), 64),
    }
}

pub fn decode_int<R: BitRead>(r: &mut R, width: IntWidth) -> Result<i64> {
    if r.read_bits(1)? == 0 {
        return Ok(0);
    }
    if r.read_bits(1)? == 0 {
        return Ok(r.read_bits(8)? as i64 - 128);
    }
    Ok(match width {
        IntWidth::W16 => r.read_bits(16)? as i64 - (1 << 15),
        IntWidth::W32 => r.read_bits(32)? as i64 - (1 << 31),
        IntWidth::W64 => (r.read_bits(64)? ^ (1 << 63)) as i64,
    })
}

pub fn estimate_int(value: i64, width: IntWidth) -> u32 {
    if value == 0 {
        1
    } else if (-128..=127).contains(&value) {
        10
    } else {
        2 + width.bits()
    }
}

// ---------------------------------------------------------------------------
// float64 bit patterns
// ---------------------------------------------------------------------------

/// Encode a 64-bit IEEE-754 pattern by trimming leading and trailing zero
/// bytes: `0` for all-zero; else `1` + 3-bit offset of the first non-zero
/// byte + 3-bit count of additional significant bytes + the literal bytes.
/// XOR deltas between near-equal floats zero most of the pattern.
pub fn encode_float<W: BitWrite>(w: &mut W, bits: u64) -> Result<()> {
    if bits == 0 {
        return w.write_bits(0, 1);
    }
    let first = bits.leading_zeros() / 8;
    let last = 7 - bits.trailing_zeros() / 8;
    let count = last - first;
    w.write_bits(1, 1)?;
    w.write_bits(u64::from(first), 3)?;
    w.write_bits(u64::from(count), 3)?;
    w.write_bits(bits >> ((7 - last) * 8), (count + 1) * 8)
}

pub fn decode_float<R: BitRead>(r: &mut R) -> Result<u64> {
    if r.read_bits(1)? == 0 {
        return Ok(0);
    }
    let first = r.read_bits(3)? as u32;
    let count = r.read_bits(3)? as u32;
    let last = first + count;
    if last > 7 {
        return Err(Error::ValueOutOfRange {
            what: format!("float byte window {first}+{count} exceeds 8 bytes"),
        });
    }
    let raw = r.read_bits((count + 1) * 8)?;
    Ok(raw << ((7 - last) * 8))
}

pub fn estimate_float(bits: u64) -> u32 {
    if bits == 0 {
        return 1;
    }
    let first = bits.leading_zeros() / 8;
    let last = 7 - bits.trailing_zeros() / 8;
    7 + (last - first + 1) * 8
}

// ---------------------------------------------------------------------------
// String cache indices
// ---------------------------------------------------------------------------

/// Encode a string-cache index: `0` for the null/unchanged marker (which
/// aliases cache index 0), else `1` + 16-bit index.
pub fn encode_index<W: BitWrite>(w: &mut W, index: u32) -> Result<()> {
    if index == 0 {
        return w.write_bits(0, 1);
    }
    if index >= 1 << 16 {
        return Err(Error::ValueOutOfRange {
            what: format!("string index {index} does not fit 16 bits"),
        });
    }
    w.write_bits(1, 1)?;
    w.write_bits(u64::from(index), 16)
}

pub fn decode_index<R: BitRead>(r: &mut R) -> Result<u32> {
    if r.read_bits(1)? == 0 {
        return Ok(0);
    }
    Ok(r.read_bits(16)? as u32)
}

pub fn estimate_index(index: u32) -> u32 {
    if index == 0 { 1 } else { 17 }
}

// ---------------------------------------------------------------------------
// Byte arrays
// ---------------------------------------------------------------------------

/// Maximum encodable array length (5-bit offset/length fields).
pub const MAX_ARRAY_LEN: usize = 32;

/// Encode a byte array with the float-style zero trim but 5-bit fields.
/// An empty or all-zero array emits the single marker bit; the decoder
/// returns it as an empty vector (delta semantics: unchanged relative to
/// the reference). Trailing zero elements are not representable.
pub fn encode_bytes<W: BitWrite>(w: &mut W, arr: &[u8]) -> Result<()> {
    if arr.len() > MAX_ARRAY_LEN {
        return Err(Error::ValueOutOfRange {
            what: format!("array of {} exceeds {MAX_ARRAY_LEN} elements", arr.len()),
        });
    }
    let Some(first) = arr.iter().position(|&b| b != 0) else {
        return w.write_bits(0, 1);
    };
    let last = arr.len() - 1 - arr.iter().rev().position(|&b| b != 0).unwrap_or(0);
    w.write_bits(1, 1)?;
    w.write_bits(first as u64, 5)?;
    w.write_bits((last - first) as u64, 5)?;
    for &b in &arr[first..=last] {
        w.write_bits(u64::from(b), 8)?;
    }
    Ok(())
}

pub fn decode_bytes<R: BitRead>(r: &mut R) -> Result<Vec<u8>> {
    if r.read_bits(1)? == 0 {
        return Ok(Vec::new());
    }
    let first = r.read_bits(5)? as usize;
    let count = r.read_bits(5)? as usize;
    let mut out = vec![0u8; first + count + 1];
    for slot in out.iter_mut().skip(first) {
        *slot = r.read_bits(8)? as u8;
    }
    Ok(out)
}

pub fn estimate_bytes(arr: &[u8]) -> u32 {
    let Some(first) = arr.iter().position(|&b| b != 0) else {
        return 1;
    };
    let last = arr.len() - 1 - arr.iter().rev().position(|&b| b != 0).unwrap_or(0);
    11 + (last - first + 1) as u32 * 8
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitBuffer;

    fn int_roundtrip(value: i64, width: IntWidth) {
        let mut buf = BitBuffer::new();
        let before = buf.bit_len();
        encode_int(&mut buf, value, width).unwrap();
        assert_eq!(
            buf.bit_len() - before,
            u64::from(estimate_int(value, width)),
            "estimate drift for {value} ({width:?})"
        );
        buf.rewind();
        assert_eq!(decode_int(&mut buf, width).unwrap(), value);
    }

    #[test]
    fn int_representative_values() {
        for width in [IntWidth::W16, IntWidth::W32, IntWidth::W64] {
            for v in [0i64, 1, -1, 127, -128, 128, -129, 300, -300] {
                int_roundtrip(v, width);
            }
        }
        int_roundtrip(i16::MAX as i64, IntWidth::W16);
        int_roundtrip(i16::MIN as i64, IntWidth::W16);
        int_roundtrip(i32::MAX as i64, IntWidth::W32);
        int_roundtrip(i32::MIN as i64, IntWidth::W32);
        int_roundtrip(i64::MAX, IntWidth::W64);
        int_roundtrip(i64::MIN, IntWidth::W64);
    }

    #[test]
    fn int_out_of_width_is_rejected() {
        let mut buf = BitBuffer::new();
        assert!(encode_int(&mut buf, 40_000, IntWidth::W16).is_err());
        assert!(encode_int(&mut buf, 1 << 40, IntWidth::W32).is_err());
        assert!(encode_int(&mut buf, -40_000, IntWidth::W16).is_err());
    }

    fn float_roundtrip(bits: u64) {
        let mut buf = BitBuffer::new();
        let before = buf.bit_len();
        encode_float(&mut buf, bits).unwrap();
        assert_eq!(
            buf.bit_len() - before,
            u64::from(estimate_float(bits)),
            "estimate drift for {bits:#018x}"
        );
        buf.rewind();
        assert_eq!(decode_float(&mut buf).unwrap(), bits);
    }

    #[test]
    fn float_representative_patterns() {
        for v in [
            0.0f64,
            1.0,
            -1.0,
            101.25,
            f64::MAX,
            f64::MIN_POSITIVE,
            f64::INFINITY,
        ] {
            float_roundtrip(v.to_bits());
        }
        // XOR residues with zero runs on either end.
        float_roundtrip(0x0000_FF00_0000_0000);
        float_roundtrip(0x0000_0000_0000_0001);
        float_roundtrip(0xFF00_0000_0000_0000);
        float_roundtrip(u64::MAX);
    }

    #[test]
    fn float_xor_delta_is_involutive() {
        let a = 101.25f64.to_bits();
        let b = 101.26f64.to_bits();
        let mut buf = BitBuffer::new();
        encode_float(&mut buf, a ^ b).unwrap();
        buf.rewind();
        let delta = decode_float(&mut buf).unwrap();
        assert_eq!(delta ^ a, b);
    }

    #[test]
    fn index_roundtrips_and_bounds() {
        for idx in [0u32, 1, 255, 65_535] {
            let mut buf = BitBuffer::new();
            let before = buf.bit_len();
            encode_index(&mut buf, idx).unwrap();
            assert_eq!(buf.bit_len() - before, u64::from(estimate_index(idx)));
            buf.rewind();
            assert_eq!(decode_index(&mut buf).unwrap(), idx);
        }
        let mut buf = BitBuffer::new();
        assert!(encode_index(&mut buf, 1 << 16).is_err());
    }

    fn bytes_roundtrip(arr: &[u8], expect: &[u8]) {
        let mut buf = BitBuffer::new();
        let before = buf.bit_len();
        encode_bytes(&mut buf, arr).unwrap();
        assert_eq!(
            buf.bit_len() - before,
            u64::from(estimate_bytes(arr)),
            "estimate drift for {arr:?}"
        );
        buf.rewind();
        assert_eq!(decode_bytes(&mut buf).unwrap(), expect);
    }

    #[test]
    fn bytes_trim_scheme() {
        bytes_roundtrip(&[], &[]);
        bytes_roundtrip(&[0, 0, 0], &[]);
        bytes_roundtrip(&[1, 2, 3], &[1, 2, 3]);
        bytes_roundtrip(&[0, 0, 5, 9], &[0, 0, 5, 9]);
        // Trailing zeros are trimmed away.
        bytes_roundtrip(&[7, 0, 0], &[7]);
        bytes_roundtrip(&[0, 3, 0], &[0, 3]);
        let full: Vec<u8> = (1..=32).collect();
        bytes_roundtrip(&full, &full);
    }

    #[test]
    fn bytes_too_long_is_rejected() {
        let mut buf = BitBuffer::new();
        assert!(encode_bytes(&mut buf, &[1u8; 33]).is_err());
    }
}
