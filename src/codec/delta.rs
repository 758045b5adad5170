// Per-type delta operators and their inverses.
//
// Integer deltas wrap at the field's wire width so the residue always fits
// the encoder; reconstruction wraps back, exact for in-range inputs. Float
// and array deltas are bitwise XOR, which is its own inverse. The string
// operator is not a reversible diff: it emits the null/unchanged marker for
// equal indices and otherwise the current index verbatim, so the decoder
// must already hold the reference value.
//
// Dispatch is by field type; operands whose stored forms do not match the
// type indicate a schema-hash collision and return `None`, which the
// caller maps to a schema mismatch.

use crate::record::{FieldType, Stored};

/// `ours − theirs` under the type's delta semantics.
pub fn apply(ty: FieldType, ours: &Stored, theirs: &Stored) -> Option<Stored> {
    match (ty, ours, theirs) {
        (FieldType::Date, Stored::Int(a), Stored::Int(b)) => {
            Some(Stored::Int((*a as i16).wrapping_sub(*b as i16) as i64))
        }
        (FieldType::Int32, Stored::Int(a), Stored::Int(b)) => {
            Some(Stored::Int((*a as i32).wrapping_sub(*b as i32) as i64))
        }
        (FieldType::Timestamp, Stored::Int(a), Stored::Int(b)) => {
            Some(Stored::Int(a.wrapping_sub(*b)))
        }
        (FieldType::Float64, Stored::Bits(a), Stored::Bits(b)) => Some(Stored::Bits(a ^ b)),
        (FieldType::Str, Stored::Index(a), Stored::Index(b)) => {
            Some(Stored::Index(if a == b { 0 } else { *a }))
        }
        (FieldType::Array, Stored::Bytes(a), Stored::Bytes(b)) => {
            let shared = a.len().min(b.len());
            let mut out = Vec::with_capacity(a.len());
            for i in 0..shared {
                out.push(a[i] ^ b[i]);
            }
            out.extend_from_slice(&a[shared..]);
            Some(Stored::Bytes(out))
        }
        _ => None,
    }
}

/// Reconstruct `ours` from a delta and its reference record's value.
pub fn invert(ty: FieldType, delta: &Stored, reference: &Stored) -> Option<Stored> {
    match (ty, delta, reference) {
        (FieldType::Date, Stored::Int(d), Stored::Int(r)) => {
            Some(Stored::Int((*d as i16).wrapping_add(*r as i16) as i64))
        }
        (FieldType::Int32, Stored::Int(d), Stored::Int(r)) => {
            Some(Stored::Int((*d as i32).wrapping_add(*r as i32) as i64))
        }
        (FieldType::Timestamp, Stored::Int(d), Stored::Int(r)) => {
            Some(Stored::Int(d.wrapping_add(*r)))
        }
        (FieldType::Float64, Stored::Bits(d), Stored::Bits(r)) => Some(Stored::Bits(d ^ r)),
        (FieldType::Str, Stored::Index(d), Stored::Index(r)) => {
            // Marker 0 means "unchanged"; a genuine index 0 that differs
            // from the reference aliases it (known format limitation).
            Some(Stored::Index(if *d == 0 { *r } else { *d }))
        }
        (FieldType::Array, Stored::Bytes(d), Stored::Bytes(r)) => {
            // The encoder trims trailing zeros off the residue, so the
            // reference supplies the unchanged tail; a residue longer than
            // the reference carries its own tail.
            let shared = d.len().min(r.len());
            let mut out = Vec::with_capacity(d.len().max(r.len()));
            for i in 0..shared {
                out.push(d[i] ^ r[i]);
            }
            if d.len() > shared {
                out.extend_from_slice(&d[shared..]);
            } else {
                out.extend_from_slice(&r[shared..]);
            }
            Some(Stored::Bytes(out))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(ty: FieldType, ours: Stored, theirs: Stored) {
        let d = apply(ty, &ours, &theirs).expect("delta");
        let back = invert(ty, &d, &theirs).expect("invert");
        assert_eq!(back, ours, "{ty:?} delta not invertible");
    }

    #[test]
    fn int_deltas_invert() {
        roundtrip(FieldType::Int32, Stored::Int(1050), Stored::Int(1000));
        roundtrip(FieldType::Int32, Stored::Int(-7), Stored::Int(9));
        roundtrip(FieldType::Date, Stored::Int(19_700), Stored::Int(19_699));
        roundtrip(
            FieldType::Timestamp,
            Stored::Int(1_700_000_000_123_456),
            Stored::Int(1_700_000_000_000_000),
        );
    }

    #[test]
    fn int_deltas_wrap_at_field_width() {
        // The residue of two in-range i32 values always fits 32 bits.
        let d = apply(
            FieldType::Int32,
            &Stored::Int(i32::MAX as i64),
            &Stored::Int(i32::MIN as i64),
        )
        .unwrap();
        let Stored::Int(v) = d else { panic!() };
        assert!((-(1i64 << 31)..(1i64 << 31)).contains(&v));
        roundtrip(
            FieldType::Int32,
            Stored::Int(i32::MAX as i64),
            Stored::Int(i32::MIN as i64),
        );
    }

    #[test]
    fn float_delta_is_xor() {
        let a = Stored::Bits(101.25f64.to_bits());
        let b = Stored::Bits(101.26f64.to_bits());
        let d = apply(FieldType::Float64, &a, &b).unwrap();
        assert_eq!(invert(FieldType::Float64, &d, &b).unwrap(), a);
        // Equal values leave an all-zero residue.
        assert_eq!(
            apply(FieldType::Float64, &a, &a).unwrap(),
            Stored::Bits(0)
        );
    }

    #[test]
    fn string_delta_marks_equal_values() {
        let d = apply(FieldType::Str, &Stored::Index(4), &Stored::Index(4)).unwrap();
        assert_eq!(d, Stored::Index(0));
        assert_eq!(invert(FieldType::Str, &d, &Stored::Index(4)).unwrap(), Stored::Index(4));

        let d = apply(FieldType::Str, &Stored::Index(9), &Stored::Index(4)).unwrap();
        assert_eq!(d, Stored::Index(9));
        assert_eq!(invert(FieldType::Str, &d, &Stored::Index(4)).unwrap(), Stored::Index(9));
    }

    #[test]
    fn array_delta_xors_shared_prefix_and_keeps_tails() {
        let ours = Stored::Bytes(vec![1, 2, 3, 4, 5]);
        let theirs = Stored::Bytes(vec![1, 2, 9]);
        let d = apply(FieldType::Array, &ours, &theirs).unwrap();
        assert_eq!(d, Stored::Bytes(vec![0, 0, 10, 4, 5]));
        assert_eq!(invert(FieldType::Array, &d, &theirs).unwrap(), ours);
    }

    #[test]
    fn trimmed_array_residue_reconstructs_from_reference_tail() {
        // Equal tails XOR to zero and are trimmed off by the encoder; the
        // inverse takes them back from the reference.
        let reference = Stored::Bytes(vec![8, 8, 7, 7]);
        let trimmed_residue = Stored::Bytes(vec![0, 1]);
        assert_eq!(
            invert(FieldType::Array, &trimmed_residue, &reference).unwrap(),
            Stored::Bytes(vec![8, 9, 7, 7])
        );
        // An empty residue reproduces the reference.
        assert_eq!(
            invert(FieldType::Array, &Stored::Bytes(Vec::new()), &reference).unwrap(),
            reference
        );
    }

    #[test]
    fn mismatched_stored_forms_are_rejected() {
        assert!(apply(FieldType::Float64, &Stored::Int(1), &Stored::Bits(2)).is_none());
        assert!(invert(FieldType::Str, &Stored::Bits(0), &Stored::Index(1)).is_none());
    }
}
