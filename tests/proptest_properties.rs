use proptest::prelude::*;
use recdelta::bits::{BitBuffer, BitRead, BitWrite};
use recdelta::codec::value::{self, IntWidth};
use recdelta::codec::delta;
use recdelta::engine::{self, DecodeOptions, EncodeOptions};
use recdelta::record::{FieldType, RawValue, Stored};

fn mask(n: u32) -> u64 {
    if n == 64 { u64::MAX } else { (1u64 << n) - 1 }
}

proptest! {
    #[test]
    fn prop_bit_writes_roundtrip_masked(
        writes in proptest::collection::vec((any::<u64>(), 1u32..=64), 1..64)
    ) {
        let mut buf = BitBuffer::new();
        for &(value, n) in &writes {
            buf.write_bits(value, n).unwrap();
        }
        // Serialization keeps the exact bit length through the pad header.
        let mut restored = BitBuffer::from_bytes(&buf.to_bytes()).unwrap();
        for &(value, n) in &writes {
            prop_assert_eq!(restored.read_bits(n).unwrap(), value & mask(n));
        }
        prop_assert_eq!(restored.remaining_bits(), 0);
    }

    #[test]
    fn prop_int_roundtrip_w16(value in -(1i64 << 15)..(1i64 << 15)) {
        int_roundtrip(value, IntWidth::W16)?;
    }

    #[test]
    fn prop_int_roundtrip_w32(value in any::<i32>()) {
        int_roundtrip(i64::from(value), IntWidth::W32)?;
    }

    #[test]
    fn prop_int_roundtrip_w64(value in any::<i64>()) {
        int_roundtrip(value, IntWidth::W64)?;
    }

    #[test]
    fn prop_float_roundtrip(bits in any::<u64>()) {
        let mut buf = BitBuffer::new();
        let before = buf.bit_len();
        value::encode_float(&mut buf, bits).unwrap();
        prop_assert_eq!(
            buf.bit_len() - before,
            u64::from(value::estimate_float(bits))
        );
        buf.rewind();
        prop_assert_eq!(value::decode_float(&mut buf).unwrap(), bits);
    }

    #[test]
    fn prop_index_roundtrip(index in 0u32..(1 << 16)) {
        let mut buf = BitBuffer::new();
        let before = buf.bit_len();
        value::encode_index(&mut buf, index).unwrap();
        prop_assert_eq!(
            buf.bit_len() - before,
            u64::from(value::estimate_index(index))
        );
        buf.rewind();
        prop_assert_eq!(value::decode_index(&mut buf).unwrap(), index);
    }

    #[test]
    fn prop_bytes_roundtrip_trims_trailing_zeros(
        arr in proptest::collection::vec(any::<u8>(), 0..=32)
    ) {
        let mut buf = BitBuffer::new();
        let before = buf.bit_len();
        value::encode_bytes(&mut buf, &arr).unwrap();
        prop_assert_eq!(
            buf.bit_len() - before,
            u64::from(value::estimate_bytes(&arr))
        );
        buf.rewind();
        let expected = match arr.iter().rposition(|&b| b != 0) {
            Some(last) => arr[..=last].to_vec(),
            None => Vec::new(),
        };
        prop_assert_eq!(value::decode_bytes(&mut buf).unwrap(), expected);
    }

    #[test]
    fn prop_int_delta_inverts(a in any::<i32>(), b in any::<i32>()) {
        let ours = Stored::Int(i64::from(a));
        let theirs = Stored::Int(i64::from(b));
        let d = delta::apply(FieldType::Int32, &ours, &theirs).unwrap();
        prop_assert_eq!(
            delta::invert(FieldType::Int32, &d, &theirs).unwrap(),
            ours
        );
    }

    #[test]
    fn prop_float_delta_inverts(a in any::<u64>(), b in any::<u64>()) {
        let ours = Stored::Bits(a);
        let theirs = Stored::Bits(b);
        let d = delta::apply(FieldType::Float64, &ours, &theirs).unwrap();
        prop_assert_eq!(
            delta::invert(FieldType::Float64, &d, &theirs).unwrap(),
            ours
        );
    }

    #[test]
    fn prop_index_delta_inverts(a in 1u32..(1 << 16), b in 1u32..(1 << 16)) {
        let ours = Stored::Index(a);
        let theirs = Stored::Index(b);
        let d = delta::apply(FieldType::Str, &ours, &theirs).unwrap();
        prop_assert_eq!(
            delta::invert(FieldType::Str, &d, &theirs).unwrap(),
            ours
        );
    }

    #[test]
    fn prop_array_delta_inverts(
        pairs in proptest::collection::vec((any::<u8>(), any::<u8>()), 0..=32)
    ) {
        let (a, b): (Vec<u8>, Vec<u8>) = pairs.into_iter().unzip();
        let ours = Stored::Bytes(a);
        let theirs = Stored::Bytes(b);
        let d = delta::apply(FieldType::Array, &ours, &theirs).unwrap();
        prop_assert_eq!(
            delta::invert(FieldType::Array, &d, &theirs).unwrap(),
            ours
        );
    }

    #[test]
    fn prop_engine_roundtrip(
        rows in proptest::collection::vec(
            (any::<bool>(), 0u32..1_000_000, 0i32..2_000_000),
            0..40
        ),
        stages in 1u8..=2
    ) {
        let records: Vec<Vec<(String, RawValue)>> = rows
            .iter()
            .map(|&(which, cents, volume)| {
                let symbol = if which { "ACME" } else { "GLOBEX" };
                vec![
                    ("data.symbol".to_string(), RawValue::Str(symbol.to_string())),
                    ("data.close".to_string(), RawValue::Float(f64::from(cents) / 100.0)),
                    ("data.volume".to_string(), RawValue::Int(i64::from(volume))),
                ]
            })
            .collect();

        let opts = EncodeOptions { stages, ..Default::default() };
        let (bytes, _) =
            engine::encode_records("data.symbol", records.clone(), &opts).unwrap();
        let decoded = engine::decode_pairs(&bytes, &DecodeOptions::default()).unwrap();
        prop_assert_eq!(decoded, records);
    }
}

fn int_roundtrip(value: i64, width: IntWidth) -> Result<(), TestCaseError> {
    let mut buf = BitBuffer::new();
    let before = buf.bit_len();
    value::encode_int(&mut buf, value, width).unwrap();
    prop_assert_eq!(
        buf.bit_len() - before,
        u64::from(value::estimate_int(value, width))
    );
    buf.rewind();
    prop_assert_eq!(value::decode_int(&mut buf, width).unwrap(), value);
    Ok(())
}

#[test]
#[ignore = "throughput is workload and machine dependent"]
fn perf_encode_not_pathological() {
    use std::time::Instant;
    let records: Vec<Vec<(String, RawValue)>> = (0..50_000)
        .map(|i| {
            vec![
                (
                    "data.symbol".to_string(),
                    RawValue::Str(format!("SYM{}", i % 8)),
                ),
                (
                    "data.close".to_string(),
                    RawValue::Float(100.0 + (i % 97) as f64 * 0.25),
                ),
                ("data.volume".to_string(), RawValue::Int(1_000_000 + i)),
            ]
        })
        .collect();

    let t0 = Instant::now();
    let (bytes, _) =
        engine::encode_records("data.symbol", records, &EncodeOptions::default()).unwrap();
    let dt = t0.elapsed();
    assert!(!bytes.is_empty());
    assert!(dt.as_secs_f64() < 30.0, "encode took {dt:?}");
}
