#![no_main]
use libfuzzer_sys::fuzz_target;
use recdelta::engine::{self, DecodeOptions, EncodeOptions};
use recdelta::record::RawValue;

fuzz_target!(|data: &[u8]| {
    // Interpret the input as a record series; the roundtrip must be exact.
    let mut rows = Vec::new();
    for chunk in data.chunks_exact(8).take(200) {
        let symbol = format!("S{}", chunk[0] % 4);
        let close = f64::from(u16::from_le_bytes([chunk[1], chunk[2]])) / 4.0;
        let volume = i64::from(i32::from_le_bytes([chunk[3], chunk[4], chunk[5], 0]));
        let mut row = vec![
            ("data.symbol".to_string(), RawValue::Str(symbol)),
            ("data.close".to_string(), RawValue::Float(close)),
            ("data.volume".to_string(), RawValue::Int(volume)),
        ];
        if chunk[6] & 1 != 0 {
            // Trailing zero elements are not representable, so the last
            // array byte is forced odd.
            row.push((
                "data.tag".to_string(),
                RawValue::Bytes(vec![chunk[6], chunk[7] | 1]),
            ));
        }
        rows.push(row);
    }

    let stages = 1 + (data.first().copied().unwrap_or(0) & 1);
    let opts = EncodeOptions {
        stages,
        ..Default::default()
    };
    let (bytes, _) =
        engine::encode_records("data.symbol", rows.clone(), &opts).expect("encode failed");
    let decoded =
        engine::decode_pairs(&bytes, &DecodeOptions::default()).expect("decode failed");
    assert_eq!(decoded, rows);
});
