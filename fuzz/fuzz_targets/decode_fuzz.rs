#![no_main]
use libfuzzer_sys::fuzz_target;
use recdelta::engine::{DecodeOptions, Decoder};

fuzz_target!(|data: &[u8]| {
    // The decoder must never panic on arbitrary bytes — only return errors.
    if let Ok(mut dec) = Decoder::from_bytes(data, &DecodeOptions::default()) {
        let _ = dec.read_pairs();
    }

    // The headerless streaming framing takes a different read path.
    let mut dec = Decoder::from_reader(data, &DecodeOptions::default());
    let _ = dec.read_all();
});
