#![no_main]
use libfuzzer_sys::fuzz_target;
use recdelta::cache::{SchemaCache, StringCache};

fuzz_target!(|data: &[u8]| {
    // Cache blobs come off the wire, so arbitrary bytes must restore
    // cleanly or fail with an error.
    let mut strings = StringCache::new();
    let _ = strings.restore(data);

    let mut schemas = SchemaCache::new();
    let _ = schemas.restore(data);

    // Incremental restores across split points must behave the same way.
    if data.len() >= 2 {
        let (a, b) = data.split_at(data.len() / 2);
        let mut strings = StringCache::new();
        let _ = strings.restore(a);
        let _ = strings.restore(b);
        let mut schemas = SchemaCache::new();
        let _ = schemas.restore(a);
        let _ = schemas.restore(b);
    }
});
