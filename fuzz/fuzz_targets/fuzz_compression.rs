#![no_main]

use craft_protocol::utils::compression::{compress, decompress};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Round trip must hold for any input
    if let Ok(compressed) = compress(data, 6) {
        let out = decompress(&compressed, data.len()).expect("round trip");
        assert_eq!(out, data);
    }

    // Raw input as a compressed body with a declared length taken from it
    if let Some((&hint, rest)) = data.split_first() {
        let _ = decompress(rest, usize::from(hint) * 64);
    }
});
