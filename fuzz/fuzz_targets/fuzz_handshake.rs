#![no_main]

use bytes::Bytes;
use craft_protocol::core::codec::Frame;
use craft_protocol::core::phase::Phase;
use craft_protocol::protocol::{PayloadCodec, StandardCodec};
use libfuzzer_sys::fuzz_target;

const PHASES: [Phase; 4] = [Phase::Handshake, Phase::Status, Phase::Login, Phase::Play];

fuzz_target!(|data: &[u8]| {
    // Payload decoding for every phase and a fuzzer-chosen packet id
    if data.len() < 2 {
        return;
    }
    let phase = PHASES[usize::from(data[0]) % PHASES.len()];
    let id = i32::from(data[1] & 0x3F);
    let frame = Frame::new(id, Bytes::copy_from_slice(&data[2..]));
    let _ = StandardCodec.decode(phase, frame);
});
