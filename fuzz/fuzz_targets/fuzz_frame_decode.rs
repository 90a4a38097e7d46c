#![no_main]

use bytes::BytesMut;
use craft_protocol::core::codec::FrameCodec;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // First byte picks plain or compressed framing; the rest is the stream
    let Some((&mode, stream)) = data.split_first() else {
        return;
    };
    let mut codec = FrameCodec::default();
    if mode & 1 == 1 {
        let _ = codec.enable_compression(usize::from(mode >> 1) + 1, 6);
    }

    let mut buf = BytesMut::from(stream);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
