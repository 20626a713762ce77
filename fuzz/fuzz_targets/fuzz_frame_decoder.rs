#![no_main]

use bytes::BytesMut;
use leafnet::core::codec::FrameCodec;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // first byte picks the prefix width, the rest is the wire stream
    let Some((&selector, stream)) = data.split_first() else {
        return;
    };
    let width = [1, 2, 4][selector as usize % 3];
    let Ok(mut codec) = FrameCodec::new(width, 0, 1 << 16) else {
        return;
    };

    let mut buf = BytesMut::from(stream);
    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        assert!(frame.len() <= 1 << 16);
    }
});
