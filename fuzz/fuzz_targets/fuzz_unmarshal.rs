#![no_main]

use bytes::Bytes;
use leafnet::protocol::{MsgProcessor, Processor};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut processor = MsgProcessor::new();
    let _ = processor.register::<(u32, String)>(1);
    let _ = processor.register::<Vec<u8>>(2);

    // malformed envelopes must come back as errors
    let _ = processor.unmarshal(Bytes::copy_from_slice(data));
});
