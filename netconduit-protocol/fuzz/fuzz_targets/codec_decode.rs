#![no_main]

use bytes::BytesMut;
use netconduit_protocol::codec::ConduitCodec;
use netconduit_protocol::validation::{validate_frame, ValidationLimits};
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut codec = ConduitCodec::with_max_message_size(1024 * 1024);
    let mut buf = BytesMut::from(data);

    // Ok(None), Ok(Some(_)) and Err(_) are all fine; panics are not
    if let Ok(Some(frame)) = codec.decode(&mut buf) {
        let _ = validate_frame(&frame, &ValidationLimits::default());
    }
});
