#![no_main]

use libfuzzer_sys::fuzz_target;
use netconduit_protocol::codec::FrameBuffer;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    // First byte picks the chunk size used to feed the rest
    let chunk = usize::from(data[0]).max(1);
    let mut buffer = FrameBuffer::with_max_message_size(64 * 1024);

    for piece in data[1..].chunks(chunk) {
        buffer.feed(piece);
        if buffer.decode_all().is_err() {
            break;
        }
    }
});
