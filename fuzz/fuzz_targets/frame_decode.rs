#![no_main]

use exthost_rpc::{encode_frame, FrameDecoder, RpcMessage};
use libfuzzer_sys::fuzz_target;

const MAX_FRAMES: usize = 64;

/// Feeds `data` in chunks of `step` bytes. The flag reports a decode error.
fn decode_chunked(data: &[u8], step: usize) -> (Vec<String>, bool) {
    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    for chunk in data.chunks(step) {
        decoder.push(chunk);
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(_) => return (frames, true),
            }
            if frames.len() >= MAX_FRAMES {
                return (frames, false);
            }
        }
    }
    (frames, false)
}

fuzz_target!(|data: &[u8]| {
    let Some((&seed, rest)) = data.split_first() else {
        return;
    };

    let (frames, failed) = decode_chunked(rest, usize::from(seed % 31) + 1);
    let (whole, whole_failed) = decode_chunked(rest, rest.len().max(1));
    if !failed && !whole_failed {
        assert_eq!(frames, whole, "chunking changed the decoded frames");
    }

    for frame in &frames {
        let _ = serde_json::from_str::<RpcMessage>(frame);

        let mut decoder = FrameDecoder::new();
        decoder.push(&encode_frame(frame));
        assert_eq!(decoder.next_frame(), Ok(Some(frame.clone())));
        assert_eq!(decoder.buffered(), 0);
    }
});
