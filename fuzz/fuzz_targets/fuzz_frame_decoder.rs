//! Fuzz target: `FrameDecoder::feed`
//!
//! Drives arbitrary byte sequences into the streaming frame decoder, split
//! at a fuzzer-chosen point, and checks that it never panics, that every
//! frame it yields re-encodes to bytes that decode to the same frame, and
//! that one-shot and split feeding agree.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use arklink::rpc::codec::{FrameDecoder, decode_all, parse_frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let (whole, _) = decode_all(data);

    let split = data.first().map_or(0, |b| *b as usize % (data.len() + 1));
    let mut decoder = FrameDecoder::new();
    let mut pieces = decoder.feed(&data[..split]);
    pieces.extend(decoder.feed(&data[split..]));

    assert_eq!(whole, pieces, "split feeding must match one-shot decoding");

    for frame in &whole {
        let bytes = frame.encode().expect("decoded frame must re-encode");
        let (again, used) = parse_frame(&bytes).expect("re-encoded frame must parse");
        assert_eq!(&again, frame);
        assert_eq!(used, bytes.len());
    }

    decoder.reset();
    assert_eq!(decoder.buffered(), 0);
});
