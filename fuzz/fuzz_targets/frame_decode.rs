//! Fuzz target for inbound frame decoding
//!
//! # Invariants
//!
//! - Arbitrary bytes never panic the decoder
//! - Every decoded frame has a non-empty event name
//! - Decoded frames re-encode and decode to the same frame
//! - Typed payload decoding never panics, whatever the event name

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_proto::{Frame, Payload};

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data) else {
        return;
    };

    assert!(!frame.event.is_empty());

    let _ = Payload::from_frame(&frame);

    // Frames near the size limit may grow when re-encoded (escapes)
    if let Ok(text) = frame.encode() {
        let again = Frame::decode(text.as_bytes()).expect("re-encoded frame must decode");
        assert_eq!(again, frame);
    }
});
