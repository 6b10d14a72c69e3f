//! Fuzz target for inbound frame splitting and envelope decoding
//!
//! Feeds arbitrary bytes through the same path the server uses for client
//! input: split length-prefixed frames off a buffer, decode each body as a
//! `ClientEnvelope`.
//!
//! # Invariants
//!
//! - Never panics; malformed input is an error
//! - A split frame never extends past the buffer or the size limit
//! - Every successfully decoded envelope re-encodes and decodes to itself

#![no_main]

use libfuzzer_sys::fuzz_target;
use roomcast_proto::{
    ClientEnvelope, MAX_FRAME_SIZE,
    codec::{LENGTH_PREFIX_SIZE, decode, encode, split_frame},
};

/// Small limit so oversized prefixes are exercised often
const FUZZ_MAX_FRAME: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    let mut rest = data;

    while let Ok(Some((body, consumed))) = split_frame(rest, FUZZ_MAX_FRAME) {
        assert!(consumed <= rest.len());
        assert_eq!(consumed, body.len() + LENGTH_PREFIX_SIZE);
        assert!(body.len() <= FUZZ_MAX_FRAME);

        if let Ok(envelope) = decode::<ClientEnvelope>(body) {
            let mut buf = Vec::new();
            encode(&envelope, &mut buf).expect("decoded envelope re-encodes");
            let (again, _) = split_frame(&buf, MAX_FRAME_SIZE)
                .expect("re-encoded frame splits")
                .expect("re-encoded frame is complete");
            let again: ClientEnvelope = decode(again).expect("re-encoded frame decodes");
            assert_eq!(again, envelope);
        }

        rest = &rest[consumed..];
    }
});
