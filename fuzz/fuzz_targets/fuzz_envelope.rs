//! Fuzz target for DSSE envelope parsing
//!
//! Envelopes arrive from untrusted sources. Parsing must never panic, and
//! every envelope that parses must serialize and parse back to itself.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sigver::EnvelopeCodec;

fuzz_target!(|data: &[u8]| {
    let codec = EnvelopeCodec::default();
    if let Ok(envelope) = codec.parse(data) {
        let _ = envelope.pae();
        if let Ok(json) = codec.serialize(&envelope) {
            let reparsed = codec.parse(&json).expect("serialized envelope must parse");
            assert_eq!(reparsed, envelope);
        }
    }
});
