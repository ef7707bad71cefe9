//! Fuzz target for Sigstore bundle parsing
//!
//! Security concerns:
//! - Integers given as strings or numbers
//! - Base64 decoding of certificates, bodies and proofs
//! - Deeply nested JSON

#![no_main]

use libfuzzer_sys::fuzz_target;
use sigver::keyless::{tlog::Checkpoint, Bundle};

fuzz_target!(|data: &[u8]| {
    if let Ok(bundle) = Bundle::from_json(data) {
        let _ = bundle.version.to_string();
        let _ = bundle.material.certificates();
        let _ = bundle.content.signature();
        for entry in &bundle.tlog_entries {
            if let Some(checkpoint) = entry
                .inclusion_proof
                .as_ref()
                .and_then(|p| p.checkpoint.as_deref())
            {
                let _ = Checkpoint::parse(checkpoint);
            }
        }
    }
});
