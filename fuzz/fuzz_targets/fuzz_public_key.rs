//! Fuzz target for public key parsing
//!
//! Covers SPKI DER, PEM and the auto-detecting `from_any`.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sigver::PublicKey;

fuzz_target!(|data: &[u8]| {
    if let Ok(pk) = PublicKey::from_spki_der(data) {
        let reparsed = PublicKey::from_spki_der(pk.spki_der()).expect("SPKI must round-trip");
        assert_eq!(reparsed.fingerprint(), pk.fingerprint());
        let _ = PublicKey::from_pem(&pk.to_pem());
    }

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = PublicKey::from_pem(s);
    }

    let _ = PublicKey::from_any(data);
});
