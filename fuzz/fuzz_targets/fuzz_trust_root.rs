//! Fuzz target for trusted_root.json parsing

#![no_main]

use libfuzzer_sys::fuzz_target;
use sigver::TrustRootMaterial;

fuzz_target!(|data: &[u8]| {
    if let Ok(material) = TrustRootMaterial::from_json(data) {
        for ca in &material.certificate_authorities {
            let _ = ca.root();
            let _ = ca.intermediates();
        }
        for log in &material.transparency_logs {
            let _ = material.find_tlog(&log.log_id);
        }
    }
});
