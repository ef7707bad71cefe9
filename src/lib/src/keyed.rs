//! Key-based envelope verification
//!
//! Every signature of a DSSE envelope is checked, in envelope order, against
//! the key its `keyid` resolves to. The first signature that cannot be
//! verified fails the whole envelope; later signatures are not looked at.

use crate::audit;
use crate::envelope::{Envelope, EnvelopeCodec};
use crate::error::SVError;
use crate::facade::VerifiedIdentity;
use crate::metrics::global_metrics;
use crate::signature::{self, KeyLookup};
use std::sync::Arc;

/// Verifies DSSE envelopes with keys from a [`KeyLookup`].
pub struct KeyedVerifier {
    lookup: Arc<dyn KeyLookup>,
    codec: EnvelopeCodec,
}

impl std::fmt::Debug for KeyedVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedVerifier")
            .field("codec", &self.codec)
            .finish()
    }
}

impl KeyedVerifier {
    pub fn new(lookup: Arc<dyn KeyLookup>, codec: EnvelopeCodec) -> Self {
        Self { lookup, codec }
    }

    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    /// Parse `envelope_json` and verify every signature.
    ///
    /// An envelope without signatures verifies to an empty list.
    pub fn verify(&self, envelope_json: &[u8]) -> Result<Vec<VerifiedIdentity>, SVError> {
        let envelope = self.codec.parse(envelope_json)?;
        self.verify_envelope(&envelope)
    }

    /// Verify the signatures of an already parsed envelope.
    pub fn verify_envelope(&self, envelope: &Envelope) -> Result<Vec<VerifiedIdentity>, SVError> {
        if envelope.signatures.is_empty() {
            log::debug!("Envelope has no signatures, nothing to verify");
            return Ok(Vec::new());
        }

        let message = envelope.pae();
        let mut identities = Vec::with_capacity(envelope.signatures.len());

        for (i, sig) in envelope.signatures.iter().enumerate() {
            let key = self.lookup.find(&sig.key_id).map_err(|e| {
                log::error!("Signature {}: no trusted key for {}", i, sig.key_id);
                audit::log_signature_rejected(&sig.key_id, "", e.kind());
                global_metrics().record_signature_rejected();
                e
            })?;
            let fingerprint = key.fingerprint();

            if let Err(e) =
                signature::verify(&key.public_key, key.algorithm_hint, &message, &sig.sig)
            {
                log::error!(
                    "Signature {} by {} (key {}) rejected: {}",
                    i,
                    sig.key_id,
                    fingerprint,
                    e
                );
                audit::log_signature_rejected(&sig.key_id, &fingerprint, e.kind());
                global_metrics().record_signature_rejected();
                return Err(e);
            }

            log::debug!("Signature {} by {} verified", i, sig.key_id);
            identities.push(VerifiedIdentity {
                identifier: sig.key_id.clone(),
                verified: true,
                fingerprint: Some(fingerprint),
            });
        }

        Ok(identities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{HashAlgorithm, MemoryKeyLookup, PublicKey, TrustedKey};
    use p256::ecdsa::signature::Signer;
    use p256::ecdsa::SigningKey;
    use std::sync::Mutex;

    fn p256_key(seed: u8) -> (SigningKey, PublicKey) {
        let sk = SigningKey::from_slice(&[seed; 32]).unwrap();
        let pk = PublicKey::from_p256(p256::ecdsa::VerifyingKey::from(&sk)).unwrap();
        (sk, pk)
    }

    fn sign(sk: &SigningKey, envelope: &Envelope) -> Vec<u8> {
        let sig: p256::ecdsa::Signature = sk.sign(&envelope.pae());
        sig.to_der().as_bytes().to_vec()
    }

    /// Records every key id it is asked for
    struct RecordingLookup {
        inner: MemoryKeyLookup,
        asked: Mutex<Vec<String>>,
    }

    impl KeyLookup for RecordingLookup {
        fn find(&self, key_id: &str) -> Result<TrustedKey, SVError> {
            self.asked.lock().unwrap().push(key_id.to_string());
            self.inner.find(key_id)
        }
    }

    #[test]
    fn test_all_signatures_valid() {
        let (sk1, pk1) = p256_key(1);
        let (sk2, pk2) = p256_key(2);
        let unsigned = Envelope::new("example", b"hello".to_vec());
        let envelope = unsigned
            .clone()
            .with_signature("k1", sign(&sk1, &unsigned))
            .with_signature("k2", sign(&sk2, &unsigned));
        let lookup = MemoryKeyLookup::new().with_key("k1", pk1.clone()).with_key("k2", pk2);

        let verifier = KeyedVerifier::new(Arc::new(lookup), EnvelopeCodec::default());
        let identities = verifier.verify_envelope(&envelope).unwrap();
        assert_eq!(identities.len(), 2);
        assert_eq!(identities[0].identifier, "k1");
        assert!(identities[0].verified);
        assert_eq!(identities[0].fingerprint.as_deref(), Some(pk1.fingerprint().as_str()));
        assert_eq!(identities[1].identifier, "k2");
    }

    #[test]
    fn test_fail_fast_on_first_invalid_signature() {
        let (sk1, pk1) = p256_key(1);
        let (sk2, pk2) = p256_key(2);
        let unsigned = Envelope::new("example", b"hello".to_vec());
        let mut bad = sign(&sk1, &unsigned);
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        let envelope = unsigned
            .clone()
            .with_signature("k1", bad)
            .with_signature("k2", sign(&sk2, &unsigned));

        let lookup = Arc::new(RecordingLookup {
            inner: MemoryKeyLookup::new().with_key("k1", pk1).with_key("k2", pk2),
            asked: Mutex::new(Vec::new()),
        });
        let verifier = KeyedVerifier::new(lookup.clone(), EnvelopeCodec::default());

        let err = verifier.verify_envelope(&envelope).unwrap_err();
        assert!(matches!(err, SVError::SignatureInvalid(_)));
        assert_eq!(*lookup.asked.lock().unwrap(), vec!["k1".to_string()]);
    }

    #[test]
    fn test_unknown_key_stops_verification() {
        let (sk1, pk1) = p256_key(1);
        let unsigned = Envelope::new("example", b"hello".to_vec());
        let envelope = unsigned
            .clone()
            .with_signature("unknown", vec![0u8; 64])
            .with_signature("k1", sign(&sk1, &unsigned));
        let verifier = KeyedVerifier::new(
            Arc::new(MemoryKeyLookup::new().with_key("k1", pk1)),
            EnvelopeCodec::default(),
        );
        assert!(matches!(
            verifier.verify_envelope(&envelope),
            Err(SVError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_algorithm_hint_fails_closed() {
        let (sk1, pk1) = p256_key(1);
        let unsigned = Envelope::new("example", b"hello".to_vec());
        let envelope = unsigned.clone().with_signature("k1", sign(&sk1, &unsigned));

        let mut lookup = MemoryKeyLookup::new();
        lookup.insert_trusted(TrustedKey::new("k1", pk1).with_algorithm_hint(HashAlgorithm::Sha384));
        let verifier = KeyedVerifier::new(Arc::new(lookup), EnvelopeCodec::default());
        assert!(matches!(
            verifier.verify_envelope(&envelope),
            Err(SVError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_signature_over_raw_payload_is_rejected() {
        let (sk1, pk1) = p256_key(1);
        let sig: p256::ecdsa::Signature = sk1.sign(b"hello");
        let envelope =
            Envelope::new("example", b"hello".to_vec()).with_signature("k1", sig.to_der().as_bytes().to_vec());
        let verifier = KeyedVerifier::new(
            Arc::new(MemoryKeyLookup::new().with_key("k1", pk1)),
            EnvelopeCodec::default(),
        );
        assert!(matches!(
            verifier.verify_envelope(&envelope),
            Err(SVError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_empty_and_malformed_envelopes() {
        let verifier = KeyedVerifier::new(Arc::new(MemoryKeyLookup::new()), EnvelopeCodec::default());
        let json = br#"{"payloadType":"example","payload":"aGVsbG8=","signatures":[]}"#;
        assert!(verifier.verify(json).unwrap().is_empty());

        assert!(matches!(
            verifier.verify(br#"{"payloadType":"example"}"#),
            Err(SVError::MalformedEnvelope(_))
        ));
    }
}
