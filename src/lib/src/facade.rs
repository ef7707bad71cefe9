//! Verification entry point
//!
//! A [`Verifier`] is built for one [`VerificationMode`] and keeps it for its
//! whole life. Every call is audited and counted; neither can change the
//! result.

use crate::audit;
use crate::envelope::EnvelopeCodec;
use crate::error::SVError;
use crate::keyed::KeyedVerifier;
use crate::keyless::{KeylessOutcome, KeylessVerifier, VerificationPolicy};
use crate::metrics::global_metrics;
use crate::signature::{sha256_hex, KeyLookup};
use crate::trust_root::TrustRootProvider;
use std::sync::Arc;
use std::time::Instant;

/// Trust model a verifier was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationMode {
    /// Sigstore bundles, anchored in a transparency-log-backed trust root
    Keyless,
    /// DSSE envelopes, anchored in locally known keys
    Keyed,
}

impl VerificationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationMode::Keyless => "keyless",
            VerificationMode::Keyed => "keyed",
        }
    }
}

impl std::fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signer whose signature was verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Key identifier from the envelope
    pub identifier: String,
    pub verified: bool,
    /// Fingerprint of the key that verified the signature
    pub fingerprint: Option<String>,
}

#[derive(Debug)]
enum Backend {
    Keyless(KeylessVerifier),
    Keyed(KeyedVerifier),
}

/// Mode-dispatching verifier.
#[derive(Debug)]
pub struct Verifier {
    backend: Backend,
}

impl Verifier {
    pub fn keyless(provider: Arc<TrustRootProvider>, policy: VerificationPolicy) -> Self {
        Self::from_keyless(KeylessVerifier::new(provider, policy))
    }

    pub fn from_keyless(verifier: KeylessVerifier) -> Self {
        Self {
            backend: Backend::Keyless(verifier),
        }
    }

    pub fn keyed(lookup: Arc<dyn KeyLookup>, codec: EnvelopeCodec) -> Self {
        Self {
            backend: Backend::Keyed(KeyedVerifier::new(lookup, codec)),
        }
    }

    pub fn mode(&self) -> VerificationMode {
        match self.backend {
            Backend::Keyless(_) => VerificationMode::Keyless,
            Backend::Keyed(_) => VerificationMode::Keyed,
        }
    }

    /// Verify `payload`: a Sigstore bundle in keyless mode, a DSSE envelope
    /// in keyed mode.
    ///
    /// Keyless success returns an empty list; the signer identity lives in
    /// the certificate. Keyed success returns one identity per signature.
    pub fn verify(&self, payload: &[u8]) -> Result<Vec<VerifiedIdentity>, SVError> {
        self.dispatch(payload, None)
    }

    /// Like [`verify`](Self::verify), giving up on the keyless trust root
    /// fetch at `deadline`. Keyed verification never blocks and ignores it.
    pub fn verify_with_deadline(
        &self,
        payload: &[u8],
        deadline: Instant,
    ) -> Result<Vec<VerifiedIdentity>, SVError> {
        self.dispatch(payload, Some(deadline))
    }

    /// Verify a Sigstore bundle and return the details of the signer.
    ///
    /// Audited and counted like [`verify`](Self::verify). Fails with
    /// [`SVError::InvalidArgument`] on a keyed verifier.
    pub fn verify_keyless(
        &self,
        payload: &[u8],
        deadline: Option<Instant>,
    ) -> Result<KeylessOutcome, SVError> {
        let Backend::Keyless(verifier) = &self.backend else {
            return Err(SVError::InvalidArgument(
                "Verifier was built for keyed mode".to_string(),
            ));
        };
        self.audited(payload, |_| Vec::new(), || keyless(verifier, payload, deadline))
    }

    fn dispatch(
        &self,
        payload: &[u8],
        deadline: Option<Instant>,
    ) -> Result<Vec<VerifiedIdentity>, SVError> {
        let identifiers = |ids: &Vec<VerifiedIdentity>| -> Vec<String> {
            ids.iter().map(|i| i.identifier.clone()).collect()
        };
        self.audited(payload, identifiers, || match &self.backend {
            Backend::Keyless(verifier) => keyless(verifier, payload, deadline).map(|_| Vec::new()),
            Backend::Keyed(verifier) => verifier.verify(payload),
        })
    }

    fn audited<T>(
        &self,
        payload: &[u8],
        identifiers: impl FnOnce(&T) -> Vec<String>,
        run: impl FnOnce() -> Result<T, SVError>,
    ) -> Result<T, SVError> {
        let mode = self.mode().as_str();
        let correlation_id = audit::new_correlation_id();
        let digest = format!("sha256:{}", sha256_hex(payload));
        let metrics = global_metrics();
        let timer = metrics.start(mode);

        audit::log_verification_attempt(&correlation_id, mode, &digest);

        let result = run();

        match &result {
            Ok(value) => {
                audit::log_verification_success(&correlation_id, mode, &digest, &identifiers(value));
                metrics.record_success(timer);
            }
            Err(e) => {
                audit::log_verification_failure(
                    &correlation_id,
                    mode,
                    &digest,
                    e.kind(),
                    &e.to_string(),
                );
                metrics.record_failure(timer, e.kind());
            }
        }

        result
    }
}

fn keyless(
    verifier: &KeylessVerifier,
    payload: &[u8],
    deadline: Option<Instant>,
) -> Result<KeylessOutcome, SVError> {
    let outcome = match deadline {
        Some(deadline) => verifier.verify_with_deadline(payload, deadline)?,
        None => verifier.verify(payload)?,
    };
    log::info!(
        "Keyless bundle verified ({} log entries, authority {})",
        outcome.entries.len(),
        outcome.authority
    );
    Ok(outcome)
}
