//! Keyless bundle verification

use crate::envelope::pae;
use crate::error::SVError;
use crate::keyless::bundle::{Bundle, BundleContent, BundleDsse};
use crate::keyless::cert::{self, SignerIdentity};
use crate::keyless::policy::{ArtifactPolicy, IdentityPolicy, VerificationPolicy};
use crate::keyless::tlog::{self, LoggedSignature, VerifiedEntry};
use crate::keyless::{sct, timestamp};
use crate::signature::{self, HashAlgorithm, PublicKey};
use crate::time::{SystemTimeSource, TimeSource};
use crate::trust_root::{TrustRootMaterial, TrustRootProvider};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

/// Details of a verified bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeylessOutcome {
    pub media_type: String,
    /// Identity the signing certificate was issued to
    pub identity: SignerIdentity,
    /// Certificate authority the certificate chains to
    pub authority: String,
    pub entries: Vec<VerifiedEntry>,
    /// Verified observation times the certificate was checked at, log
    /// entries first, then signed timestamps
    pub timestamps: Vec<i64>,
    /// CT logs with a verified SCT for the signing certificate
    pub ct_logs: usize,
}

/// Verifies Sigstore bundles against a trust root.
pub struct KeylessVerifier {
    provider: Arc<TrustRootProvider>,
    policy: VerificationPolicy,
    time_source: Arc<dyn TimeSource>,
}

impl std::fmt::Debug for KeylessVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeylessVerifier")
            .field("provider", &self.provider)
            .field("policy", &self.policy)
            .finish()
    }
}

impl KeylessVerifier {
    pub fn new(provider: Arc<TrustRootProvider>, policy: VerificationPolicy) -> Self {
        if policy.is_relaxed() {
            log::warn!("Keyless policy trusts bundle-reported artifact digest or identity");
        }
        Self {
            provider,
            policy,
            time_source: Arc::new(SystemTimeSource),
        }
    }

    /// Clock used when the policy accepts bundles without a verified timestamp.
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn policy(&self) -> &VerificationPolicy {
        &self.policy
    }

    pub fn provider(&self) -> &Arc<TrustRootProvider> {
        &self.provider
    }

    /// Resolve the trust root, parse `bundle_json` and verify it.
    ///
    /// Trust root failures are returned as is, before the bundle is looked
    /// at. Any check failing after parsing is a
    /// [`SVError::VerificationFailed`].
    pub fn verify(&self, bundle_json: &[u8]) -> Result<KeylessOutcome, SVError> {
        let trust_root = self.provider.resolve()?;
        self.verify_resolved(bundle_json, &trust_root)
    }

    /// Like [`verify`](Self::verify), giving up on the trust root fetch at
    /// `deadline`.
    pub fn verify_with_deadline(
        &self,
        bundle_json: &[u8],
        deadline: Instant,
    ) -> Result<KeylessOutcome, SVError> {
        let trust_root = self.provider.resolve_with_deadline(deadline)?;
        self.verify_resolved(bundle_json, &trust_root)
    }

    fn verify_resolved(
        &self,
        bundle_json: &[u8],
        trust_root: &TrustRootMaterial,
    ) -> Result<KeylessOutcome, SVError> {
        log::debug!("Trust root resolved ({})", trust_root.format_version);
        let bundle = Bundle::from_json(bundle_json)?;
        log::debug!("Parsed {} bundle", bundle.version);
        self.verify_bundle(&bundle, trust_root)
    }

    /// Verify an already parsed bundle against `trust_root`.
    pub fn verify_bundle(
        &self,
        bundle: &Bundle,
        trust_root: &TrustRootMaterial,
    ) -> Result<KeylessOutcome, SVError> {
        self.check_bundle(bundle, trust_root).map_err(|e| match e {
            SVError::VerificationFailed(_) => e,
            other => SVError::VerificationFailed(other.to_string()),
        })
    }

    fn check_bundle(
        &self,
        bundle: &Bundle,
        trust_root: &TrustRootMaterial,
    ) -> Result<KeylessOutcome, SVError> {
        let (leaf, intermediates) = bundle.material.certificates().ok_or_else(|| {
            SVError::VerificationFailed(
                "Bundle carries a public key, keyless verification needs a certificate"
                    .to_string(),
            )
        })?;
        let info = cert::inspect_certificate(leaf)?;

        match &self.policy.identity {
            IdentityPolicy::Unchecked => {
                log::warn!("Certificate identity accepted without an identity policy")
            }
            IdentityPolicy::Required(expected) => {
                if !expected.matches(&info.identity) {
                    return Err(SVError::VerificationFailed(format!(
                        "Certificate identity {} (issuer {}) does not match the required identity",
                        info.identity.subject,
                        info.identity.issuer.as_deref().unwrap_or("none")
                    )));
                }
            }
        }

        let message_digest = self.check_signature(&bundle.content, &info.public_key)?;
        log::debug!("Bundle signature verified");

        let logged = LoggedSignature {
            certificate: leaf,
            content: &bundle.content,
            message_digest: message_digest.as_deref(),
        };
        let entries = bundle
            .tlog_entries
            .iter()
            .map(|entry| {
                tlog::verify_entry(entry, logged, trust_root, self.policy.require_inclusion_proof)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if entries.len() < self.policy.tlog_threshold {
            return Err(SVError::VerificationFailed(format!(
                "{} verified transparency log entries, {} required",
                entries.len(),
                self.policy.tlog_threshold
            )));
        }

        let mut timestamps: Vec<i64> = entries.iter().filter_map(|e| e.integrated_time).collect();
        for token in &bundle.rfc3161_timestamps {
            let verified =
                timestamp::verify_timestamp(token, bundle.content.signature(), trust_root)?;
            timestamps.push(verified.time);
        }
        if timestamps.len() < self.policy.observer_timestamp_threshold {
            return Err(SVError::VerificationFailed(format!(
                "{} verified timestamps, {} required",
                timestamps.len(),
                self.policy.observer_timestamp_threshold
            )));
        }

        let check_times = if timestamps.is_empty() {
            vec![self.time_source.now_unix()?]
        } else {
            timestamps.clone()
        };
        // Entries without a signed entry timestamp are bound to the log key
        // only through the times the certificate is checked at
        if let Some(entry) = entries
            .iter()
            .find(|e| !check_times.iter().all(|t| e.log_valid_at(*t)))
        {
            return Err(SVError::VerificationFailed(format!(
                "Log {} key is not valid at the verified time of entry {}",
                entry.log_id, entry.log_index
            )));
        }
        let verified = cert::verify_certificate(leaf, intermediates, trust_root, &check_times)?;

        let ct_logs = if self.policy.sct_threshold == 0 {
            0
        } else {
            sct::verify_embedded_scts(leaf, intermediates, trust_root)?
        };
        if ct_logs < self.policy.sct_threshold {
            return Err(SVError::VerificationFailed(format!(
                "{} CT logs with a verified SCT, {} required",
                ct_logs, self.policy.sct_threshold
            )));
        }

        Ok(KeylessOutcome {
            media_type: bundle.media_type.clone(),
            identity: verified.info.identity,
            authority: verified.authority,
            entries,
            timestamps,
            ct_logs,
        })
    }

    /// Check the bundle signature. Returns the artifact digest a message
    /// signature was verified against.
    fn check_signature(
        &self,
        content: &BundleContent,
        key: &PublicKey,
    ) -> Result<Option<Vec<u8>>, SVError> {
        match content {
            BundleContent::MessageSignature { digest, signature } => {
                let (algorithm, digest) = match (&self.policy.artifact, digest) {
                    (ArtifactPolicy::Digest(expected), Some((algorithm, reported))) => {
                        if *algorithm != HashAlgorithm::Sha256 || reported != expected {
                            return Err(SVError::VerificationFailed(
                                "Bundle digest does not match the artifact".to_string(),
                            ));
                        }
                        (*algorithm, expected.clone())
                    }
                    (ArtifactPolicy::Digest(expected), None) => {
                        (HashAlgorithm::Sha256, expected.clone())
                    }
                    (ArtifactPolicy::TrustBundleDigest, Some((algorithm, reported))) => {
                        log::warn!("Artifact digest taken from the bundle without a check");
                        (*algorithm, reported.clone())
                    }
                    (ArtifactPolicy::TrustBundleDigest, None) => {
                        return Err(SVError::VerificationFailed(
                            "Bundle reports no artifact digest and none was supplied".to_string(),
                        ))
                    }
                };
                signature::verify_prehashed(key, algorithm, &digest, signature)?;
                Ok(Some(digest))
            }
            BundleContent::Dsse(dsse) => {
                signature::verify(
                    key,
                    HashAlgorithm::Sha256,
                    &pae(&dsse.payload_type, &dsse.payload),
                    &dsse.signature,
                )?;
                match &self.policy.artifact {
                    ArtifactPolicy::Digest(expected) => check_statement_subject(dsse, expected)?,
                    ArtifactPolicy::TrustBundleDigest => {
                        log::warn!("DSSE subjects accepted without an artifact digest check")
                    }
                }
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Statement {
    #[serde(default)]
    subject: Vec<StatementSubject>,
}

#[derive(Debug, Deserialize)]
struct StatementSubject {
    #[serde(default)]
    digest: std::collections::HashMap<String, String>,
}

// The artifact must be one of the in-toto statement subjects.
fn check_statement_subject(dsse: &BundleDsse, expected: &[u8]) -> Result<(), SVError> {
    let statement: Statement = serde_json::from_slice(&dsse.payload).map_err(|e| {
        SVError::VerificationFailed(format!("DSSE payload is not an in-toto statement: {}", e))
    })?;
    let expected = hex::encode(expected);
    let found = statement.subject.iter().any(|s| {
        s.digest
            .get("sha256")
            .is_some_and(|d| d.eq_ignore_ascii_case(&expected))
    });
    if !found {
        return Err(SVError::VerificationFailed(format!(
            "No statement subject has digest sha256:{}",
            expected
        )));
    }
    Ok(())
}
