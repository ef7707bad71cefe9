//! Keyless verification policy

use crate::keyless::cert::SignerIdentity;

/// How the signed artifact is identified.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ArtifactPolicy {
    /// Accept whatever digest the bundle reports for the artifact.
    ///
    /// Only sound when the caller checks the digest out of band.
    #[default]
    TrustBundleDigest,

    /// The artifact must have this SHA-256 digest
    Digest(Vec<u8>),
}

/// Expected certificate identity. Both fields accept `*` wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateIdentity {
    /// OIDC issuer, e.g. `https://token.actions.githubusercontent.com`
    pub issuer: String,
    /// Subject alternative name, e.g. `https://github.com/myorg/*`
    pub subject: String,
}

impl CertificateIdentity {
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            subject: subject.into(),
        }
    }

    /// Identity of a GitHub Actions workflow of `org`
    pub fn github_actions(org: &str) -> Self {
        Self::new(
            "https://token.actions.githubusercontent.com",
            format!("https://github.com/{}/*", org),
        )
    }

    pub fn matches_issuer(&self, issuer: &str) -> bool {
        glob_match(&self.issuer, issuer)
    }

    pub fn matches_subject(&self, subject: &str) -> bool {
        glob_match(&self.subject, subject)
    }

    /// A certificate without an issuer extension never matches.
    pub fn matches(&self, identity: &SignerIdentity) -> bool {
        identity
            .issuer
            .as_deref()
            .is_some_and(|issuer| self.matches_issuer(issuer))
            && self.matches_subject(&identity.subject)
    }
}

/// Which certificate identities are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityPolicy {
    /// Accept any identity the trusted CA issued a certificate to
    #[default]
    Unchecked,
    Required(CertificateIdentity),
}

/// Knobs of keyless verification.
///
/// The default trusts the bundle's own artifact digest and certificate
/// identity and requires one verified log entry, one verified timestamp and
/// one certificate transparency timestamp on the signing certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationPolicy {
    pub artifact: ArtifactPolicy,
    pub identity: IdentityPolicy,
    /// Minimum number of verified transparency log entries
    pub tlog_threshold: usize,
    /// Minimum number of verified signed timestamps
    pub observer_timestamp_threshold: usize,
    /// Every log entry must carry an inclusion proof
    pub require_inclusion_proof: bool,
    /// Minimum number of CT logs with a valid embedded SCT
    pub sct_threshold: usize,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            artifact: ArtifactPolicy::default(),
            identity: IdentityPolicy::default(),
            tlog_threshold: 1,
            observer_timestamp_threshold: 1,
            require_inclusion_proof: true,
            sct_threshold: 1,
        }
    }
}

impl VerificationPolicy {
    /// Require the artifact to have this SHA-256 digest.
    pub fn with_artifact_digest(mut self, digest: impl Into<Vec<u8>>) -> Self {
        self.artifact = ArtifactPolicy::Digest(digest.into());
        self
    }

    /// Require the signing certificate to match `identity`.
    pub fn with_identity(mut self, identity: CertificateIdentity) -> Self {
        self.identity = IdentityPolicy::Required(identity);
        self
    }

    pub fn with_tlog_threshold(mut self, threshold: usize) -> Self {
        self.tlog_threshold = threshold;
        self
    }

    pub fn with_observer_timestamp_threshold(mut self, threshold: usize) -> Self {
        self.observer_timestamp_threshold = threshold;
        self
    }

    pub fn with_require_inclusion_proof(mut self, require: bool) -> Self {
        self.require_inclusion_proof = require;
        self
    }

    pub fn with_sct_threshold(mut self, threshold: usize) -> Self {
        self.sct_threshold = threshold;
        self
    }

    /// Whether any bundle-reported field is trusted without a check
    pub fn is_relaxed(&self) -> bool {
        self.artifact == ArtifactPolicy::TrustBundleDigest
            || self.identity == IdentityPolicy::Unchecked
    }
}

/// Simple glob matching (* matches any characters)
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            // First part must match at start
            if !text.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == parts.len() - 1 {
            // Last part must match at the end, after everything so far
            return text.len() >= pos + part.len() && text[pos..].ends_with(part);
        } else if let Some(found) = text[pos..].find(part) {
            pos += found + part.len();
        } else {
            return false;
        }
    }

    true
}
