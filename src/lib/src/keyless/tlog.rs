//! Transparency log entry verification
//!
//! An entry carried in a bundle proves that the log saw the signature:
//!
//! 1. The signed entry timestamp (SET) is the log's signature over the RFC
//!    8785 canonical form of `{body, integratedTime, logID, logIndex}`. A
//!    verified SET makes `integratedTime` a trusted observation time.
//! 2. The inclusion proof shows the entry body is a leaf of the tree whose
//!    root the log committed to in a signed checkpoint.
//! 3. The entry body must describe the same signature, artifact and
//!    certificate as the bundle itself.

use crate::error::SVError;
use crate::keyless::bundle::{BundleContent, InclusionProof, TlogEntry};
use crate::keyless::merkle;
use crate::signature::{self, sha256_hex, HashAlgorithm};
use crate::trust_root::{LogKey, TrustRootMaterial, ValidityPeriod};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

pub const KIND_HASHEDREKORD: &str = "hashedrekord";
pub const KIND_DSSE: &str = "dsse";

/// Checkpoint signature lines start with an em dash and a space
const CHECKPOINT_SIGNATURE_PREFIX: &str = "\u{2014} ";

/// What the bundle claims was logged.
#[derive(Debug, Clone, Copy)]
pub struct LoggedSignature<'a> {
    /// Leaf certificate, DER
    pub certificate: &'a [u8],
    pub content: &'a BundleContent,
    /// Artifact digest the message signature was checked against
    pub message_digest: Option<&'a [u8]>,
}

/// A log entry that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedEntry {
    pub log_index: i64,
    /// Hex log id
    pub log_id: String,
    /// Set when the SET was verified
    pub integrated_time: Option<i64>,
    pub inclusion_proven: bool,
    /// Validity of the log key, still to be checked against the bundle's
    /// observation times when the entry carries no verified SET
    pub log_validity: Option<ValidityPeriod>,
}

impl VerifiedEntry {
    /// Whether the log key was valid at `t`.
    pub fn log_valid_at(&self, t: i64) -> bool {
        self.log_validity.map_or(true, |v| v.contains(t))
    }
}

/// Verify one log entry against the trust root and the bundle.
pub fn verify_entry(
    entry: &TlogEntry,
    logged: LoggedSignature<'_>,
    trust_root: &TrustRootMaterial,
    require_inclusion_proof: bool,
) -> Result<VerifiedEntry, SVError> {
    let log = trust_root.find_tlog(&entry.log_id).ok_or_else(|| {
        SVError::VerificationFailed(format!(
            "Unknown transparency log {}",
            hex::encode(&entry.log_id)
        ))
    })?;

    if entry.signed_entry_timestamp.is_none() && entry.inclusion_proof.is_none() {
        return Err(SVError::VerificationFailed(format!(
            "Log entry {} has neither an inclusion promise nor an inclusion proof",
            entry.log_index
        )));
    }
    if require_inclusion_proof && entry.inclusion_proof.is_none() {
        return Err(SVError::VerificationFailed(format!(
            "Log entry {} has no inclusion proof",
            entry.log_index
        )));
    }

    check_body(entry, logged)?;

    let integrated_time = match &entry.signed_entry_timestamp {
        Some(set) => {
            verify_set(entry, log, set)?;
            if !log.is_valid_at(entry.integrated_time) {
                return Err(SVError::VerificationFailed(format!(
                    "Transparency log key {} is not valid at {}",
                    log.log_id_hex(),
                    entry.integrated_time
                )));
            }
            log::debug!("SET of log entry {} verified", entry.log_index);
            Some(entry.integrated_time)
        }
        None => None,
    };

    if let Some(proof) = &entry.inclusion_proof {
        verify_inclusion(entry, proof)?;
        let checkpoint = proof.checkpoint.as_deref().ok_or_else(|| {
            SVError::VerificationFailed(format!(
                "Inclusion proof of log entry {} has no checkpoint",
                entry.log_index
            ))
        })?;
        verify_checkpoint(checkpoint, log, proof)?;
        log::debug!("Inclusion of log entry {} verified", entry.log_index);
    }

    Ok(VerifiedEntry {
        log_index: entry.log_index,
        log_id: log.log_id_hex(),
        inclusion_proven: entry.inclusion_proof.is_some(),
        log_validity: match integrated_time {
            Some(_) => None,
            None => log.valid_for,
        },
        integrated_time,
    })
}

/// Canonical bytes the log signs to produce a SET.
pub fn set_payload(entry: &TlogEntry) -> Result<Vec<u8>, SVError> {
    let payload = serde_json::json!({
        "body": STANDARD.encode(&entry.canonicalized_body),
        "integratedTime": entry.integrated_time,
        "logID": hex::encode(&entry.log_id),
        "logIndex": entry.log_index,
    });
    serde_jcs::to_vec(&payload)
        .map_err(|e| SVError::InternalError(format!("Failed to canonicalize SET payload: {}", e)))
}

fn verify_set(entry: &TlogEntry, log: &LogKey, set: &[u8]) -> Result<(), SVError> {
    let payload = set_payload(entry)?;
    signature::verify(&log.public_key, HashAlgorithm::Sha256, &payload, set).map_err(|e| {
        SVError::VerificationFailed(format!(
            "SET of log entry {} does not verify: {}",
            entry.log_index, e
        ))
    })
}

fn hash32(bytes: &[u8], what: &str) -> Result<[u8; 32], SVError> {
    bytes.try_into().map_err(|_| {
        SVError::VerificationFailed(format!("Invalid {} length: {}", what, bytes.len()))
    })
}

fn verify_inclusion(entry: &TlogEntry, proof: &InclusionProof) -> Result<(), SVError> {
    let index = u64::try_from(proof.log_index).map_err(|_| {
        SVError::VerificationFailed(format!("Invalid proof log index {}", proof.log_index))
    })?;
    let tree_size = u64::try_from(proof.tree_size).map_err(|_| {
        SVError::VerificationFailed(format!("Invalid proof tree size {}", proof.tree_size))
    })?;
    let root = hash32(&proof.root_hash, "root hash")?;
    let hashes = proof
        .hashes
        .iter()
        .map(|h| hash32(h, "proof hash"))
        .collect::<Result<Vec<_>, _>>()?;

    let leaf = merkle::compute_leaf_hash(&entry.canonicalized_body);
    merkle::verify_inclusion_proof(index, tree_size, &leaf, &hashes, &root)
}

/// A signed note committing to a tree head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub origin: String,
    pub tree_size: u64,
    pub root_hash: Vec<u8>,
    /// The signed text, every line newline-terminated
    pub note: String,
    pub signatures: Vec<NoteSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteSignature {
    pub name: String,
    pub key_hint: [u8; 4],
    pub signature: Vec<u8>,
}

impl Checkpoint {
    pub fn parse(envelope: &str) -> Result<Self, SVError> {
        let malformed = |what: &str| SVError::VerificationFailed(format!("Malformed checkpoint: {}", what));

        let (text, signature_block) = envelope
            .split_once("\n\n")
            .ok_or_else(|| malformed("no signature block"))?;
        let mut lines = text.lines();
        let origin = lines.next().filter(|l| !l.is_empty()).ok_or_else(|| malformed("no origin"))?;
        let tree_size = lines
            .next()
            .and_then(|l| l.parse::<u64>().ok())
            .ok_or_else(|| malformed("bad tree size"))?;
        let root_hash = lines
            .next()
            .and_then(|l| STANDARD.decode(l).ok())
            .ok_or_else(|| malformed("bad root hash"))?;

        let mut signatures = Vec::new();
        for line in signature_block.lines().filter(|l| !l.is_empty()) {
            let rest = line
                .strip_prefix(CHECKPOINT_SIGNATURE_PREFIX)
                .ok_or_else(|| malformed("bad signature line"))?;
            let (name, encoded) = rest
                .split_once(' ')
                .ok_or_else(|| malformed("bad signature line"))?;
            let raw = STANDARD
                .decode(encoded)
                .map_err(|_| malformed("bad signature encoding"))?;
            if raw.len() <= 4 {
                return Err(malformed("signature too short"));
            }
            let mut key_hint = [0u8; 4];
            key_hint.copy_from_slice(&raw[..4]);
            signatures.push(NoteSignature {
                name: name.to_string(),
                key_hint,
                signature: raw[4..].to_vec(),
            });
        }
        if signatures.is_empty() {
            return Err(malformed("no signatures"));
        }

        Ok(Checkpoint {
            origin: origin.to_string(),
            tree_size,
            root_hash,
            note: format!("{}\n", text),
            signatures,
        })
    }
}

fn verify_checkpoint(envelope: &str, log: &LogKey, proof: &InclusionProof) -> Result<(), SVError> {
    let checkpoint = Checkpoint::parse(envelope)?;

    if i64::try_from(checkpoint.tree_size).ok() != Some(proof.tree_size)
        || checkpoint.root_hash != proof.root_hash
    {
        return Err(SVError::VerificationFailed(format!(
            "Checkpoint of {} does not match the inclusion proof",
            checkpoint.origin
        )));
    }

    let hint = log.log_id.get(..4);
    let verified = checkpoint
        .signatures
        .iter()
        .filter(|s| hint == Some(&s.key_hint[..]))
        .any(|s| {
            signature::verify(
                &log.public_key,
                HashAlgorithm::Sha256,
                checkpoint.note.as_bytes(),
                &s.signature,
            )
            .is_ok()
        });
    if !verified {
        return Err(SVError::VerificationFailed(format!(
            "Checkpoint of {} carries no valid signature from log {}",
            checkpoint.origin,
            log.log_id_hex()
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RekorBody {
    api_version: String,
    kind: String,
    spec: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RekorHash {
    algorithm: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct HashedRekordSpec {
    data: HashedRekordData,
    signature: HashedRekordSignature,
}

#[derive(Debug, Deserialize)]
struct HashedRekordData {
    hash: RekorHash,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HashedRekordSignature {
    content: String,
    public_key: RekorContent,
}

#[derive(Debug, Deserialize)]
struct RekorContent {
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DsseSpec {
    payload_hash: Option<RekorHash>,
    #[serde(default)]
    signatures: Vec<DsseSpecSignature>,
}

#[derive(Debug, Deserialize)]
struct DsseSpecSignature {
    signature: String,
    verifier: String,
}

fn mismatch(what: &str) -> SVError {
    SVError::VerificationFailed(format!("Log entry {} does not match the bundle", what))
}

// Rekor stores the signer's certificate as base64 of its PEM encoding.
fn is_same_certificate(encoded_pem: &str, der: &[u8]) -> bool {
    STANDARD
        .decode(encoded_pem)
        .ok()
        .and_then(|text| pem::parse(text).ok())
        .is_some_and(|p| p.contents() == der)
}

fn is_same_signature(encoded: &str, signature: &[u8]) -> bool {
    STANDARD.decode(encoded).is_ok_and(|s| s == signature)
}

fn check_body(entry: &TlogEntry, logged: LoggedSignature<'_>) -> Result<(), SVError> {
    let body: RekorBody = serde_json::from_slice(&entry.canonicalized_body).map_err(|e| {
        SVError::VerificationFailed(format!("Invalid log entry body: {}", e))
    })?;
    if body.kind != entry.kind || body.api_version != entry.kind_version {
        return Err(mismatch("kind"));
    }

    match (body.kind.as_str(), logged.content) {
        (KIND_HASHEDREKORD, BundleContent::MessageSignature { signature, .. }) => {
            let spec: HashedRekordSpec = serde_json::from_value(body.spec).map_err(|e| {
                SVError::VerificationFailed(format!("Invalid hashedrekord entry: {}", e))
            })?;
            let digest = logged.message_digest.ok_or_else(|| mismatch("artifact digest"))?;
            if spec.data.hash.algorithm.parse::<HashAlgorithm>().ok() != Some(HashAlgorithm::Sha256)
                || !spec.data.hash.value.eq_ignore_ascii_case(&hex::encode(digest))
            {
                return Err(mismatch("artifact digest"));
            }
            if !is_same_signature(&spec.signature.content, signature) {
                return Err(mismatch("signature"));
            }
            if !is_same_certificate(&spec.signature.public_key.content, logged.certificate) {
                return Err(mismatch("certificate"));
            }
            Ok(())
        }
        (KIND_DSSE, BundleContent::Dsse(dsse)) => {
            let spec: DsseSpec = serde_json::from_value(body.spec).map_err(|e| {
                SVError::VerificationFailed(format!("Invalid dsse entry: {}", e))
            })?;
            let payload_hash = spec.payload_hash.ok_or_else(|| mismatch("payload hash"))?;
            if payload_hash.algorithm.parse::<HashAlgorithm>().ok() != Some(HashAlgorithm::Sha256)
                || !payload_hash
                    .value
                    .eq_ignore_ascii_case(&sha256_hex(&dsse.payload))
            {
                return Err(mismatch("payload hash"));
            }
            let logged_signature = spec.signatures.iter().any(|s| {
                is_same_signature(&s.signature, &dsse.signature)
                    && is_same_certificate(&s.verifier, logged.certificate)
            });
            if !logged_signature {
                return Err(mismatch("signature"));
            }
            Ok(())
        }
        (KIND_HASHEDREKORD, _) | (KIND_DSSE, _) => Err(mismatch("content type")),
        (other, _) => Err(SVError::VerificationFailed(format!(
            "Unsupported log entry kind: {}",
            other
        ))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::keyless::bundle::BundleDsse;
    use crate::keyless::cert::tests::{test_pki, SIGNED_AT};
    use crate::keyless::merkle::tests::{audit_path, tree_root};
    use crate::signature::{sha256, PublicKey};
    use p256::ecdsa::signature::Signer;
    use p256::ecdsa::SigningKey;

    pub(crate) const LOG_ORIGIN: &str = "log.example.com - 1";

    /// A transparency log that signs entries with a fixed P-256 key.
    pub(crate) struct TestLog {
        key: SigningKey,
        pub log_key: LogKey,
    }

    impl TestLog {
        pub(crate) fn new() -> Self {
            let key = SigningKey::from_slice(&[0x22; 32]).unwrap();
            let public_key = PublicKey::from_p256(p256::ecdsa::VerifyingKey::from(&key)).unwrap();
            let log_id = sha256(public_key.spki_der()).to_vec();
            Self {
                key,
                log_key: LogKey {
                    base_url: "https://log.example.com".to_string(),
                    log_id,
                    public_key,
                    valid_for: None,
                },
            }
        }

        fn sign(&self, message: &[u8]) -> Vec<u8> {
            let sig: p256::ecdsa::Signature = self.key.sign(message);
            sig.to_der().as_bytes().to_vec()
        }

        /// Log `body` at index 5 of a 7-leaf tree.
        pub(crate) fn entry(&self, kind: &str, body: Vec<u8>, with_set: bool, with_proof: bool) -> TlogEntry {
            let mut entry = TlogEntry {
                log_index: 1005,
                log_id: self.log_key.log_id.clone(),
                kind: kind.to_string(),
                kind_version: "0.0.1".to_string(),
                integrated_time: SIGNED_AT,
                signed_entry_timestamp: None,
                inclusion_proof: None,
                canonicalized_body: body,
            };
            if with_set {
                entry.signed_entry_timestamp = Some(self.sign(&set_payload(&entry).unwrap()));
            }
            if with_proof {
                let mut leaves: Vec<[u8; 32]> = (0u8..7)
                    .map(|i| merkle::compute_leaf_hash(&[i]))
                    .collect();
                leaves[5] = merkle::compute_leaf_hash(&entry.canonicalized_body);
                let root = tree_root(&leaves);
                entry.inclusion_proof = Some(InclusionProof {
                    log_index: 5,
                    root_hash: root.to_vec(),
                    tree_size: 7,
                    hashes: audit_path(5, &leaves).iter().map(|h| h.to_vec()).collect(),
                    checkpoint: Some(self.checkpoint(7, &root)),
                });
            }
            entry
        }

        pub(crate) fn checkpoint(&self, size: u64, root: &[u8]) -> String {
            let note = format!("{}\n{}\n{}\n", LOG_ORIGIN, size, STANDARD.encode(root));
            let mut raw = self.log_key.log_id[..4].to_vec();
            raw.extend(self.sign(note.as_bytes()));
            format!(
                "{}\n{}{} {}\n",
                note,
                CHECKPOINT_SIGNATURE_PREFIX,
                "log.example.com",
                STANDARD.encode(raw)
            )
        }
    }

    pub(crate) fn trust_root_with_log(mut root: TrustRootMaterial, log: &TestLog) -> TrustRootMaterial {
        root.transparency_logs.push(log.log_key.clone());
        root
    }

    fn certificate_pem_b64(der: &[u8]) -> String {
        STANDARD.encode(pem::encode(&pem::Pem::new("CERTIFICATE", der.to_vec())))
    }

    pub(crate) fn hashedrekord_body(digest: &[u8], signature: &[u8], certificate: &[u8]) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "apiVersion": "0.0.1",
            "kind": "hashedrekord",
            "spec": {
                "data": { "hash": { "algorithm": "sha256", "value": hex::encode(digest) } },
                "signature": {
                    "content": STANDARD.encode(signature),
                    "publicKey": { "content": certificate_pem_b64(certificate) },
                },
            },
        }))
        .unwrap()
    }

    pub(crate) fn dsse_body(payload: &[u8], signature: &[u8], certificate: &[u8]) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "apiVersion": "0.0.1",
            "kind": "dsse",
            "spec": {
                "payloadHash": { "algorithm": "sha256", "value": sha256_hex(payload) },
                "signatures": [{
                    "signature": STANDARD.encode(signature),
                    "verifier": certificate_pem_b64(certificate),
                }],
            },
        }))
        .unwrap()
    }

    fn message_fixture() -> (Vec<u8>, BundleContent, [u8; 32], TrustRootMaterial, TestLog) {
        let pki = test_pki();
        let log = TestLog::new();
        let digest = sha256(b"artifact");
        let content = BundleContent::MessageSignature {
            digest: Some((HashAlgorithm::Sha256, digest.to_vec())),
            signature: b"signature".to_vec(),
        };
        let root = trust_root_with_log(
            crate::keyless::cert::tests::trust_root_with(&pki.root_der),
            &log,
        );
        (pki.leaf_der, content, digest, root, log)
    }

    #[test]
    fn test_verify_hashedrekord_entry() {
        let (leaf, content, digest, root, log) = message_fixture();
        let body = hashedrekord_body(&digest, b"signature", &leaf);
        let entry = log.entry(KIND_HASHEDREKORD, body, true, true);
        let logged = LoggedSignature {
            certificate: &leaf,
            content: &content,
            message_digest: Some(&digest),
        };

        let verified = verify_entry(&entry, logged, &root, true).unwrap();
        assert_eq!(verified.integrated_time, Some(SIGNED_AT));
        assert!(verified.inclusion_proven);
        assert_eq!(verified.log_id, log.log_key.log_id_hex());
    }

    #[test]
    fn test_proof_only_entry_has_no_trusted_time() {
        let (leaf, content, digest, root, log) = message_fixture();
        let body = hashedrekord_body(&digest, b"signature", &leaf);
        let entry = log.entry(KIND_HASHEDREKORD, body.clone(), false, true);
        let logged = LoggedSignature {
            certificate: &leaf,
            content: &content,
            message_digest: Some(&digest),
        };
        let verified = verify_entry(&entry, logged, &root, true).unwrap();
        assert_eq!(verified.integrated_time, None);

        // SET only: accepted unless a proof is required
        let entry = log.entry(KIND_HASHEDREKORD, body, true, false);
        assert!(verify_entry(&entry, logged, &root, false).is_ok());
        assert!(verify_entry(&entry, logged, &root, true).is_err());
    }

    #[test]
    fn test_proof_without_checkpoint_is_rejected() {
        let (leaf, content, digest, root, log) = message_fixture();
        let body = hashedrekord_body(&digest, b"signature", &leaf);
        let logged = LoggedSignature {
            certificate: &leaf,
            content: &content,
            message_digest: Some(&digest),
        };

        // A proof against a root the log never signed proves nothing
        let mut entry = log.entry(KIND_HASHEDREKORD, body.clone(), false, true);
        if let Some(proof) = entry.inclusion_proof.as_mut() {
            proof.checkpoint = None;
        }
        assert!(matches!(
            verify_entry(&entry, logged, &root, true),
            Err(SVError::VerificationFailed(msg)) if msg.contains("no checkpoint")
        ));

        let mut entry = log.entry(KIND_HASHEDREKORD, body, true, true);
        if let Some(proof) = entry.inclusion_proof.as_mut() {
            proof.checkpoint = None;
        }
        assert!(verify_entry(&entry, logged, &root, false).is_err());
    }

    #[test]
    fn test_log_key_validity_follows_set() {
        let (leaf, content, digest, mut root, log) = message_fixture();
        let body = hashedrekord_body(&digest, b"signature", &leaf);
        let logged = LoggedSignature {
            certificate: &leaf,
            content: &content,
            message_digest: Some(&digest),
        };
        let retired = ValidityPeriod {
            start: None,
            end: Some(SIGNED_AT - 60),
        };
        root.transparency_logs[0].valid_for = Some(retired);

        // A verified SET pins the time the key is checked at
        let entry = log.entry(KIND_HASHEDREKORD, body.clone(), true, true);
        assert!(verify_entry(&entry, logged, &root, true).is_err());

        // Without one the claimed time proves nothing; the caller checks
        // the key against its own observation times
        let mut entry = log.entry(KIND_HASHEDREKORD, body, false, true);
        entry.integrated_time = SIGNED_AT - 3600;
        let verified = verify_entry(&entry, logged, &root, true).unwrap();
        assert_eq!(verified.log_validity, Some(retired));
        assert!(verified.log_valid_at(SIGNED_AT - 3600));
        assert!(!verified.log_valid_at(SIGNED_AT));
    }

    #[test]
    fn test_tampered_entries_are_rejected() {
        let (leaf, content, digest, root, log) = message_fixture();
        let body = hashedrekord_body(&digest, b"signature", &leaf);
        let logged = LoggedSignature {
            certificate: &leaf,
            content: &content,
            message_digest: Some(&digest),
        };

        let mut entry = log.entry(KIND_HASHEDREKORD, body.clone(), true, true);
        entry.integrated_time += 1;
        assert!(verify_entry(&entry, logged, &root, true).is_err());

        let mut entry = log.entry(KIND_HASHEDREKORD, body.clone(), true, true);
        if let Some(proof) = entry.inclusion_proof.as_mut() {
            proof.hashes[0][0] ^= 1;
        }
        assert!(verify_entry(&entry, logged, &root, true).is_err());

        let mut entry = log.entry(KIND_HASHEDREKORD, body.clone(), true, true);
        if let Some(proof) = entry.inclusion_proof.as_mut() {
            proof.checkpoint = Some(log.checkpoint(8, &proof.root_hash));
        }
        assert!(verify_entry(&entry, logged, &root, true).is_err());

        let mut entry = log.entry(KIND_HASHEDREKORD, body, true, true);
        entry.log_id = vec![0u8; 32];
        assert!(verify_entry(&entry, logged, &root, true).is_err());
    }

    #[test]
    fn test_body_must_match_bundle() {
        let (leaf, content, digest, root, log) = message_fixture();
        let logged = LoggedSignature {
            certificate: &leaf,
            content: &content,
            message_digest: Some(&digest),
        };

        let wrong_digest = hashedrekord_body(&sha256(b"other"), b"signature", &leaf);
        let entry = log.entry(KIND_HASHEDREKORD, wrong_digest, true, true);
        assert!(verify_entry(&entry, logged, &root, true).is_err());

        let wrong_sig = hashedrekord_body(&digest, b"other", &leaf);
        let entry = log.entry(KIND_HASHEDREKORD, wrong_sig, true, true);
        assert!(verify_entry(&entry, logged, &root, true).is_err());

        let other_cert = test_pki().leaf_der;
        let wrong_cert = hashedrekord_body(&digest, b"signature", &other_cert);
        let entry = log.entry(KIND_HASHEDREKORD, wrong_cert, true, true);
        assert!(verify_entry(&entry, logged, &root, true).is_err());

        let body = hashedrekord_body(&digest, b"signature", &leaf);
        let entry = log.entry("intoto", body, true, true);
        assert!(verify_entry(&entry, logged, &root, true).is_err());
    }

    #[test]
    fn test_verify_dsse_entry() {
        let pki = test_pki();
        let log = TestLog::new();
        let root = trust_root_with_log(
            crate::keyless::cert::tests::trust_root_with(&pki.root_der),
            &log,
        );
        let content = BundleContent::Dsse(BundleDsse {
            payload_type: "application/vnd.in-toto+json".to_string(),
            payload: b"{}".to_vec(),
            key_id: String::new(),
            signature: b"dsse-signature".to_vec(),
        });
        let logged = LoggedSignature {
            certificate: &pki.leaf_der,
            content: &content,
            message_digest: None,
        };

        let body = dsse_body(b"{}", b"dsse-signature", &pki.leaf_der);
        let entry = log.entry(KIND_DSSE, body, true, true);
        assert!(verify_entry(&entry, logged, &root, true).is_ok());

        let body = dsse_body(b"{\"x\":1}", b"dsse-signature", &pki.leaf_der);
        let entry = log.entry(KIND_DSSE, body, true, true);
        assert!(verify_entry(&entry, logged, &root, true).is_err());

        // A dsse entry cannot vouch for a message signature
        let (leaf, message, digest, _, _) = message_fixture();
        let body = dsse_body(b"{}", b"signature", &leaf);
        let entry = log.entry(KIND_DSSE, body, true, true);
        let logged = LoggedSignature {
            certificate: &leaf,
            content: &message,
            message_digest: Some(&digest),
        };
        assert!(verify_entry(&entry, logged, &root, true).is_err());
    }

    #[test]
    fn test_parse_checkpoint() {
        let log = TestLog::new();
        let root = [3u8; 32];
        let checkpoint = Checkpoint::parse(&log.checkpoint(42, &root)).unwrap();
        assert_eq!(checkpoint.origin, LOG_ORIGIN);
        assert_eq!(checkpoint.tree_size, 42);
        assert_eq!(checkpoint.root_hash, root.to_vec());
        assert_eq!(checkpoint.signatures.len(), 1);
        assert_eq!(checkpoint.signatures[0].name, "log.example.com");
        assert_eq!(&checkpoint.signatures[0].key_hint[..], &log.log_key.log_id[..4]);

        assert!(Checkpoint::parse("origin\n42\n").is_err());
        assert!(Checkpoint::parse("origin\nnan\nAAAA\n\n\u{2014} x AAAAAAAA\n").is_err());
        assert!(Checkpoint::parse("origin\n1\nAAAA\n\n- x AAAAAAAA\n").is_err());
    }
}
