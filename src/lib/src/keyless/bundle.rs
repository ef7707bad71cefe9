//! Sigstore bundle parsing
//!
//! Accepts the protobuf-JSON encoding of `dev.sigstore.bundle.v1.Bundle` for
//! media types v0.1, v0.2 and v0.3. Byte fields are base64, int64 fields may
//! be JSON strings or numbers.

use crate::error::SVError;
use crate::signature::HashAlgorithm;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

/// Bundle protocol version, taken from the media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BundleVersion {
    V0_1,
    V0_2,
    V0_3,
}

impl BundleVersion {
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type {
            "application/vnd.dev.sigstore.bundle+json;version=0.1" => Some(Self::V0_1),
            "application/vnd.dev.sigstore.bundle+json;version=0.2" => Some(Self::V0_2),
            "application/vnd.dev.sigstore.bundle+json;version=0.3"
            | "application/vnd.dev.sigstore.bundle.v0.3+json" => Some(Self::V0_3),
            _ => None,
        }
    }
}

impl std::fmt::Display for BundleVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BundleVersion::V0_1 => write!(f, "v0.1"),
            BundleVersion::V0_2 => write!(f, "v0.2"),
            BundleVersion::V0_3 => write!(f, "v0.3"),
        }
    }
}

/// What the signer's key is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationMaterial {
    /// Leaf certificate only (DER)
    Certificate(Vec<u8>),
    /// Leaf first, optionally followed by intermediates (DER)
    CertificateChain(Vec<Vec<u8>>),
    /// A long-lived key, known to the verifier by hint
    PublicKey { hint: String },
}

impl VerificationMaterial {
    /// Leaf certificate and any intermediates shipped with it
    pub fn certificates(&self) -> Option<(&[u8], &[Vec<u8>])> {
        match self {
            VerificationMaterial::Certificate(der) => Some((der.as_slice(), &[])),
            VerificationMaterial::CertificateChain(chain) => {
                chain.split_first().map(|(leaf, rest)| (leaf.as_slice(), rest))
            }
            VerificationMaterial::PublicKey { .. } => None,
        }
    }
}

/// Merkle inclusion proof of a transparency log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionProof {
    /// Index of the entry within the tree the proof refers to
    pub log_index: i64,
    pub root_hash: Vec<u8>,
    pub tree_size: i64,
    /// Audit path, leaf first
    pub hashes: Vec<Vec<u8>>,
    /// Signed note committing to `root_hash` and `tree_size`
    pub checkpoint: Option<String>,
}

/// A transparency log entry carried in the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlogEntry {
    pub log_index: i64,
    pub log_id: Vec<u8>,
    pub kind: String,
    pub kind_version: String,
    pub integrated_time: i64,
    /// Signed entry timestamp (inclusion promise)
    pub signed_entry_timestamp: Option<Vec<u8>>,
    pub inclusion_proof: Option<InclusionProof>,
    pub canonicalized_body: Vec<u8>,
}

/// DSSE envelope embedded in a bundle. Exactly one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleDsse {
    pub payload_type: String,
    pub payload: Vec<u8>,
    pub key_id: String,
    pub signature: Vec<u8>,
}

/// What was signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleContent {
    MessageSignature {
        /// Digest algorithm and artifact digest, as reported by the signer
        digest: Option<(HashAlgorithm, Vec<u8>)>,
        signature: Vec<u8>,
    },
    Dsse(BundleDsse),
}

impl BundleContent {
    pub fn signature(&self) -> &[u8] {
        match self {
            BundleContent::MessageSignature { signature, .. } => signature,
            BundleContent::Dsse(dsse) => &dsse.signature,
        }
    }
}

/// A parsed Sigstore bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub media_type: String,
    pub version: BundleVersion,
    pub material: VerificationMaterial,
    pub tlog_entries: Vec<TlogEntry>,
    /// RFC 3161 signed timestamps, DER
    pub rfc3161_timestamps: Vec<Vec<u8>>,
    pub content: BundleContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireInt {
    Str(String),
    Num(i64),
}

impl WireInt {
    fn value(&self, field: &str) -> Result<i64, SVError> {
        match self {
            WireInt::Num(n) => Ok(*n),
            WireInt::Str(s) => s
                .parse()
                .map_err(|_| SVError::MalformedBundle(format!("{} is not an integer: {:?}", field, s))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBundle {
    media_type: Option<String>,
    verification_material: Option<WireMaterial>,
    message_signature: Option<WireMessageSignature>,
    dsse_envelope: Option<WireDsse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMaterial {
    certificate: Option<WireRawBytes>,
    x509_certificate_chain: Option<WireChain>,
    public_key: Option<WirePublicKey>,
    #[serde(default)]
    tlog_entries: Vec<WireTlogEntry>,
    timestamp_verification_data: Option<WireTimestampData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRawBytes {
    raw_bytes: String,
}

#[derive(Debug, Deserialize)]
struct WireChain {
    #[serde(default)]
    certificates: Vec<WireRawBytes>,
}

#[derive(Debug, Deserialize)]
struct WirePublicKey {
    #[serde(default)]
    hint: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTimestampData {
    #[serde(default)]
    rfc3161_timestamps: Vec<WireSignedTimestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSignedTimestamp {
    signed_timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTlogEntry {
    log_index: WireInt,
    log_id: WireLogId,
    kind_version: WireKindVersion,
    integrated_time: WireInt,
    inclusion_promise: Option<WirePromise>,
    inclusion_proof: Option<WireInclusionProof>,
    canonicalized_body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLogId {
    key_id: String,
}

#[derive(Debug, Deserialize)]
struct WireKindVersion {
    kind: String,
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePromise {
    signed_entry_timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInclusionProof {
    log_index: WireInt,
    root_hash: String,
    tree_size: WireInt,
    #[serde(default)]
    hashes: Vec<String>,
    checkpoint: Option<WireCheckpoint>,
}

#[derive(Debug, Deserialize)]
struct WireCheckpoint {
    envelope: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessageSignature {
    message_digest: Option<WireDigest>,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct WireDigest {
    algorithm: String,
    digest: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDsse {
    payload: String,
    payload_type: String,
    #[serde(default)]
    signatures: Vec<WireDsseSignature>,
}

#[derive(Debug, Deserialize)]
struct WireDsseSignature {
    sig: String,
    #[serde(default)]
    keyid: String,
}

fn decode(value: &str, what: &str) -> Result<Vec<u8>, SVError> {
    STANDARD
        .decode(value)
        .map_err(|e| SVError::MalformedBundle(format!("Invalid base64 in {}: {}", what, e)))
}

impl Bundle {
    /// Parse a bundle document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SVError> {
        let wire: WireBundle = serde_json::from_slice(bytes)
            .map_err(|e| SVError::MalformedBundle(format!("Invalid bundle JSON: {}", e)))?;

        let media_type = wire
            .media_type
            .ok_or_else(|| SVError::MalformedBundle("Missing mediaType".to_string()))?;
        let version = BundleVersion::from_media_type(&media_type).ok_or_else(|| {
            SVError::MalformedBundle(format!("Unsupported bundle media type: {}", media_type))
        })?;

        let material = wire
            .verification_material
            .ok_or_else(|| SVError::MalformedBundle("Missing verificationMaterial".to_string()))?;

        let key_material = match (
            material.certificate,
            material.x509_certificate_chain,
            material.public_key,
        ) {
            (Some(cert), None, None) => {
                VerificationMaterial::Certificate(decode(&cert.raw_bytes, "certificate")?)
            }
            (None, Some(chain), None) => {
                if version >= BundleVersion::V0_3 {
                    return Err(SVError::MalformedBundle(
                        "Bundle v0.3 must carry a single certificate, not a chain".to_string(),
                    ));
                }
                if chain.certificates.is_empty() {
                    return Err(SVError::MalformedBundle(
                        "Empty x509CertificateChain".to_string(),
                    ));
                }
                let certs = chain
                    .certificates
                    .iter()
                    .map(|c| decode(&c.raw_bytes, "certificate chain"))
                    .collect::<Result<Vec<_>, _>>()?;
                VerificationMaterial::CertificateChain(certs)
            }
            (None, None, Some(pk)) => VerificationMaterial::PublicKey { hint: pk.hint },
            (None, None, None) => {
                return Err(SVError::MalformedBundle(
                    "Verification material has no certificate or public key".to_string(),
                ))
            }
            _ => {
                return Err(SVError::MalformedBundle(
                    "Verification material has more than one key source".to_string(),
                ))
            }
        };

        let tlog_entries = material
            .tlog_entries
            .iter()
            .map(|e| convert_tlog_entry(e, version))
            .collect::<Result<Vec<_>, _>>()?;

        let rfc3161_timestamps = match material.timestamp_verification_data {
            Some(data) => data
                .rfc3161_timestamps
                .iter()
                .map(|t| decode(&t.signed_timestamp, "rfc3161 timestamp"))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let content = match (wire.message_signature, wire.dsse_envelope) {
            (Some(ms), None) => convert_message_signature(ms)?,
            (None, Some(dsse)) => convert_dsse(dsse)?,
            (None, None) => {
                return Err(SVError::MalformedBundle(
                    "Bundle has neither messageSignature nor dsseEnvelope".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(SVError::MalformedBundle(
                    "Bundle has both messageSignature and dsseEnvelope".to_string(),
                ))
            }
        };

        Ok(Bundle {
            media_type,
            version,
            material: key_material,
            tlog_entries,
            rfc3161_timestamps,
            content,
        })
    }
}

fn convert_tlog_entry(entry: &WireTlogEntry, version: BundleVersion) -> Result<TlogEntry, SVError> {
    let signed_entry_timestamp = entry
        .inclusion_promise
        .as_ref()
        .map(|p| decode(&p.signed_entry_timestamp, "signedEntryTimestamp"))
        .transpose()?;

    let inclusion_proof = match &entry.inclusion_proof {
        Some(proof) => Some(InclusionProof {
            log_index: proof.log_index.value("inclusionProof.logIndex")?,
            root_hash: decode(&proof.root_hash, "rootHash")?,
            tree_size: proof.tree_size.value("inclusionProof.treeSize")?,
            hashes: proof
                .hashes
                .iter()
                .map(|h| decode(h, "inclusion proof hash"))
                .collect::<Result<Vec<_>, _>>()?,
            checkpoint: proof.checkpoint.as_ref().map(|c| c.envelope.clone()),
        }),
        None => None,
    };

    match version {
        BundleVersion::V0_1 if signed_entry_timestamp.is_none() => {
            return Err(SVError::MalformedBundle(
                "Bundle v0.1 tlog entry is missing its inclusion promise".to_string(),
            ))
        }
        BundleVersion::V0_2 | BundleVersion::V0_3 if inclusion_proof.is_none() => {
            return Err(SVError::MalformedBundle(format!(
                "Bundle {} tlog entry is missing its inclusion proof",
                version
            )))
        }
        _ => {}
    }

    Ok(TlogEntry {
        log_index: entry.log_index.value("logIndex")?,
        log_id: decode(&entry.log_id.key_id, "logId")?,
        kind: entry.kind_version.kind.clone(),
        kind_version: entry.kind_version.version.clone(),
        integrated_time: entry.integrated_time.value("integratedTime")?,
        signed_entry_timestamp,
        inclusion_proof,
        canonicalized_body: decode(&entry.canonicalized_body, "canonicalizedBody")?,
    })
}

fn convert_message_signature(ms: WireMessageSignature) -> Result<BundleContent, SVError> {
    let digest = match ms.message_digest {
        Some(d) => {
            let algorithm = d.algorithm.parse::<HashAlgorithm>().map_err(|_| {
                SVError::MalformedBundle(format!("Unknown digest algorithm: {}", d.algorithm))
            })?;
            Some((algorithm, decode(&d.digest, "messageDigest")?))
        }
        None => None,
    };
    Ok(BundleContent::MessageSignature {
        digest,
        signature: decode(&ms.signature, "messageSignature")?,
    })
}

// Bundle DSSE signatures usually carry an empty keyid, so the envelope
// codec's keyid rule does not apply here.
fn convert_dsse(dsse: WireDsse) -> Result<BundleContent, SVError> {
    if dsse.signatures.len() != 1 {
        return Err(SVError::MalformedBundle(format!(
            "Bundle DSSE envelope must have exactly one signature, found {}",
            dsse.signatures.len()
        )));
    }
    let sig = &dsse.signatures[0];
    Ok(BundleContent::Dsse(BundleDsse {
        payload_type: dsse.payload_type.clone(),
        payload: decode(&dsse.payload, "dsse payload")?,
        key_id: sig.keyid.clone(),
        signature: decode(&sig.sig, "dsse signature")?,
    }))
}
