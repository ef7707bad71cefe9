//! Signed certificate timestamps (RFC 6962)
//!
//! The certificate authority submits every precertificate to certificate
//! transparency logs and embeds their promises in the issued certificate.
//! A log signed the precertificate, which is the certificate's TBS without
//! the SCT list extension, bound to the issuer's key.

use crate::error::SVError;
use crate::signature::{self, sha256, HashAlgorithm};
use crate::trust_root::{LogKey, TrustRootMaterial};
use x509_cert::der::asn1::{ObjectIdentifier, OctetString};
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

/// Embedded SCT list extension
pub const OID_SCT_LIST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11129.2.4.2");

/// Precertificate poison, removed by the log before signing
const OID_CT_POISON: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11129.2.4.3");

const SCT_V1: u8 = 0;
const SIGNATURE_TYPE_CERTIFICATE_TIMESTAMP: u8 = 0;
const ENTRY_TYPE_PRECERT: [u8; 2] = [0, 1];
/// TLS HashAlgorithm.sha256
const TLS_HASH_SHA256: u8 = 4;

/// One SCT from a certificate's SCT list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCertificateTimestamp {
    pub log_id: Vec<u8>,
    /// Milliseconds since the epoch
    pub timestamp: u64,
    pub extensions: Vec<u8>,
    pub hash_algorithm: u8,
    pub signature_algorithm: u8,
    pub signature: Vec<u8>,
}

fn malformed(what: &str) -> SVError {
    SVError::VerificationFailed(format!("Malformed SCT: {}", what))
}

/// TLS presentation language reader
struct TlsReader<'a> {
    data: &'a [u8],
}

impl<'a> TlsReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], SVError> {
        if self.data.len() < n {
            return Err(malformed("truncated"));
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, SVError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<usize, SVError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]) as usize)
    }

    fn u64(&mut self) -> Result<u64, SVError> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(b))
    }

    /// opaque<0..2^16-1>
    fn vec16(&mut self) -> Result<&'a [u8], SVError> {
        let n = self.u16()?;
        self.take(n)
    }

    fn finish(&self) -> Result<(), SVError> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(malformed("trailing data"))
        }
    }
}

/// Parse a TLS-encoded `SignedCertificateTimestampList`.
pub fn parse_sct_list(bytes: &[u8]) -> Result<Vec<SignedCertificateTimestamp>, SVError> {
    let mut outer = TlsReader { data: bytes };
    let mut list = TlsReader {
        data: outer.vec16()?,
    };
    outer.finish()?;

    let mut scts = Vec::new();
    while !list.data.is_empty() {
        scts.push(parse_sct(list.vec16()?)?);
    }
    Ok(scts)
}

fn parse_sct(bytes: &[u8]) -> Result<SignedCertificateTimestamp, SVError> {
    let mut r = TlsReader { data: bytes };
    let version = r.u8()?;
    if version != SCT_V1 {
        return Err(malformed(&format!("unsupported version {}", version)));
    }
    let sct = SignedCertificateTimestamp {
        log_id: r.take(32)?.to_vec(),
        timestamp: r.u64()?,
        extensions: r.vec16()?.to_vec(),
        hash_algorithm: r.u8()?,
        signature_algorithm: r.u8()?,
        signature: r.vec16()?.to_vec(),
    };
    r.finish()?;
    Ok(sct)
}

/// The bytes a log signs for a precertificate entry.
pub fn signed_data(
    sct: &SignedCertificateTimestamp,
    issuer_key_hash: &[u8; 32],
    precert_tbs: &[u8],
) -> Result<Vec<u8>, SVError> {
    let tbs_len = u32::try_from(precert_tbs.len())
        .ok()
        .filter(|n| *n < 1 << 24)
        .ok_or_else(|| malformed("precertificate too large"))?;
    let ext_len =
        u16::try_from(sct.extensions.len()).map_err(|_| malformed("extensions too large"))?;

    let mut out = Vec::with_capacity(47 + precert_tbs.len() + sct.extensions.len());
    out.push(SCT_V1);
    out.push(SIGNATURE_TYPE_CERTIFICATE_TIMESTAMP);
    out.extend_from_slice(&sct.timestamp.to_be_bytes());
    out.extend_from_slice(&ENTRY_TYPE_PRECERT);
    out.extend_from_slice(issuer_key_hash);
    out.extend_from_slice(&tbs_len.to_be_bytes()[1..]);
    out.extend_from_slice(precert_tbs);
    out.extend_from_slice(&ext_len.to_be_bytes());
    out.extend_from_slice(&sct.extensions);
    Ok(out)
}

/// Re-encode the TBS of `cert` without its SCT list and poison extensions.
pub fn precertificate_tbs(cert: &Certificate) -> Result<Vec<u8>, SVError> {
    let mut tbs = cert.tbs_certificate.clone();
    if let Some(exts) = tbs.extensions.as_mut() {
        exts.retain(|ext| ext.extn_id != OID_SCT_LIST && ext.extn_id != OID_CT_POISON);
        if exts.is_empty() {
            tbs.extensions = None;
        }
    }
    Ok(tbs.to_der()?)
}

/// SHA-256 of the SubjectPublicKeyInfo of the certificate that issued `cert`.
///
/// The issuer is looked up among the bundle's intermediates first, then the
/// trust root's certificate authorities.
fn issuer_key_hash(
    cert: &Certificate,
    intermediates: &[Vec<u8>],
    trust_root: &TrustRootMaterial,
) -> Result<[u8; 32], SVError> {
    let candidates = intermediates.iter().chain(
        trust_root
            .certificate_authorities
            .iter()
            .flat_map(|ca| ca.chain.iter()),
    );
    for der in candidates {
        let Ok(candidate) = Certificate::from_der(der) else {
            continue;
        };
        if candidate.tbs_certificate.subject == cert.tbs_certificate.issuer {
            let spki = candidate.tbs_certificate.subject_public_key_info.to_der()?;
            return Ok(sha256(spki));
        }
    }
    Err(SVError::VerificationFailed(
        "Issuer of the signing certificate not found for SCT verification".to_string(),
    ))
}

/// Check one SCT against the CT log `log`.
pub fn verify_sct(
    sct: &SignedCertificateTimestamp,
    log: &LogKey,
    issuer_key_hash: &[u8; 32],
    precert_tbs: &[u8],
) -> Result<(), SVError> {
    if sct.log_id != log.log_id {
        return Err(SVError::VerificationFailed(
            "SCT was issued by a different log".to_string(),
        ));
    }
    if sct.hash_algorithm != TLS_HASH_SHA256 {
        return Err(SVError::UnsupportedAlgorithm(format!(
            "SCT hash algorithm {}",
            sct.hash_algorithm
        )));
    }
    let issued_at = i64::try_from(sct.timestamp / 1000).map_err(|_| malformed("timestamp"))?;
    if !log.is_valid_at(issued_at) {
        return Err(SVError::VerificationFailed(format!(
            "CT log {} key is not valid at {}",
            log.log_id_hex(),
            issued_at
        )));
    }
    let data = signed_data(sct, issuer_key_hash, precert_tbs)?;
    signature::verify(&log.public_key, HashAlgorithm::Sha256, &data, &sct.signature)
}

/// Count the distinct trusted CT logs with a valid SCT embedded in `leaf`.
///
/// SCTs from unknown logs or failing verification are skipped.
pub fn verify_embedded_scts(
    leaf: &[u8],
    intermediates: &[Vec<u8>],
    trust_root: &TrustRootMaterial,
) -> Result<usize, SVError> {
    let cert = Certificate::from_der(leaf)?;
    let Some(ext) = cert
        .tbs_certificate
        .extensions
        .as_ref()
        .and_then(|exts| exts.iter().find(|ext| ext.extn_id == OID_SCT_LIST))
    else {
        log::debug!("Signing certificate carries no SCTs");
        return Ok(0);
    };

    let list = OctetString::from_der(ext.extn_value.as_bytes())?;
    let scts = parse_sct_list(list.as_bytes())?;
    let precert_tbs = precertificate_tbs(&cert)?;
    let issuer_key_hash = issuer_key_hash(&cert, intermediates, trust_root)?;

    let mut verified: Vec<&[u8]> = Vec::new();
    for sct in &scts {
        let Some(log) = trust_root.ct_logs.iter().find(|l| l.log_id == sct.log_id) else {
            log::debug!("SCT from unknown CT log {}", hex::encode(&sct.log_id));
            continue;
        };
        if verified.contains(&log.log_id.as_slice()) {
            continue;
        }
        match verify_sct(sct, log, &issuer_key_hash, &precert_tbs) {
            Ok(()) => verified.push(&log.log_id),
            Err(e) => log::warn!("SCT from CT log {} rejected: {}", log.log_id_hex(), e),
        }
    }
    Ok(verified.len())
}
