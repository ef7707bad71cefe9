//! Sigstore `trusted_root.json` parsing
//!
//! The document is the protobuf-JSON encoding of
//! `dev.sigstore.trustroot.v1.TrustedRoot`: camelCase field names, base64
//! byte fields and RFC 3339 timestamps.

use super::{CertificateAuthority, LogKey, TrustRootMaterial, ValidityPeriod};
use crate::error::SVError;
use crate::signature::PublicKey;
use crate::time::parse_rfc3339;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use x509_parser::prelude::*;

/// Media type prefix shared by every trusted root version
pub const TRUSTED_ROOT_MEDIA_TYPE_PREFIX: &str = "application/vnd.dev.sigstore.trustedroot";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrustedRootDocument {
    media_type: Option<String>,

    #[serde(default)]
    tlogs: Vec<LogEntry>,

    #[serde(default)]
    certificate_authorities: Vec<AuthorityEntry>,

    #[serde(default)]
    ctlogs: Vec<LogEntry>,

    #[serde(default)]
    timestamp_authorities: Vec<AuthorityEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEntry {
    #[serde(default)]
    base_url: String,
    public_key: PublicKeyEntry,
    log_id: LogIdEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyEntry {
    raw_bytes: String,
    #[serde(default)]
    key_details: Option<String>,
    #[serde(default)]
    valid_for: Option<ValidForEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogIdEntry {
    key_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorityEntry {
    #[serde(default)]
    subject: Option<SubjectEntry>,
    #[serde(default)]
    uri: String,
    cert_chain: CertChainEntry,
    #[serde(default)]
    valid_for: Option<ValidForEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectEntry {
    #[serde(default)]
    organization: String,
    #[serde(default)]
    common_name: String,
}

#[derive(Debug, Deserialize)]
struct CertChainEntry {
    #[serde(default)]
    certificates: Vec<CertificateEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificateEntry {
    raw_bytes: String,
}

#[derive(Debug, Deserialize)]
struct ValidForEntry {
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
}

impl TrustRootMaterial {
    /// Parse a `trusted_root.json` document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SVError> {
        let doc: TrustedRootDocument = serde_json::from_slice(bytes)
            .map_err(|e| SVError::TrustRootMalformed(format!("Invalid trusted root JSON: {}", e)))?;

        let format_version = doc
            .media_type
            .ok_or_else(|| SVError::TrustRootMalformed("Missing mediaType".to_string()))?;
        if !format_version.starts_with(TRUSTED_ROOT_MEDIA_TYPE_PREFIX) {
            return Err(SVError::TrustRootMalformed(format!(
                "Unsupported media type: {}",
                format_version
            )));
        }

        let certificate_authorities = doc
            .certificate_authorities
            .iter()
            .map(convert_authority)
            .collect::<Result<Vec<_>, _>>()?;
        let timestamp_authorities = doc
            .timestamp_authorities
            .iter()
            .map(convert_authority)
            .collect::<Result<Vec<_>, _>>()?;
        let transparency_logs = convert_logs(&doc.tlogs, "tlog")?;
        let ct_logs = convert_logs(&doc.ctlogs, "ctlog")?;

        if certificate_authorities.is_empty() && transparency_logs.is_empty() {
            return Err(SVError::TrustRootMalformed(
                "Trusted root has neither certificate authorities nor transparency logs"
                    .to_string(),
            ));
        }

        Ok(Self {
            format_version,
            certificate_authorities,
            transparency_logs,
            ct_logs,
            timestamp_authorities,
        })
    }
}

fn convert_authority(entry: &AuthorityEntry) -> Result<CertificateAuthority, SVError> {
    if entry.cert_chain.certificates.is_empty() {
        return Err(SVError::TrustRootMalformed(format!(
            "Authority {} has an empty certificate chain",
            entry.uri
        )));
    }

    let mut chain = Vec::with_capacity(entry.cert_chain.certificates.len());
    for cert in &entry.cert_chain.certificates {
        let der = decode_base64(&cert.raw_bytes, "certificate")?;
        X509Certificate::from_der(&der).map_err(|e| {
            SVError::TrustRootMalformed(format!("Invalid certificate for {}: {}", entry.uri, e))
        })?;
        chain.push(der);
    }

    let name = match &entry.subject {
        Some(s) if !s.organization.is_empty() => {
            format!("{} - {}", s.organization, s.common_name)
        }
        Some(s) => s.common_name.clone(),
        None => entry.uri.clone(),
    };

    Ok(CertificateAuthority {
        name,
        uri: entry.uri.clone(),
        chain,
        valid_for: convert_validity(entry.valid_for.as_ref())?,
    })
}

fn convert_logs(entries: &[LogEntry], kind: &str) -> Result<Vec<LogKey>, SVError> {
    let mut logs = Vec::with_capacity(entries.len());
    for entry in entries {
        let der = decode_base64(&entry.public_key.raw_bytes, "public key")?;
        let log_id = decode_base64(&entry.log_id.key_id, "log id")?;
        let public_key = match PublicKey::from_spki_der(&der) {
            Ok(pk) => pk,
            Err(SVError::UnsupportedAlgorithm(alg)) => {
                log::warn!(
                    "Skipping {} {} with unsupported key ({}, {})",
                    kind,
                    entry.base_url,
                    entry.public_key.key_details.as_deref().unwrap_or("unknown"),
                    alg
                );
                continue;
            }
            Err(e) => {
                return Err(SVError::TrustRootMalformed(format!(
                    "Invalid {} key for {}: {}",
                    kind, entry.base_url, e
                )))
            }
        };
        logs.push(LogKey {
            base_url: entry.base_url.clone(),
            log_id,
            public_key,
            valid_for: convert_validity(entry.public_key.valid_for.as_ref())?,
        });
    }
    Ok(logs)
}

fn convert_validity(entry: Option<&ValidForEntry>) -> Result<Option<ValidityPeriod>, SVError> {
    let Some(entry) = entry else {
        return Ok(None);
    };
    let parse = |s: &str| {
        parse_rfc3339(s).map_err(|e| SVError::TrustRootMalformed(e.to_string()))
    };
    let start = entry.start.as_deref().map(parse).transpose()?;
    let end = entry.end.as_deref().map(parse).transpose()?;
    Ok(Some(ValidityPeriod { start, end }))
}

fn decode_base64(s: &str, what: &str) -> Result<Vec<u8>, SVError> {
    STANDARD
        .decode(s)
        .map_err(|e| SVError::TrustRootMalformed(format!("Invalid base64 in {}: {}", what, e)))
}
