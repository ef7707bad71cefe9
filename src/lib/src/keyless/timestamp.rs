//! RFC 3161 signed timestamps
//!
//! A timestamp authority countersigns the bundle signature. The token is a
//! CMS SignedData whose encapsulated TSTInfo carries the generation time and
//! the SHA-256 imprint of the signature bytes; the authority signs the
//! token's signed attributes, which bind the TSTInfo by digest. The signing
//! certificate must chain to a timestamp authority of the trust root at the
//! generation time and carry the time-stamping extended key usage.

use crate::error::SVError;
use crate::keyless::cert;
use crate::signature::{self, sha256, HashAlgorithm, PublicKey};
use crate::trust_root::TrustRootMaterial;
use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo};
use rustls_pki_types::CertificateDer;
use webpki::EndEntityCert;
use x509_cert::der::asn1::{ObjectIdentifier, OctetString};
use x509_cert::der::{Any, Decode, Encode, Tag, Tagged};
use x509_cert::ext::pkix::SubjectKeyIdentifier;
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

const OID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const OID_TST_INFO: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");
const OID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
const OID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
const OID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
const OID_SUBJECT_KEY_ID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.14");

/// id-kp-timeStamping (1.3.6.1.5.5.7.3.8)
const EKU_TIME_STAMPING: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x08];

/// PKIStatus granted, grantedWithMods
const STATUS_GRANTED: u32 = 0;
const STATUS_GRANTED_WITH_MODS: u32 = 1;

/// A timestamp that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedTimestamp {
    /// Generation time, seconds since the epoch
    pub time: i64,
    /// URI of the timestamp authority the signer chains to
    pub authority: String,
}

fn invalid(msg: impl Into<String>) -> SVError {
    SVError::VerificationFailed(format!("Signed timestamp: {}", msg.into()))
}

/// Verify a DER `TimeStampResp` or bare timestamp token over `signature`.
pub fn verify_timestamp(
    token: &[u8],
    signature: &[u8],
    trust_root: &TrustRootMaterial,
) -> Result<VerifiedTimestamp, SVError> {
    let content_info = content_info(token)?;
    if content_info.content_type != OID_SIGNED_DATA {
        return Err(invalid(format!(
            "unexpected content type {}",
            content_info.content_type
        )));
    }
    let signed_data = SignedData::from_der(&content_info.content.to_der()?)?;

    let encap = &signed_data.encap_content_info;
    if encap.econtent_type != OID_TST_INFO {
        return Err(invalid(format!(
            "unexpected encapsulated content {}",
            encap.econtent_type
        )));
    }
    let econtent = encap
        .econtent
        .as_ref()
        .ok_or_else(|| invalid("token carries no TSTInfo"))?;
    let tst_info = OctetString::from_der(&econtent.to_der()?)?;
    let tst_info = tst_info.as_bytes();

    let (imprint, time) = parse_tst_info(tst_info)?;
    if imprint != sha256(signature) {
        return Err(invalid("message imprint does not match the signature"));
    }

    let embedded: Vec<Certificate> = signed_data
        .certificates
        .iter()
        .flat_map(|set| set.0.iter())
        .filter_map(|choice| match choice {
            CertificateChoices::Certificate(c) => Some(c.clone()),
            _ => None,
        })
        .collect();
    let embedded_der = embedded
        .iter()
        .map(|c| c.to_der())
        .collect::<Result<Vec<_>, _>>()?;

    let mut last_error = None;
    for signer in signed_data.signer_infos.0.iter() {
        match verify_signer(signer, tst_info, &embedded, &embedded_der, trust_root, time) {
            Ok(authority) => {
                log::debug!("Signed timestamp {} from {}", time, authority);
                return Ok(VerifiedTimestamp { time, authority });
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| invalid("token has no signer")))
}

/// Unwrap a `TimeStampResp`, or take `bytes` as the token itself.
fn content_info(bytes: &[u8]) -> Result<ContentInfo, SVError> {
    if let Ok(ci) = ContentInfo::from_der(bytes) {
        return Ok(ci);
    }
    let response = Vec::<Any>::from_der(bytes)?;
    let (status, token) = match response.as_slice() {
        [status, token] => (status, token),
        [_] => return Err(invalid("response carries no token")),
        _ => return Err(invalid("malformed response")),
    };
    let status_info = Vec::<Any>::from_der(&status.to_der()?)?;
    let code = status_info
        .first()
        .ok_or_else(|| invalid("empty status"))
        .and_then(|s| Ok(u32::from_der(&s.to_der()?)?))?;
    if code != STATUS_GRANTED && code != STATUS_GRANTED_WITH_MODS {
        return Err(invalid(format!("authority refused the request ({})", code)));
    }
    Ok(ContentInfo::from_der(&token.to_der()?)?)
}

/// Message imprint and generation time of a TSTInfo.
fn parse_tst_info(der: &[u8]) -> Result<(Vec<u8>, i64), SVError> {
    let fields = Vec::<Any>::from_der(der)?;
    if fields.len() < 5 {
        return Err(invalid("truncated TSTInfo"));
    }

    let imprint = Vec::<Any>::from_der(&fields[2].to_der()?)?;
    let [algorithm, digest] = imprint.as_slice() else {
        return Err(invalid("malformed message imprint"));
    };
    let algorithm = AlgorithmIdentifierOwned::from_der(&algorithm.to_der()?)?;
    if algorithm.oid != OID_SHA256 {
        return Err(SVError::UnsupportedAlgorithm(format!(
            "timestamp imprint {}",
            algorithm.oid
        )));
    }
    let digest = OctetString::from_der(&digest.to_der()?)?;

    let gen_time = &fields[4];
    if gen_time.tag() != Tag::GeneralizedTime {
        return Err(invalid("genTime is not a GeneralizedTime"));
    }
    Ok((digest.as_bytes().to_vec(), parse_generalized_time(gen_time.value())?))
}

// Fractional seconds are allowed in genTime.
fn parse_generalized_time(value: &[u8]) -> Result<i64, SVError> {
    let text = std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.strip_suffix('Z'))
        .ok_or_else(|| invalid("genTime is not in UTC"))?;
    let time = chrono::NaiveDateTime::parse_from_str(text, "%Y%m%d%H%M%S%.f")
        .map_err(|e| invalid(format!("bad genTime {}: {}", text, e)))?;
    Ok(time.and_utc().timestamp())
}

fn verify_signer(
    signer: &SignerInfo,
    tst_info: &[u8],
    embedded: &[Certificate],
    embedded_der: &[Vec<u8>],
    trust_root: &TrustRootMaterial,
    time: i64,
) -> Result<String, SVError> {
    if signer.digest_alg.oid != OID_SHA256 {
        return Err(SVError::UnsupportedAlgorithm(format!(
            "timestamp digest {}",
            signer.digest_alg.oid
        )));
    }
    let attrs = signer
        .signed_attrs
        .as_ref()
        .ok_or_else(|| invalid("signer has no signed attributes"))?;

    let attribute = |oid: ObjectIdentifier| {
        attrs
            .iter()
            .find(|a| a.oid == oid)
            .and_then(|a| a.values.iter().next())
            .ok_or_else(|| invalid(format!("missing signed attribute {}", oid)))
    };
    let content_type = ObjectIdentifier::from_der(&attribute(OID_CONTENT_TYPE)?.to_der()?)?;
    if content_type != OID_TST_INFO {
        return Err(invalid("signed content type is not TSTInfo"));
    }
    let digest = OctetString::from_der(&attribute(OID_MESSAGE_DIGEST)?.to_der()?)?;
    if digest.as_bytes() != sha256(tst_info) {
        return Err(invalid("signed attributes do not match the TSTInfo"));
    }
    let signed = attrs.to_der()?;

    let trusted: Vec<Certificate> = trust_root
        .timestamp_authorities
        .iter()
        .flat_map(|tsa| tsa.chain.iter())
        .filter_map(|der| Certificate::from_der(der).ok())
        .collect();
    let signer_cert = embedded
        .iter()
        .chain(trusted.iter())
        .find(|c| identifies(&signer.sid, c))
        .ok_or_else(|| invalid("signing certificate not found"))?;

    let key = PublicKey::from_spki_der(
        &signer_cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()?,
    )?;
    signature::verify(
        &key,
        HashAlgorithm::Sha256,
        &signed,
        signer.signature.as_bytes(),
    )?;

    let leaf = signer_cert.to_der()?;
    let leaf = CertificateDer::from(leaf.as_slice());
    let end_entity = EndEntityCert::try_from(&leaf)
        .map_err(|e| invalid(format!("bad signing certificate: {:?}", e)))?;
    cert::chain_at(
        &end_entity,
        embedded_der,
        &trust_root.timestamp_authorities,
        EKU_TIME_STAMPING,
        time,
    )
}

fn identifies(sid: &SignerIdentifier, cert: &Certificate) -> bool {
    let tbs = &cert.tbs_certificate;
    match sid {
        SignerIdentifier::IssuerAndSerialNumber(isn) => {
            isn.issuer == tbs.issuer && isn.serial_number == tbs.serial_number
        }
        SignerIdentifier::SubjectKeyIdentifier(ski) => tbs
            .extensions
            .iter()
            .flatten()
            .find(|ext| ext.extn_id == OID_SUBJECT_KEY_ID)
            .and_then(|ext| SubjectKeyIdentifier::from_der(ext.extn_value.as_bytes()).ok())
            .is_some_and(|id| id.0 == ski.0),
    }
}
