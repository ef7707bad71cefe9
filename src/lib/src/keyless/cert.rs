//! Signing certificate checks
//!
//! A keyless signing certificate must chain to one of the trust root's
//! certificate authorities at the time the signature was observed, and carry
//! the code-signing extended key usage. Chain building and signature checks
//! are done by rustls-webpki; identity fields are read with x509-parser.

use crate::error::SVError;
use crate::signature::PublicKey;
use crate::trust_root::{CertificateAuthority, TrustRootMaterial};
use rustls_pki_types::{CertificateDer, UnixTime};
use std::time::Duration;
use webpki::{EndEntityCert, KeyUsage};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

/// id-kp-codeSigning (1.3.6.1.5.5.7.3.3)
const EKU_CODE_SIGNING: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x03];

/// Fulcio OIDC issuer, DER UTF8String
const OID_FULCIO_ISSUER_V2: &str = "1.3.6.1.4.1.57264.1.8";

/// Fulcio OIDC issuer, raw UTF-8 (deprecated)
const OID_FULCIO_ISSUER_V1: &str = "1.3.6.1.4.1.57264.1.1";

/// Who a Fulcio certificate was issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerIdentity {
    /// First e-mail, URI or DNS name of the subject alternative names
    pub subject: String,
    /// OIDC issuer that authenticated the subject
    pub issuer: Option<String>,
}

/// Fields of a leaf certificate the verifier needs.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub identity: SignerIdentity,
    pub public_key: PublicKey,
    pub not_before: i64,
    pub not_after: i64,
}

/// Parse the leaf certificate of a bundle.
pub fn inspect_certificate(der: &[u8]) -> Result<CertificateInfo, SVError> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| {
        SVError::VerificationFailed(format!("Failed to parse X.509 certificate: {}", e))
    })?;

    let public_key = PublicKey::from_spki_der(cert.public_key().raw)?;
    let validity = cert.validity();

    Ok(CertificateInfo {
        identity: SignerIdentity {
            subject: subject_of(&cert)?,
            issuer: oidc_issuer_of(&cert),
        },
        public_key,
        not_before: validity.not_before.timestamp(),
        not_after: validity.not_after.timestamp(),
    })
}

fn subject_of(cert: &X509Certificate<'_>) -> Result<String, SVError> {
    if let Some(san) = cert.subject_alternative_name()? {
        for name in &san.value.general_names {
            match name {
                GeneralName::RFC822Name(email) => return Ok(email.to_string()),
                GeneralName::URI(uri) => return Ok(uri.to_string()),
                GeneralName::DNSName(dns) => return Ok(dns.to_string()),
                _ => continue,
            }
        }
    }
    Err(SVError::VerificationFailed(
        "Certificate has no usable subject alternative name".to_string(),
    ))
}

fn oidc_issuer_of(cert: &X509Certificate<'_>) -> Option<String> {
    let mut legacy = None;
    for ext in cert.extensions() {
        match ext.oid.to_id_string().as_str() {
            OID_FULCIO_ISSUER_V2 => {
                if let Ok((_, obj)) = x509_parser::der_parser::der::parse_der_utf8string(ext.value)
                {
                    if let Ok(issuer) = obj.as_str() {
                        return Some(issuer.to_string());
                    }
                }
            }
            OID_FULCIO_ISSUER_V1 => {
                legacy = std::str::from_utf8(ext.value).ok().map(str::to_string);
            }
            _ => {}
        }
    }
    legacy
}

/// Outcome of a successful chain check.
#[derive(Debug, Clone)]
pub struct VerifiedCertificate {
    pub info: CertificateInfo,
    /// URI of the certificate authority the chain ended at
    pub authority: String,
}

/// Check that `leaf` chains to a trusted certificate authority at every
/// instant of `times`.
///
/// `extra_intermediates` are the certificates that followed the leaf in the
/// bundle. Each instant may be anchored by a different authority, since
/// authorities rotate; the one used for the first instant is reported.
pub fn verify_certificate(
    leaf: &[u8],
    extra_intermediates: &[Vec<u8>],
    trust_root: &TrustRootMaterial,
    times: &[i64],
) -> Result<VerifiedCertificate, SVError> {
    if times.is_empty() {
        return Err(SVError::VerificationFailed(
            "No time to verify the certificate at".to_string(),
        ));
    }

    let info = inspect_certificate(leaf)?;
    let leaf_der = CertificateDer::from(leaf);
    let end_entity = EndEntityCert::try_from(&leaf_der).map_err(|e| {
        SVError::VerificationFailed(format!("Failed to parse certificate: {:?}", e))
    })?;

    let mut authority = None;
    for &t in times {
        let uri = chain_at(
            &end_entity,
            extra_intermediates,
            &trust_root.certificate_authorities,
            EKU_CODE_SIGNING,
            t,
        )?;
        if authority.is_none() {
            authority = Some(uri);
        }
    }

    Ok(VerifiedCertificate {
        info,
        authority: authority.unwrap_or_default(),
    })
}

/// Chain `end_entity`, which must carry `eku`, to one of `authorities`
/// valid at `t`. Returns the URI of the authority that anchored it.
pub(crate) fn chain_at(
    end_entity: &EndEntityCert<'_>,
    extra_intermediates: &[Vec<u8>],
    authorities: &[CertificateAuthority],
    eku: &'static [u8],
    t: i64,
) -> Result<String, SVError> {
    let secs = u64::try_from(t).map_err(|_| {
        SVError::VerificationFailed(format!("Invalid verification time: {}", t))
    })?;
    let time = UnixTime::since_unix_epoch(Duration::from_secs(secs));

    let mut last_error = None;
    for ca in authorities.iter().filter(|ca| ca.is_valid_at(t))
    {
        let Some(root) = ca.root() else { continue };
        let root_der = CertificateDer::from(root);
        let anchor = match webpki::anchor_from_trusted_cert(&root_der) {
            Ok(anchor) => anchor,
            Err(e) => {
                log::warn!("Skipping certificate authority {}: {:?}", ca.uri, e);
                continue;
            }
        };
        let anchors = [anchor];
        let intermediates: Vec<CertificateDer<'_>> = extra_intermediates
            .iter()
            .chain(ca.intermediates())
            .map(|c| CertificateDer::from(c.as_slice()))
            .collect();

        let result = end_entity
            .verify_for_usage(
                webpki::ALL_VERIFICATION_ALGS,
                &anchors,
                &intermediates,
                time,
                KeyUsage::required(eku),
                None,
                None,
            )
            .map(|_| ());
        match result {
            Ok(()) => {
                log::debug!("Certificate chains to {} at {}", ca.uri, t);
                return Ok(ca.uri.clone());
            }
            Err(e) => last_error = Some(format!("{:?}", e)),
        }
    }

    Err(SVError::VerificationFailed(match last_error {
        Some(e) => format!("Certificate chain verification failed at {}: {}", t, e),
        None => format!("No certificate authority is valid at {}", t),
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::keyless::sct::tests::{ct_log, sct_extension};
    use crate::trust_root::ValidityPeriod;
    use p256::pkcs8::EncodePrivateKey;
    use rcgen::{
        BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType,
        ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
    };

    /// 2023-01-01T00:00:00Z
    pub(crate) const CA_NOT_BEFORE: i64 = 1672531200;
    /// 2024-07-01T00:00:00Z
    pub(crate) const LEAF_NOT_BEFORE: i64 = 1719792000;
    /// 2024-07-01T00:10:00Z
    pub(crate) const LEAF_NOT_AFTER: i64 = 1719792600;
    /// A time inside the leaf's validity window
    pub(crate) const SIGNED_AT: i64 = 1719792300;

    pub(crate) const SIGNER_EMAIL: &str = "signer@example.com";
    pub(crate) const SIGNER_ISSUER: &str = "https://accounts.example.com";

    /// A certificate authority and a leaf it issued, with an SCT from
    /// the test CT log embedded.
    pub(crate) struct TestPki {
        pub root_der: Vec<u8>,
        pub leaf_der: Vec<u8>,
        pub leaf_key: p256::ecdsa::SigningKey,
    }

    fn der_utf8(s: &str) -> Vec<u8> {
        let mut out = vec![0x0c, s.len() as u8];
        out.extend_from_slice(s.as_bytes());
        out
    }

    pub(crate) fn test_pki() -> TestPki {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, "sigver test");
        dn.push(DnType::CommonName, "sigver test root");
        ca_params.distinguished_name = dn;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        ca_params.not_before = rcgen::date_time_ymd(2023, 1, 1);
        ca_params.not_after = rcgen::date_time_ymd(2033, 1, 1);
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = p256::ecdsa::SigningKey::from_slice(&[0x11; 32]).unwrap();
        let leaf_pkcs8 = leaf_key.to_pkcs8_der().unwrap();
        let leaf_kp = KeyPair::try_from(leaf_pkcs8.as_bytes()).unwrap();

        let mut leaf_params = CertificateParams::default();
        leaf_params.distinguished_name = DistinguishedName::new();
        leaf_params.is_ca = IsCa::ExplicitNoCa;
        leaf_params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::CodeSigning];
        leaf_params.subject_alt_names =
            vec![SanType::Rfc822Name(SIGNER_EMAIL.try_into().unwrap())];
        leaf_params.custom_extensions = vec![CustomExtension::from_oid_content(
            &[1, 3, 6, 1, 4, 1, 57264, 1, 8],
            der_utf8(SIGNER_ISSUER),
        )];
        leaf_params.not_before = rcgen::date_time_ymd(2024, 7, 1);
        leaf_params.not_after =
            leaf_params.not_before + std::time::Duration::from_secs(600);
        leaf_params.serial_number = Some(SerialNumber::from_slice(&[0x5c, 0x71]));
        let precert = leaf_params.clone().signed_by(&leaf_kp, &ca_cert, &ca_key).unwrap();

        leaf_params.custom_extensions.push(CustomExtension::from_oid_content(
            &[1, 3, 6, 1, 4, 1, 11129, 2, 4, 2],
            sct_extension(precert.der(), ca_cert.der()),
        ));
        let leaf_cert = leaf_params.signed_by(&leaf_kp, &ca_cert, &ca_key).unwrap();

        TestPki {
            root_der: ca_cert.der().to_vec(),
            leaf_der: leaf_cert.der().to_vec(),
            leaf_key,
        }
    }

    pub(crate) fn trust_root_with(root_der: &[u8]) -> TrustRootMaterial {
        TrustRootMaterial {
            format_version: "application/vnd.dev.sigstore.trustedroot+json;version=0.1".to_string(),
            certificate_authorities: vec![CertificateAuthority {
                name: "sigver test".to_string(),
                uri: "https://ca.example.com".to_string(),
                chain: vec![root_der.to_vec()],
                valid_for: Some(ValidityPeriod {
                    start: Some(CA_NOT_BEFORE),
                    end: None,
                }),
            }],
            transparency_logs: vec![],
            ct_logs: vec![ct_log()],
            timestamp_authorities: vec![],
        }
    }

    #[test]
    fn test_inspect_certificate() {
        let pki = test_pki();
        let info = inspect_certificate(&pki.leaf_der).unwrap();
        assert_eq!(info.identity.subject, SIGNER_EMAIL);
        assert_eq!(info.identity.issuer.as_deref(), Some(SIGNER_ISSUER));
        assert_eq!(info.not_before, LEAF_NOT_BEFORE);
        assert_eq!(info.not_after, LEAF_NOT_AFTER);
        let expected = PublicKey::from_p256(p256::ecdsa::VerifyingKey::from(&pki.leaf_key)).unwrap();
        assert_eq!(info.public_key, expected);
    }

    #[test]
    fn test_chain_verifies_inside_validity() {
        let pki = test_pki();
        let root = trust_root_with(&pki.root_der);
        let verified =
            verify_certificate(&pki.leaf_der, &[], &root, &[SIGNED_AT, LEAF_NOT_BEFORE + 1])
                .unwrap();
        assert_eq!(verified.authority, "https://ca.example.com");
        assert_eq!(verified.info.identity.subject, SIGNER_EMAIL);
    }

    #[test]
    fn test_chain_rejected_outside_validity() {
        let pki = test_pki();
        let root = trust_root_with(&pki.root_der);
        let err = verify_certificate(&pki.leaf_der, &[], &root, &[LEAF_NOT_AFTER + 3600])
            .unwrap_err();
        assert!(matches!(err, SVError::VerificationFailed(_)));

        // One bad instant is enough to fail
        assert!(
            verify_certificate(&pki.leaf_der, &[], &root, &[SIGNED_AT, LEAF_NOT_AFTER + 3600])
                .is_err()
        );
        assert!(verify_certificate(&pki.leaf_der, &[], &root, &[]).is_err());
    }

    #[test]
    fn test_chain_rejected_for_untrusted_or_expired_authority() {
        let pki = test_pki();
        let other = test_pki();
        let root = trust_root_with(&other.root_der);
        assert!(verify_certificate(&pki.leaf_der, &[], &root, &[SIGNED_AT]).is_err());

        let mut root = trust_root_with(&pki.root_der);
        root.certificate_authorities[0].valid_for = Some(ValidityPeriod {
            start: Some(CA_NOT_BEFORE),
            end: Some(LEAF_NOT_BEFORE - 1),
        });
        let err = verify_certificate(&pki.leaf_der, &[], &root, &[SIGNED_AT]).unwrap_err();
        assert!(err.to_string().contains("No certificate authority"));
    }

    #[test]
    fn test_garbage_certificate() {
        assert!(matches!(
            inspect_certificate(b"not a certificate"),
            Err(SVError::VerificationFailed(_))
        ));
    }
}
