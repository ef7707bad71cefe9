//! Keyless verification of a complete bundle, from JSON bytes through the
//! `Verifier` entry point, against a trust root served by a fetcher.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::SigningKey;
use p256::pkcs8::EncodePrivateKey;
use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use sha2::{Digest, Sha256};
use sigver::keyless::bundle::TlogEntry;
use sigver::keyless::sct::{self, SignedCertificateTimestamp};
use sigver::keyless::{merkle, tlog};
use x509_cert::der::asn1::OctetString;
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;
use sigver::trust_root::{StaticFetcher, TRUSTED_ROOT_TARGET};
use sigver::{
    CertificateIdentity, KeylessVerifier, PublicKey, SVError, TrustRootProvider,
    VerificationMode, VerificationPolicy, Verifier,
};
use std::sync::Arc;

const ARTIFACT: &[u8] = b"release artifact";
/// 2024-07-01T00:05:00Z, inside the leaf certificate's validity
const INTEGRATED_TIME: i64 = 1719792300;

struct Fixture {
    root_der: Vec<u8>,
    leaf_der: Vec<u8>,
    leaf_key: SigningKey,
    log_key: SigningKey,
}

fn ct_log_key() -> SigningKey {
    SigningKey::from_slice(&[0x34; 32]).unwrap()
}

fn ct_public_key() -> PublicKey {
    PublicKey::from_p256(p256::ecdsa::VerifyingKey::from(&ct_log_key())).unwrap()
}

/// SCT list extension content for the final form of `precert_der`.
fn sct_extension(precert_der: &[u8], issuer_der: &[u8]) -> Vec<u8> {
    let precert = Certificate::from_der(precert_der).unwrap();
    let issuer = Certificate::from_der(issuer_der).unwrap();
    let issuer_key_hash: [u8; 32] = Sha256::digest(
        issuer.tbs_certificate.subject_public_key_info.to_der().unwrap(),
    )
    .into();

    let mut sct = SignedCertificateTimestamp {
        log_id: Sha256::digest(ct_public_key().spki_der()).to_vec(),
        timestamp: INTEGRATED_TIME as u64 * 1000 - 60_000,
        extensions: vec![],
        hash_algorithm: 4,
        signature_algorithm: 3,
        signature: vec![],
    };
    let tbs = precert.tbs_certificate.to_der().unwrap();
    let data = sct::signed_data(&sct, &issuer_key_hash, &tbs).unwrap();
    let sig: p256::ecdsa::Signature = ct_log_key().sign(&data);
    sct.signature = sig.to_der().as_bytes().to_vec();

    let mut encoded = vec![0u8];
    encoded.extend_from_slice(&sct.log_id);
    encoded.extend_from_slice(&sct.timestamp.to_be_bytes());
    encoded.extend_from_slice(&[0, 0, 4, 3]);
    encoded.extend_from_slice(&(sct.signature.len() as u16).to_be_bytes());
    encoded.extend_from_slice(&sct.signature);
    let mut list = ((encoded.len() + 2) as u16).to_be_bytes().to_vec();
    list.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
    list.extend_from_slice(&encoded);
    OctetString::new(list).unwrap().to_der().unwrap()
}

fn der_utf8(s: &str) -> Vec<u8> {
    let mut out = vec![0x0c, s.len() as u8];
    out.extend_from_slice(s.as_bytes());
    out
}

fn fixture() -> Fixture {
    let ca_key = KeyPair::generate().unwrap();
    let mut ca_params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "e2e root");
    ca_params.distinguished_name = dn;
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign];
    ca_params.not_before = rcgen::date_time_ymd(2023, 1, 1);
    ca_params.not_after = rcgen::date_time_ymd(2033, 1, 1);
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let leaf_key = SigningKey::from_slice(&[0x31; 32]).unwrap();
    let leaf_kp = KeyPair::try_from(leaf_key.to_pkcs8_der().unwrap().as_bytes()).unwrap();
    let mut leaf_params = CertificateParams::default();
    leaf_params.distinguished_name = DistinguishedName::new();
    leaf_params.is_ca = IsCa::ExplicitNoCa;
    leaf_params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::CodeSigning];
    leaf_params.subject_alt_names = vec![SanType::URI(
        "https://github.com/acme/app/.github/workflows/release.yml@refs/heads/main"
            .try_into()
            .unwrap(),
    )];
    leaf_params.custom_extensions = vec![CustomExtension::from_oid_content(
        &[1, 3, 6, 1, 4, 1, 57264, 1, 8],
        der_utf8("https://token.actions.githubusercontent.com"),
    )];
    leaf_params.not_before = rcgen::date_time_ymd(2024, 7, 1);
    leaf_params.not_after = leaf_params.not_before + std::time::Duration::from_secs(600);
    leaf_params.serial_number = Some(SerialNumber::from_slice(&[0x0e, 0x2e]));
    let precert = leaf_params.clone().signed_by(&leaf_kp, &ca_cert, &ca_key).unwrap();
    leaf_params.custom_extensions.push(CustomExtension::from_oid_content(
        &[1, 3, 6, 1, 4, 1, 11129, 2, 4, 2],
        sct_extension(precert.der(), ca_cert.der()),
    ));
    let leaf_cert = leaf_params.signed_by(&leaf_kp, &ca_cert, &ca_key).unwrap();

    Fixture {
        root_der: ca_cert.der().to_vec(),
        leaf_der: leaf_cert.der().to_vec(),
        leaf_key,
        log_key: SigningKey::from_slice(&[0x32; 32]).unwrap(),
    }
}

fn log_public_key(f: &Fixture) -> PublicKey {
    PublicKey::from_p256(p256::ecdsa::VerifyingKey::from(&f.log_key)).unwrap()
}

fn log_id(f: &Fixture) -> Vec<u8> {
    Sha256::digest(log_public_key(f).spki_der()).to_vec()
}

fn trusted_root_json(f: &Fixture) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "mediaType": "application/vnd.dev.sigstore.trustedroot+json;version=0.1",
        "tlogs": [{
            "baseUrl": "https://rekor.example.com",
            "hashAlgorithm": "SHA2_256",
            "publicKey": {
                "rawBytes": STANDARD.encode(log_public_key(f).spki_der()),
                "keyDetails": "PKIX_ECDSA_P256_SHA_256",
                "validFor": { "start": "2023-01-01T00:00:00Z" },
            },
            "logId": { "keyId": STANDARD.encode(log_id(f)) },
        }],
        "certificateAuthorities": [{
            "subject": { "organization": "e2e", "commonName": "e2e root" },
            "uri": "https://fulcio.example.com",
            "certChain": { "certificates": [{ "rawBytes": STANDARD.encode(&f.root_der) }] },
            "validFor": { "start": "2023-01-01T00:00:00Z" },
        }],
        "ctlogs": [{
            "baseUrl": "https://ct.example.com",
            "hashAlgorithm": "SHA2_256",
            "publicKey": {
                "rawBytes": STANDARD.encode(ct_public_key().spki_der()),
                "keyDetails": "PKIX_ECDSA_P256_SHA_256",
                "validFor": { "start": "2023-01-01T00:00:00Z" },
            },
            "logId": { "keyId": STANDARD.encode(Sha256::digest(ct_public_key().spki_der())) },
        }],
        "timestampAuthorities": [],
    }))
    .unwrap()
}

/// A v0.3 message-signature bundle logged at index 1 of a two-leaf tree.
fn bundle_json(f: &Fixture, signature: &[u8]) -> Vec<u8> {
    let digest = Sha256::digest(ARTIFACT).to_vec();
    let cert_pem = pem::encode(&pem::Pem::new("CERTIFICATE", f.leaf_der.clone()));
    let body = serde_json::to_vec(&serde_json::json!({
        "apiVersion": "0.0.1",
        "kind": "hashedrekord",
        "spec": {
            "data": { "hash": { "algorithm": "sha256", "value": hex::encode(&digest) } },
            "signature": {
                "content": STANDARD.encode(signature),
                "publicKey": { "content": STANDARD.encode(cert_pem) },
            },
        },
    }))
    .unwrap();

    let mut entry = TlogEntry {
        log_index: 41,
        log_id: log_id(f),
        kind: "hashedrekord".to_string(),
        kind_version: "0.0.1".to_string(),
        integrated_time: INTEGRATED_TIME,
        signed_entry_timestamp: None,
        inclusion_proof: None,
        canonicalized_body: body,
    };
    let set: p256::ecdsa::Signature = f.log_key.sign(&tlog::set_payload(&entry).unwrap());
    entry.signed_entry_timestamp = Some(set.to_der().as_bytes().to_vec());

    let sibling = merkle::compute_leaf_hash(b"earlier entry");
    let leaf = merkle::compute_leaf_hash(&entry.canonicalized_body);
    let root = merkle::compute_node_hash(&sibling, &leaf);

    let note = format!("rekor.example.com - 1\n2\n{}\n", STANDARD.encode(root));
    let note_sig: p256::ecdsa::Signature = f.log_key.sign(note.as_bytes());
    let mut raw = entry.log_id[..4].to_vec();
    raw.extend_from_slice(note_sig.to_der().as_bytes());
    let checkpoint = format!("{}\n\u{2014} rekor.example.com {}\n", note, STANDARD.encode(raw));

    serde_json::to_vec(&serde_json::json!({
        "mediaType": "application/vnd.dev.sigstore.bundle.v0.3+json",
        "verificationMaterial": {
            "certificate": { "rawBytes": STANDARD.encode(&f.leaf_der) },
            "tlogEntries": [{
                "logIndex": "41",
                "logId": { "keyId": STANDARD.encode(&entry.log_id) },
                "kindVersion": { "kind": "hashedrekord", "version": "0.0.1" },
                "integratedTime": INTEGRATED_TIME.to_string(),
                "inclusionPromise": {
                    "signedEntryTimestamp": STANDARD.encode(entry.signed_entry_timestamp.as_ref().unwrap()),
                },
                "inclusionProof": {
                    "logIndex": "1",
                    "rootHash": STANDARD.encode(root),
                    "treeSize": "2",
                    "hashes": [STANDARD.encode(sibling)],
                    "checkpoint": { "envelope": checkpoint },
                },
                "canonicalizedBody": STANDARD.encode(&entry.canonicalized_body),
            }],
        },
        "messageSignature": {
            "messageDigest": { "algorithm": "SHA2_256", "digest": STANDARD.encode(&digest) },
            "signature": STANDARD.encode(signature),
        },
    }))
    .unwrap()
}

fn artifact_signature(f: &Fixture) -> Vec<u8> {
    let sig: p256::ecdsa::Signature = f.leaf_key.sign(ARTIFACT);
    sig.to_der().as_bytes().to_vec()
}

fn provider(f: &Fixture) -> Arc<TrustRootProvider> {
    let fetcher = StaticFetcher::new().with_target(TRUSTED_ROOT_TARGET, trusted_root_json(f));
    Arc::new(TrustRootProvider::new(Arc::new(fetcher)))
}

fn strict_policy() -> VerificationPolicy {
    VerificationPolicy::default()
        .with_identity(CertificateIdentity::github_actions("acme"))
        .with_artifact_digest(Sha256::digest(ARTIFACT).to_vec())
}

#[test]
fn keyless_bundle_verifies_end_to_end() {
    let f = fixture();
    let verifier = Verifier::keyless(provider(&f), strict_policy());
    assert_eq!(verifier.mode(), VerificationMode::Keyless);

    let identities = verifier.verify(&bundle_json(&f, &artifact_signature(&f))).unwrap();
    assert!(identities.is_empty());
}

#[test]
fn keyless_outcome_reports_signer() {
    let f = fixture();
    let verifier = KeylessVerifier::new(provider(&f), strict_policy());
    let outcome = verifier.verify(&bundle_json(&f, &artifact_signature(&f))).unwrap();

    assert!(outcome.identity.subject.starts_with("https://github.com/acme/app/"));
    assert_eq!(
        outcome.identity.issuer.as_deref(),
        Some("https://token.actions.githubusercontent.com")
    );
    assert_eq!(outcome.authority, "https://fulcio.example.com");
    assert_eq!(outcome.entries.len(), 1);
    assert!(outcome.entries[0].inclusion_proven);
    assert_eq!(outcome.timestamps, vec![INTEGRATED_TIME]);
    assert_eq!(outcome.ct_logs, 1);
}

#[test]
fn keyless_rejections_are_verification_failures() {
    let f = fixture();

    let other_org = VerificationPolicy::default()
        .with_identity(CertificateIdentity::github_actions("someone-else"));
    let verifier = Verifier::keyless(provider(&f), other_org);
    assert!(matches!(
        verifier.verify(&bundle_json(&f, &artifact_signature(&f))),
        Err(SVError::VerificationFailed(_))
    ));

    let forged: p256::ecdsa::Signature = f.leaf_key.sign(b"a different artifact");
    let verifier = Verifier::keyless(provider(&f), strict_policy());
    assert!(matches!(
        verifier.verify(&bundle_json(&f, forged.to_der().as_bytes())),
        Err(SVError::VerificationFailed(_))
    ));
}

#[test]
fn malformed_bundle_is_reported_after_trust_root() {
    let f = fixture();
    let verifier = Verifier::keyless(provider(&f), strict_policy());
    assert!(matches!(
        verifier.verify(b"{\"mediaType\": \"application/vnd.dev.sigstore.bundle.v0.3+json\"}"),
        Err(SVError::MalformedBundle(_))
    ));
}
