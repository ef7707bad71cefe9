//! Cryptographic signature validation.
//!
//! Validation is pure: no logging, no state. Callers decide what to report.

use crate::error::SVError;
use crate::signature::hash::HashAlgorithm;
use crate::signature::keys::{KeyMaterial, PublicKey};
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::signature::Verifier;

/// Verify `signature` over `message` with `key`.
///
/// `algorithm` is the digest paired with the signature. Only SHA-256 is
/// supported; any other value fails with [`SVError::UnsupportedAlgorithm`]
/// before the signature is looked at.
pub fn verify(
    key: &PublicKey,
    algorithm: HashAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> Result<(), SVError> {
    require_sha256(algorithm)?;
    match key.material() {
        KeyMaterial::EcdsaP256(vk) => {
            let sig = ecdsa_signature(signature)?;
            vk.verify(message, &sig)
                .map_err(|_| SVError::SignatureInvalid("ECDSA verification failed".to_string()))
        }
        KeyMaterial::Ed25519(pk) => {
            let sig = ed25519_compact::Signature::from_slice(signature).map_err(|_| {
                SVError::SignatureInvalid(format!(
                    "Ed25519 signature must be 64 bytes, got {}",
                    signature.len()
                ))
            })?;
            pk.verify(message, &sig)
                .map_err(|_| SVError::SignatureInvalid("Ed25519 verification failed".to_string()))
        }
    }
}

/// Verify `signature` over an already computed `digest`.
///
/// Only ECDSA keys can verify a prehashed message; Ed25519 always hashes the
/// full message itself.
pub fn verify_prehashed(
    key: &PublicKey,
    algorithm: HashAlgorithm,
    digest: &[u8],
    signature: &[u8],
) -> Result<(), SVError> {
    require_sha256(algorithm)?;
    if digest.len() != algorithm.digest_len() {
        return Err(SVError::SignatureInvalid(format!(
            "Digest length {} does not match {}",
            digest.len(),
            algorithm
        )));
    }
    match key.material() {
        KeyMaterial::EcdsaP256(vk) => {
            let sig = ecdsa_signature(signature)?;
            vk.verify_prehash(digest, &sig)
                .map_err(|_| SVError::SignatureInvalid("ECDSA verification failed".to_string()))
        }
        KeyMaterial::Ed25519(_) => Err(SVError::UnsupportedAlgorithm(
            "Ed25519 cannot verify a prehashed message".to_string(),
        )),
    }
}

fn require_sha256(algorithm: HashAlgorithm) -> Result<(), SVError> {
    match algorithm {
        HashAlgorithm::Sha256 => Ok(()),
        other => Err(SVError::UnsupportedAlgorithm(other.to_string())),
    }
}

// ASN.1 DER first, then the fixed r||s form.
fn ecdsa_signature(bytes: &[u8]) -> Result<p256::ecdsa::Signature, SVError> {
    p256::ecdsa::Signature::from_der(bytes)
        .or_else(|_| p256::ecdsa::Signature::from_slice(bytes))
        .map_err(|_| SVError::SignatureInvalid("Malformed ECDSA signature".to_string()))
}
