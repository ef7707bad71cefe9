use crate::error::SVError;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Digest algorithm paired with a signature.
///
/// Only [`HashAlgorithm::Sha256`] is accepted by the validator; the other
/// variants exist so that a hint carrying them fails closed instead of being
/// mistaken for SHA-256.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Digest length in bytes
    pub fn digest_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "SHA2_256"),
            HashAlgorithm::Sha384 => write!(f, "SHA2_384"),
            HashAlgorithm::Sha512 => write!(f, "SHA2_512"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = SVError;

    /// Accepts the protobuf names (`SHA2_256`) as well as the short forms
    /// used by Rekor entries (`sha256`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace(['-', '_'], "").as_str() {
            "SHA2256" | "SHA256" => Ok(HashAlgorithm::Sha256),
            "SHA2384" | "SHA384" => Ok(HashAlgorithm::Sha384),
            "SHA2512" | "SHA512" => Ok(HashAlgorithm::Sha512),
            _ => Err(SVError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// SHA-256 of `data`
pub fn sha256(data: impl AsRef<[u8]>) -> [u8; 32] {
    Sha256::digest(data.as_ref()).into()
}

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(sha256(data))
}
