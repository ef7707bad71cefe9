use crate::error::SVError;
use crate::signature::hash::{sha256_hex, HashAlgorithm};
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use spki::ObjectIdentifier;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_CURVE_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

/// SubjectPublicKeyInfo prefix for a raw 32-byte Ed25519 key
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Key material of a supported algorithm.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    EcdsaP256(p256::ecdsa::VerifyingKey),
    Ed25519(ed25519_compact::PublicKey),
}

/// A public key, together with its SubjectPublicKeyInfo encoding.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    material: KeyMaterial,
    spki_der: Vec<u8>,
}

impl PublicKey {
    /// Wrap a P-256 verifying key.
    pub fn from_p256(key: p256::ecdsa::VerifyingKey) -> Result<Self, SVError> {
        let spki_der = p256::PublicKey::from(&key)
            .to_public_key_der()
            .map_err(|e| SVError::InternalError(format!("Failed to encode P-256 key: {}", e)))?
            .as_bytes()
            .to_vec();
        Ok(Self {
            material: KeyMaterial::EcdsaP256(key),
            spki_der,
        })
    }

    /// Wrap an Ed25519 public key.
    pub fn from_ed25519(key: ed25519_compact::PublicKey) -> Self {
        let mut spki_der = ED25519_SPKI_PREFIX.to_vec();
        spki_der.extend_from_slice(key.as_ref());
        Self {
            material: KeyMaterial::Ed25519(key),
            spki_der,
        }
    }

    /// Deserialize a DER-encoded SubjectPublicKeyInfo.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, SVError> {
        let spki = spki::SubjectPublicKeyInfoRef::try_from(der)
            .map_err(|e| SVError::InvalidArgument(format!("Invalid SubjectPublicKeyInfo: {}", e)))?;
        let oid = spki.algorithm.oid;

        if oid == OID_EC_PUBLIC_KEY {
            let curve = spki.algorithm.parameters_oid().map_err(|_| {
                SVError::UnsupportedAlgorithm("EC key without named curve".to_string())
            })?;
            if curve != OID_CURVE_P256 {
                return Err(SVError::UnsupportedAlgorithm(format!("EC curve {}", curve)));
            }
            let pk = p256::PublicKey::from_public_key_der(der)
                .map_err(|e| SVError::InvalidArgument(format!("Invalid P-256 key: {}", e)))?;
            return Ok(Self {
                material: KeyMaterial::EcdsaP256(pk.into()),
                spki_der: der.to_vec(),
            });
        }

        if oid == OID_ED25519 {
            let raw = spki.subject_public_key.raw_bytes();
            let pk = ed25519_compact::PublicKey::from_slice(raw)
                .map_err(|e| SVError::InvalidArgument(format!("Invalid Ed25519 key: {}", e)))?;
            return Ok(Self::from_ed25519(pk));
        }

        Err(SVError::UnsupportedAlgorithm(format!("Key algorithm {}", oid)))
    }

    /// Deserialize a PEM-encoded (`PUBLIC KEY`) public key.
    pub fn from_pem(pem_str: &str) -> Result<Self, SVError> {
        let block = pem::parse(pem_str)
            .map_err(|e| SVError::InvalidArgument(format!("Invalid PEM: {}", e)))?;
        if block.tag() != "PUBLIC KEY" {
            return Err(SVError::InvalidArgument(format!(
                "Expected PUBLIC KEY block, found {}",
                block.tag()
            )));
        }
        Self::from_spki_der(block.contents())
    }

    /// Try PEM first, then raw DER.
    pub fn from_any(data: &[u8]) -> Result<Self, SVError> {
        if let Ok(s) = std::str::from_utf8(data) {
            if s.contains("-----BEGIN") {
                return Self::from_pem(s);
            }
        }
        Self::from_spki_der(data)
    }

    /// Load a key from a file, trying to guess its format.
    pub fn from_any_file(file: impl AsRef<Path>) -> Result<Self, SVError> {
        let bytes = fs::read(file)?;
        Self::from_any(&bytes)
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    /// SubjectPublicKeyInfo DER encoding.
    pub fn spki_der(&self) -> &[u8] {
        &self.spki_der
    }

    /// Serialize the public key using PEM encoding.
    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new("PUBLIC KEY", self.spki_der.clone()))
    }

    /// Lowercase hex SHA-256 of the SPKI DER encoding.
    pub fn fingerprint(&self) -> String {
        sha256_hex(&self.spki_der)
    }

    pub fn algorithm_name(&self) -> &'static str {
        match self.material {
            KeyMaterial::EcdsaP256(_) => "ecdsa-p256",
            KeyMaterial::Ed25519(_) => "ed25519",
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PublicKey {{ algorithm: {}, fingerprint: {} }}",
            self.algorithm_name(),
            self.fingerprint()
        )
    }
}

/// A key resolved by a [`KeyLookup`] for one validation.
#[derive(Debug, Clone)]
pub struct TrustedKey {
    pub identifier: String,
    pub public_key: PublicKey,
    pub algorithm_hint: HashAlgorithm,
}

impl TrustedKey {
    pub fn new(identifier: impl Into<String>, public_key: PublicKey) -> Self {
        Self {
            identifier: identifier.into(),
            public_key,
            algorithm_hint: HashAlgorithm::Sha256,
        }
    }

    pub fn with_algorithm_hint(mut self, hint: HashAlgorithm) -> Self {
        self.algorithm_hint = hint;
        self
    }

    pub fn fingerprint(&self) -> String {
        self.public_key.fingerprint()
    }
}

/// Resolves key identifiers to trusted keys.
pub trait KeyLookup: Send + Sync {
    /// Find the key registered under `key_id`, or fail with
    /// [`SVError::KeyNotFound`].
    fn find(&self, key_id: &str) -> Result<TrustedKey, SVError>;
}

/// In-memory key registry.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyLookup {
    keys: HashMap<String, TrustedKey>,
}

impl MemoryKeyLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` under `key_id`, replacing any previous entry.
    pub fn insert(&mut self, key_id: impl Into<String>, key: PublicKey) {
        let key_id = key_id.into();
        self.keys
            .insert(key_id.clone(), TrustedKey::new(key_id, key));
    }

    pub fn with_key(mut self, key_id: impl Into<String>, key: PublicKey) -> Self {
        self.insert(key_id, key);
        self
    }

    pub fn insert_trusted(&mut self, key: TrustedKey) {
        self.keys.insert(key.identifier.clone(), key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyLookup for MemoryKeyLookup {
    fn find(&self, key_id: &str) -> Result<TrustedKey, SVError> {
        self.keys
            .get(key_id)
            .cloned()
            .ok_or_else(|| SVError::KeyNotFound(key_id.to_string()))
    }
}

/// Key registry loaded from a directory of public key files.
///
/// Every `.pem`, `.pub` or `.der` file is loaded once. A key answers to its
/// file stem and to its fingerprint. Files that do not hold a supported key
/// are skipped.
#[derive(Debug, Clone)]
pub struct DirectoryKeyLookup {
    dir: PathBuf,
    keys: MemoryKeyLookup,
}

impl DirectoryKeyLookup {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SVError> {
        let dir = dir.as_ref().to_path_buf();
        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        entries.sort();

        let mut keys = MemoryKeyLookup::new();
        for path in entries {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !matches!(ext, "pem" | "pub" | "der") {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };
            match PublicKey::from_any_file(&path) {
                Ok(pk) => {
                    log::debug!("Loaded key {} ({})", stem, pk.fingerprint());
                    keys.insert(pk.fingerprint(), pk.clone());
                    keys.insert(stem, pk);
                }
                Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
            }
        }

        Ok(Self { dir, keys })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of lookup entries (stems and fingerprints)
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyLookup for DirectoryKeyLookup {
    fn find(&self, key_id: &str) -> Result<TrustedKey, SVError> {
        self.keys.find(key_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;

    fn p256_key() -> PublicKey {
        let sk = SigningKey::from_slice(&[0x11; 32]).unwrap();
        PublicKey::from_p256(*sk.verifying_key()).unwrap()
    }

    fn ed25519_key() -> PublicKey {
        let kp = ed25519_compact::KeyPair::from_seed(ed25519_compact::Seed::new([7u8; 32]));
        PublicKey::from_ed25519(kp.pk)
    }

    #[test]
    fn test_spki_der_roundtrip() {
        for key in [p256_key(), ed25519_key()] {
            let parsed = PublicKey::from_spki_der(key.spki_der()).unwrap();
            assert_eq!(parsed, key);
            assert_eq!(parsed.fingerprint(), key.fingerprint());
        }
    }

    #[test]
    fn test_ed25519_spki_matches_library_encoding() {
        let kp = ed25519_compact::KeyPair::from_seed(ed25519_compact::Seed::new([7u8; 32]));
        assert_eq!(ed25519_key().spki_der(), kp.pk.to_der().as_slice());
    }

    #[test]
    fn test_pem_roundtrip() {
        let key = p256_key();
        let pem = key.to_pem();
        assert!(pem.contains("BEGIN PUBLIC KEY"));
        assert_eq!(PublicKey::from_pem(&pem).unwrap(), key);
        assert_eq!(PublicKey::from_any(pem.as_bytes()).unwrap(), key);
    }

    #[test]
    fn test_unsupported_key_algorithm() {
        // rsaEncryption OID with a dummy key body
        let der = [
            0x30, 0x12, 0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01,
            0x01, 0x05, 0x00, 0x03, 0x01, 0x00,
        ];
        assert!(matches!(
            PublicKey::from_spki_der(&der),
            Err(SVError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(PublicKey::from_spki_der(b"not a key").is_err());
        assert!(PublicKey::from_pem("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n").is_err());
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = p256_key().fingerprint();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(fp, ed25519_key().fingerprint());
    }

    #[test]
    fn test_memory_lookup() {
        let lookup = MemoryKeyLookup::new().with_key("k1", p256_key());
        let found = lookup.find("k1").unwrap();
        assert_eq!(found.identifier, "k1");
        assert_eq!(found.algorithm_hint, HashAlgorithm::Sha256);
        assert!(matches!(lookup.find("unknown"), Err(SVError::KeyNotFound(id)) if id == "unknown"));
    }

    #[test]
    fn test_directory_lookup() {
        let dir = std::env::temp_dir().join(format!("sigver-keys-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let key = p256_key();
        fs::write(dir.join("release.pem"), key.to_pem()).unwrap();
        fs::write(dir.join("edge.der"), ed25519_key().spki_der()).unwrap();
        fs::write(dir.join("notes.txt"), "not a key").unwrap();
        fs::write(dir.join("broken.pem"), "garbage").unwrap();

        let lookup = DirectoryKeyLookup::open(&dir).unwrap();
        assert_eq!(lookup.find("release").unwrap().public_key, key);
        assert_eq!(lookup.find(&key.fingerprint()).unwrap().public_key, key);
        assert!(lookup.find("edge").is_ok());
        assert!(matches!(lookup.find("notes"), Err(SVError::KeyNotFound(_))));
        assert!(matches!(lookup.find("broken"), Err(SVError::KeyNotFound(_))));

        fs::remove_dir_all(&dir).unwrap();
    }
}
