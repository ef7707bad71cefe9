//! TUF repository walk
//!
//! Starting from a trusted `root.json`, the root is updated one version at a
//! time (`2.root.json`, `3.root.json`, ...), each new root signed by a
//! threshold of both the old and the new root keys. The final root then
//! vouches for `timestamp`, `snapshot` and `targets` in turn, and `targets`
//! pins the length and hash of the requested target.
//!
//! Signatures cover the canonical JSON form of the `signed` object.

use super::fetch::FetchError;
use crate::signature::{self, sha256_hex, HashAlgorithm, PublicKey};
use crate::time::parse_rfc3339;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// Upper bound on root versions walked in one update
const MAX_ROOT_ROTATIONS: usize = 1024;

#[derive(Debug, Deserialize)]
struct Metadata {
    signed: serde_json::Value,
    #[serde(default)]
    signatures: Vec<MetadataSignature>,
}

#[derive(Debug, Deserialize)]
struct MetadataSignature {
    keyid: String,
    sig: String,
}

#[derive(Debug, Deserialize)]
struct RoleHeader {
    #[serde(rename = "_type")]
    role_type: String,
    expires: String,
    version: u64,
}

#[derive(Debug, Deserialize)]
struct RootRole {
    #[serde(flatten)]
    header: RoleHeader,
    keys: HashMap<String, KeyEntry>,
    roles: HashMap<String, RoleKeys>,
}

#[derive(Debug, Deserialize)]
struct KeyEntry {
    keytype: String,
    #[serde(default)]
    scheme: String,
    keyval: KeyValue,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    public: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RoleKeys {
    keyids: Vec<String>,
    threshold: usize,
}

#[derive(Debug, Deserialize)]
struct MetaRole {
    #[serde(flatten)]
    header: RoleHeader,
    #[serde(default)]
    meta: HashMap<String, MetaFile>,
}

#[derive(Debug, Deserialize)]
struct TargetsRole {
    #[serde(flatten)]
    header: RoleHeader,
    #[serde(default)]
    targets: HashMap<String, TargetFile>,
}

#[derive(Debug, Deserialize)]
struct MetaFile {
    version: u64,
    #[serde(default)]
    length: Option<u64>,
    #[serde(default)]
    hashes: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct TargetFile {
    length: u64,
    hashes: HashMap<String, String>,
}

trait HasHeader {
    fn header(&self) -> &RoleHeader;
}

impl HasHeader for MetaRole {
    fn header(&self) -> &RoleHeader {
        &self.header
    }
}

impl HasHeader for TargetsRole {
    fn header(&self) -> &RoleHeader {
        &self.header
    }
}

/// Keys and thresholds of a verified root.
#[derive(Debug)]
pub(crate) struct TrustedRoot {
    version: u64,
    expires: String,
    keys: HashMap<String, PublicKey>,
    roles: HashMap<String, RoleKeys>,
    /// The root metadata document, as fetched
    raw: Vec<u8>,
}

impl TrustedRoot {
    fn from_bytes(bytes: &[u8]) -> Result<(Self, Metadata), FetchError> {
        let metadata = parse_metadata(bytes, "root")?;
        let role: RootRole = serde_json::from_value(metadata.signed.clone())
            .map_err(|e| FetchError::Metadata(format!("Invalid root metadata: {}", e)))?;
        if role.header.role_type != "root" {
            return Err(FetchError::Metadata(format!(
                "Expected root role, found {}",
                role.header.role_type
            )));
        }

        let mut keys = HashMap::with_capacity(role.keys.len());
        for (keyid, entry) in &role.keys {
            match decode_key(entry) {
                Ok(key) => {
                    keys.insert(keyid.clone(), key);
                }
                Err(e) => log::warn!("Ignoring TUF key {}: {}", keyid, e),
            }
        }

        let root = TrustedRoot {
            version: role.header.version,
            expires: role.header.expires,
            keys,
            roles: role.roles,
            raw: bytes.to_vec(),
        };
        Ok((root, metadata))
    }

    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Check that a threshold of the keys this root assigns to `role` signed
    /// `metadata`.
    fn verify(&self, role: &str, metadata: &Metadata) -> Result<(), FetchError> {
        let role_keys = self
            .roles
            .get(role)
            .ok_or_else(|| FetchError::Untrusted(format!("root defines no {} role", role)))?;
        if role_keys.threshold == 0 {
            return Err(FetchError::Untrusted(format!("{} role has a zero threshold", role)));
        }

        let canonical = serde_jcs::to_vec(&metadata.signed).map_err(|e| {
            FetchError::Metadata(format!("Failed to canonicalize {} metadata: {}", role, e))
        })?;

        let mut signers = HashSet::new();
        for sig in &metadata.signatures {
            if !role_keys.keyids.contains(&sig.keyid) || signers.contains(sig.keyid.as_str()) {
                continue;
            }
            let Some(key) = self.keys.get(&sig.keyid) else {
                continue;
            };
            let Ok(raw) = hex::decode(&sig.sig) else {
                continue;
            };
            if signature::verify(key, HashAlgorithm::Sha256, &canonical, &raw).is_ok() {
                signers.insert(sig.keyid.as_str());
            }
        }

        if signers.len() < role_keys.threshold {
            return Err(FetchError::Untrusted(format!(
                "{} metadata has {} valid signatures, {} required",
                role,
                signers.len(),
                role_keys.threshold
            )));
        }
        Ok(())
    }

    /// Verify `bytes` as metadata for `role` and return its `signed` body.
    fn verify_role<T>(&self, bytes: &[u8], role: &str, now: i64) -> Result<T, FetchError>
    where
        T: DeserializeOwned + HasHeader,
    {
        let metadata = parse_metadata(bytes, role)?;
        self.verify(role, &metadata)?;
        let signed: T = serde_json::from_value(metadata.signed)
            .map_err(|e| FetchError::Metadata(format!("Invalid {} metadata: {}", role, e)))?;
        let header = signed.header();
        if header.role_type != role {
            return Err(FetchError::Metadata(format!(
                "Expected {} role, found {}",
                role, header.role_type
            )));
        }
        check_expiry(role, &header.expires, now)?;
        Ok(signed)
    }
}

fn parse_metadata(bytes: &[u8], role: &str) -> Result<Metadata, FetchError> {
    serde_json::from_slice(bytes)
        .map_err(|e| FetchError::Metadata(format!("Invalid {} metadata: {}", role, e)))
}

fn check_expiry(role: &str, expires: &str, now: i64) -> Result<(), FetchError> {
    let expires_at = parse_rfc3339(expires).map_err(|e| FetchError::Metadata(e.to_string()))?;
    if expires_at <= now {
        return Err(FetchError::Metadata(format!(
            "{} metadata expired at {}",
            role, expires
        )));
    }
    Ok(())
}

// ECDSA keys come as PEM (Sigstore) or hex SEC1 points, Ed25519 keys as hex.
fn decode_key(entry: &KeyEntry) -> Result<PublicKey, String> {
    let public = entry.keyval.public.trim();
    match (entry.keytype.as_str(), entry.scheme.as_str()) {
        ("ed25519", _) => {
            let raw = hex::decode(public).map_err(|e| e.to_string())?;
            let key = ed25519_compact::PublicKey::from_slice(&raw).map_err(|e| e.to_string())?;
            Ok(PublicKey::from_ed25519(key))
        }
        ("ecdsa" | "ecdsa-sha2-nistp256", "ecdsa-sha2-nistp256" | "") => {
            if public.starts_with("-----BEGIN") {
                PublicKey::from_pem(public).map_err(|e| e.to_string())
            } else {
                let raw = hex::decode(public).map_err(|e| e.to_string())?;
                let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&raw)
                    .map_err(|e| e.to_string())?;
                PublicKey::from_p256(key).map_err(|e| e.to_string())
            }
        }
        (keytype, scheme) => Err(format!("unsupported key type {} ({})", keytype, scheme)),
    }
}

/// Update `trusted` through every newer root the repository serves.
///
/// `trusted` must be signed by a threshold of its own root keys. The result
/// is the newest root, which must not be expired.
pub(crate) fn update_root<F>(get: &F, trusted: &[u8], now: i64) -> Result<TrustedRoot, FetchError>
where
    F: Fn(&str) -> Result<Vec<u8>, FetchError>,
{
    let (mut root, metadata) = TrustedRoot::from_bytes(trusted)?;
    root.verify("root", &metadata)?;

    for _ in 0..MAX_ROOT_ROTATIONS {
        let next_version = root.version + 1;
        let bytes = match get(&format!("{}.root.json", next_version)) {
            Ok(bytes) => bytes,
            Err(FetchError::NotFound(_)) => break,
            Err(e) => return Err(e),
        };
        let (next, metadata) = TrustedRoot::from_bytes(&bytes)?;
        root.verify("root", &metadata)?;
        next.verify("root", &metadata)?;
        if next.version != next_version {
            return Err(FetchError::Untrusted(format!(
                "{}.root.json carries version {}",
                next_version, next.version
            )));
        }
        log::debug!("TUF root updated to version {}", next.version);
        root = next;
    }

    check_expiry("root", &root.expires, now)?;
    Ok(root)
}

/// A target fetched through a verified walk.
#[derive(Debug)]
pub(crate) struct WalkedTarget {
    pub bytes: Vec<u8>,
    /// Newest root seen on the way
    pub root: TrustedRoot,
}

/// Walk a consistent-snapshot TUF repository down to target `name`.
///
/// `get` maps a repository-relative path to its bytes, `trusted_root` is the
/// root metadata to start from and `now` is the current Unix time for
/// expiry checks.
pub(crate) fn walk_repository<F>(
    get: F,
    trusted_root: &[u8],
    name: &str,
    now: i64,
) -> Result<WalkedTarget, FetchError>
where
    F: Fn(&str) -> Result<Vec<u8>, FetchError>,
{
    let root = update_root(&get, trusted_root, now)?;

    let timestamp: MetaRole = root.verify_role(&get("timestamp.json")?, "timestamp", now)?;
    let snapshot_meta = timestamp
        .meta
        .get("snapshot.json")
        .ok_or_else(|| FetchError::Metadata("timestamp does not list snapshot.json".to_string()))?;

    let snapshot_path = format!("{}.snapshot.json", snapshot_meta.version);
    let snapshot_bytes = get(&snapshot_path)?;
    check_meta_file(&snapshot_path, &snapshot_bytes, snapshot_meta)?;
    let snapshot: MetaRole = root.verify_role(&snapshot_bytes, "snapshot", now)?;
    if snapshot.header.version != snapshot_meta.version {
        return Err(FetchError::Metadata(format!(
            "snapshot version {} does not match timestamp ({})",
            snapshot.header.version, snapshot_meta.version
        )));
    }

    let targets_meta = snapshot
        .meta
        .get("targets.json")
        .ok_or_else(|| FetchError::Metadata("snapshot does not list targets.json".to_string()))?;
    let targets_path = format!("{}.targets.json", targets_meta.version);
    let targets_bytes = get(&targets_path)?;
    check_meta_file(&targets_path, &targets_bytes, targets_meta)?;
    let targets: TargetsRole = root.verify_role(&targets_bytes, "targets", now)?;
    if targets.header.version != targets_meta.version {
        return Err(FetchError::Metadata(format!(
            "targets version {} does not match snapshot ({})",
            targets.header.version, targets_meta.version
        )));
    }

    let target = targets
        .targets
        .get(name)
        .ok_or_else(|| FetchError::NotFound(format!("target {} not in targets metadata", name)))?;
    let digest = target
        .hashes
        .get("sha256")
        .ok_or_else(|| FetchError::Metadata(format!("target {} has no sha256 hash", name)))?;

    let bytes = get(&format!("targets/{}.{}", digest, name))?;
    if bytes.len() as u64 != target.length {
        return Err(FetchError::Integrity(format!(
            "{}: expected {} bytes, got {}",
            name,
            target.length,
            bytes.len()
        )));
    }
    if !sha256_hex(&bytes).eq_ignore_ascii_case(digest) {
        return Err(FetchError::Integrity(format!("{}: sha256 mismatch", name)));
    }

    log::debug!(
        "Fetched TUF target {} ({} bytes, root v{}, targets v{})",
        name,
        bytes.len(),
        root.version,
        targets.header.version
    );
    Ok(WalkedTarget { bytes, root })
}

fn check_meta_file(path: &str, bytes: &[u8], meta: &MetaFile) -> Result<(), FetchError> {
    if let Some(length) = meta.length {
        if bytes.len() as u64 != length {
            return Err(FetchError::Integrity(format!(
                "{}: expected {} bytes, got {}",
                path,
                length,
                bytes.len()
            )));
        }
    }
    if let Some(expected) = meta.hashes.as_ref().and_then(|h| h.get("sha256")) {
        if !sha256_hex(bytes).eq_ignore_ascii_case(expected) {
            return Err(FetchError::Integrity(format!("{}: sha256 mismatch", path)));
        }
    }
    Ok(())
}
