//! Trust root fetch collaborators
//!
//! A fetcher turns a target name (`trusted_root.json`) into raw bytes. It is
//! the only place where the crate touches the network.

use super::tuf;
use crate::time::{SystemTimeSource, TimeSource};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Sigstore public-good TUF repository
pub const SIGSTORE_TUF_URL: &str = "https://tuf-repo-cdn.sigstore.dev";

/// Default User-Agent for HTTP fetches
pub const DEFAULT_USER_AGENT: &str = concat!("sigver/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Target not found: {0}")]
    NotFound(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Untrusted metadata: {0}")]
    Untrusted(String),

    #[error("Fetch timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves named targets to raw bytes.
pub trait TargetFetcher: Send + Sync {
    /// Fetch target `name`. `timeout` bounds the whole operation when set.
    fn fetch_target(&self, name: &str, timeout: Option<Duration>) -> Result<Vec<u8>, FetchError>;
}

/// In-memory targets.
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    targets: HashMap<String, Vec<u8>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.targets.insert(name.into(), bytes.into());
        self
    }
}

impl TargetFetcher for StaticFetcher {
    fn fetch_target(&self, name: &str, _timeout: Option<Duration>) -> Result<Vec<u8>, FetchError> {
        self.targets
            .get(name)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(name.to_string()))
    }
}

/// Targets stored as files in a local directory, for air-gapped hosts.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    dir: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl TargetFetcher for DirectoryFetcher {
    fn fetch_target(&self, name: &str, _timeout: Option<Duration>) -> Result<Vec<u8>, FetchError> {
        if !is_plain_name(name) {
            return Err(FetchError::NotFound(format!("Invalid target name: {}", name)));
        }
        let path = self.dir.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(FetchError::Io(e)),
        }
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Fetches targets from a TUF repository over HTTP.
///
/// Follows the consistent-snapshot layout: `<n>.root.json` updates, then
/// `timestamp.json`, `<version>.snapshot.json`, `<version>.targets.json` and
/// `targets/<sha256>.<name>`. Role signatures and thresholds, expiry,
/// declared lengths and hashes are enforced.
///
/// The walk starts from the root given to
/// [`with_trusted_root`](Self::with_trusted_root). Without one, the
/// repository's own `1.root.json` is trusted on first use. The newest
/// verified root is kept and used as the starting point of the next fetch.
pub struct TufHttpFetcher {
    base_url: String,
    user_agent: String,
    headers: Vec<(String, String)>,
    time_source: Arc<dyn TimeSource>,
    trusted_root: Mutex<Option<Vec<u8>>>,
    client: ureq::Agent,
}

impl std::fmt::Debug for TufHttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TufHttpFetcher")
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Default for TufHttpFetcher {
    fn default() -> Self {
        Self::new(SIGSTORE_TUF_URL)
    }
}

impl TufHttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            base_url,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: Vec::new(),
            time_source: Arc::new(SystemTimeSource),
            trusted_root: Mutex::new(None),
            client,
        }
    }

    /// Root metadata (`root.json`) the repository walk starts from.
    pub fn with_trusted_root(mut self, root_json: impl Into<Vec<u8>>) -> Self {
        self.trusted_root = Mutex::new(Some(root_json.into()));
        self
    }

    fn trusted_root(&self) -> Option<Vec<u8>> {
        self.trusted_root
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Clock used for metadata expiry.
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str, deadline: Option<Instant>) -> Result<Vec<u8>, FetchError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.get(&url).header("User-Agent", self.user_agent.as_str());
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FetchError::Timeout);
            }
            request = request.config().timeout_global(Some(remaining)).build();
        }

        log::debug!("GET {}", url);
        let response = request
            .call()
            .map_err(|e| match e {
                ureq::Error::Timeout(_) => FetchError::Timeout,
                other => FetchError::Network(format!("{}: {}", url, other)),
            })?;

        let status = response.status();
        // Object stores answer 403 for keys that do not exist
        if status == 404 || status == 403 {
            return Err(FetchError::NotFound(url));
        }
        if status != 200 {
            return Err(FetchError::Network(format!("{} returned status {}", url, status)));
        }

        response
            .into_body()
            .read_to_vec()
            .map_err(|e| FetchError::Network(format!("Failed to read {}: {}", url, e)))
    }
}

impl TargetFetcher for TufHttpFetcher {
    fn fetch_target(&self, name: &str, timeout: Option<Duration>) -> Result<Vec<u8>, FetchError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let now = self
            .time_source
            .now_unix()
            .map_err(|e| FetchError::Metadata(e.to_string()))?;
        let get = |path: &str| self.get(path, deadline);

        let trusted_root = match self.trusted_root() {
            Some(root) => root,
            None => {
                log::warn!(
                    "No TUF root configured, trusting {}/1.root.json on first use",
                    self.base_url
                );
                get("1.root.json")?
            }
        };

        let walked = tuf::walk_repository(get, &trusted_root, name, now)?;
        log::debug!("TUF root at version {}", walked.root.version());
        *self.trusted_root.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(walked.root.raw().to_vec());
        Ok(walked.bytes)
    }
}
