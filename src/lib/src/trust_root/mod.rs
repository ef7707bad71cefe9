//! Keyless trust root
//!
//! [`TrustRootProvider`] resolves a [`TrustRootMaterial`] through a
//! [`TargetFetcher`] and caches it according to a [`RefreshPolicy`]. The
//! cached material is an `Arc` that is swapped wholesale on refresh, so
//! concurrent verifications either see the previous root or the new one.

mod fetch;
mod parse;
mod tuf;

pub use fetch::*;
pub use parse::TRUSTED_ROOT_MEDIA_TYPE_PREFIX;

use crate::audit;
use crate::error::SVError;
use crate::signature::PublicKey;
use crate::time::{SystemTimeSource, TimeSource};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Name of the trust root target in the TUF repository
pub const TRUSTED_ROOT_TARGET: &str = "trusted_root.json";

/// Validity window in Unix seconds. Open ends are unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidityPeriod {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl ValidityPeriod {
    pub fn contains(&self, t: i64) -> bool {
        self.start.map_or(true, |s| t >= s) && self.end.map_or(true, |e| t <= e)
    }
}

/// A certificate authority (Fulcio) or timestamp authority.
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    pub name: String,
    pub uri: String,
    /// DER certificates, issuing certificate first, root last
    pub chain: Vec<Vec<u8>>,
    pub valid_for: Option<ValidityPeriod>,
}

impl CertificateAuthority {
    /// Self-signed root of the chain
    pub fn root(&self) -> Option<&[u8]> {
        self.chain.last().map(Vec::as_slice)
    }

    /// Every certificate except the root
    pub fn intermediates(&self) -> &[Vec<u8>] {
        match self.chain.len() {
            0 => &[],
            n => &self.chain[..n - 1],
        }
    }

    pub fn is_valid_at(&self, t: i64) -> bool {
        self.valid_for.map_or(true, |v| v.contains(t))
    }
}

/// Signing key of a transparency log (Rekor) or CT log.
#[derive(Debug, Clone)]
pub struct LogKey {
    pub base_url: String,
    pub log_id: Vec<u8>,
    pub public_key: PublicKey,
    pub valid_for: Option<ValidityPeriod>,
}

impl LogKey {
    pub fn log_id_hex(&self) -> String {
        hex::encode(&self.log_id)
    }

    pub fn is_valid_at(&self, t: i64) -> bool {
        self.valid_for.map_or(true, |v| v.contains(t))
    }
}

/// Parsed keyless trust root. Immutable once built.
#[derive(Debug, Clone)]
pub struct TrustRootMaterial {
    /// Media type of the source document
    pub format_version: String,
    pub certificate_authorities: Vec<CertificateAuthority>,
    pub transparency_logs: Vec<LogKey>,
    pub ct_logs: Vec<LogKey>,
    pub timestamp_authorities: Vec<CertificateAuthority>,
}

impl TrustRootMaterial {
    /// Transparency log with the given log id
    pub fn find_tlog(&self, log_id: &[u8]) -> Option<&LogKey> {
        self.transparency_logs.iter().find(|l| l.log_id == log_id)
    }
}

/// When a cached trust root is fetched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Fetch once, keep forever
    Once,
    /// Fetch again when the cached copy is older than this
    Ttl(Duration),
    /// Fetch on every resolve
    Always,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        RefreshPolicy::Ttl(Duration::from_secs(24 * 3600))
    }
}

struct CachedRoot {
    material: Arc<TrustRootMaterial>,
    fetched_at: i64,
}

/// Resolves and caches the keyless trust root.
pub struct TrustRootProvider {
    fetcher: Arc<dyn TargetFetcher>,
    target: String,
    refresh: RefreshPolicy,
    serve_stale_on_error: bool,
    timeout: Option<Duration>,
    time_source: Arc<dyn TimeSource>,
    cache: RwLock<Option<CachedRoot>>,
}

impl std::fmt::Debug for TrustRootProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustRootProvider")
            .field("target", &self.target)
            .field("refresh", &self.refresh)
            .field("serve_stale_on_error", &self.serve_stale_on_error)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TrustRootProvider {
    pub fn new(fetcher: Arc<dyn TargetFetcher>) -> Self {
        Self {
            fetcher,
            target: TRUSTED_ROOT_TARGET.to_string(),
            refresh: RefreshPolicy::default(),
            serve_stale_on_error: false,
            timeout: None,
            time_source: Arc::new(SystemTimeSource),
            cache: RwLock::new(None),
        }
    }

    /// Target name to fetch instead of `trusted_root.json`.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_refresh_policy(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// Keep serving the previous root when a refresh fails.
    pub fn with_serve_stale_on_error(mut self, serve_stale: bool) -> Self {
        self.serve_stale_on_error = serve_stale;
        self
    }

    /// Upper bound on a single fetch.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        self.refresh
    }

    /// Return the trust root, fetching it if the cache is empty or stale.
    pub fn resolve(&self) -> Result<Arc<TrustRootMaterial>, SVError> {
        self.resolve_inner(None)
    }

    /// Like [`resolve`](Self::resolve), giving up at `deadline`.
    ///
    /// The deadline only bounds the fetch. A cached root that is still fresh
    /// is returned even when the deadline has passed.
    pub fn resolve_with_deadline(&self, deadline: Instant) -> Result<Arc<TrustRootMaterial>, SVError> {
        self.resolve_inner(Some(deadline))
    }

    /// Fetch unconditionally and replace the cached root.
    pub fn refresh(&self) -> Result<Arc<TrustRootMaterial>, SVError> {
        let now = self.time_source.now_unix()?;
        self.fetch_and_store(None, now)
    }

    /// Currently cached root, if any, without fetching.
    pub fn cached(&self) -> Option<Arc<TrustRootMaterial>> {
        self.read_cache(|c| c.material.clone())
    }

    fn resolve_inner(&self, deadline: Option<Instant>) -> Result<Arc<TrustRootMaterial>, SVError> {
        let now = self.time_source.now_unix()?;
        if let Some(material) = self.fresh(now) {
            return Ok(material);
        }

        match self.fetch_and_store(deadline, now) {
            Ok(material) => Ok(material),
            Err(e) => match self.cached() {
                Some(stale) if self.serve_stale_on_error => {
                    log::warn!("Trust root refresh failed, serving cached copy: {}", e);
                    Ok(stale)
                }
                _ => Err(e),
            },
        }
    }

    fn fresh(&self, now: i64) -> Option<Arc<TrustRootMaterial>> {
        let refresh = self.refresh;
        self.read_cache(|c| {
            let fresh = match refresh {
                RefreshPolicy::Once => true,
                RefreshPolicy::Ttl(ttl) => {
                    now.saturating_sub(c.fetched_at) < i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
                }
                RefreshPolicy::Always => false,
            };
            fresh.then(|| c.material.clone())
        })
        .flatten()
    }

    fn read_cache<T>(&self, f: impl FnOnce(&CachedRoot) -> T) -> Option<T> {
        let guard = self.cache.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(f)
    }

    fn fetch_and_store(&self, deadline: Option<Instant>, now: i64) -> Result<Arc<TrustRootMaterial>, SVError> {
        let timeout = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(SVError::TrustRootUnavailable(
                        "Deadline expired before trust root fetch".to_string(),
                    ));
                }
                Some(self.timeout.map_or(remaining, |t| t.min(remaining)))
            }
            None => self.timeout,
        };

        log::debug!("Fetching trust root target {}", self.target);
        let bytes = self
            .fetcher
            .fetch_target(&self.target, timeout)
            .map_err(|e| SVError::TrustRootUnavailable(e.to_string()))?;

        if let Some(deadline) = deadline {
            if Instant::now() > deadline {
                return Err(SVError::TrustRootUnavailable(
                    "Deadline exceeded during trust root fetch".to_string(),
                ));
            }
        }

        let material = Arc::new(TrustRootMaterial::from_json(&bytes)?);
        audit::log_trust_root_refreshed(
            &self.target,
            &material.format_version,
            material.certificate_authorities.len(),
            material.transparency_logs.len(),
        );

        let mut guard = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(CachedRoot {
            material: material.clone(),
            fetched_at: now,
        });
        Ok(material)
    }
}
