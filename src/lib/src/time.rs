//! Time sources
//!
//! Certificate validity in keyless verification is checked against the
//! transparency log's integrated time, which is signed. Wall-clock time is
//! only needed for trust root freshness (refresh TTL, TUF metadata expiry)
//! and as a fallback when a policy disables transparency log checks.
//!
//! ```rust,ignore
//! use sigver::time::{TimeSource, SystemTimeSource, FixedTimeSource};
//!
//! let now = SystemTimeSource.now_unix()?;
//! let fixed = FixedTimeSource::from_unix_secs(1735689600); // 2025-01-01 00:00:00 UTC
//! ```

use crate::error::SVError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Pluggable clock.
pub trait TimeSource: Send + Sync {
    /// Current time according to this source.
    fn now(&self) -> Result<SystemTime, SVError>;

    /// Current time as seconds since the Unix epoch.
    fn now_unix(&self) -> Result<i64, SVError> {
        let secs = self
            .now()?
            .duration_since(UNIX_EPOCH)
            .map_err(|e| SVError::InternalError(format!("Time before Unix epoch: {}", e)))?
            .as_secs();
        i64::try_from(secs)
            .map_err(|_| SVError::InternalError("Time out of range".to_string()))
    }
}

/// System clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Result<SystemTime, SVError> {
        Ok(SystemTime::now())
    }
}

/// Fixed point in time, for replaying a verification or for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource {
    timestamp: SystemTime,
}

impl FixedTimeSource {
    /// Create from a Unix timestamp (seconds since 1970-01-01 00:00:00 UTC).
    pub fn from_unix_secs(secs: u64) -> Self {
        Self {
            timestamp: UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Result<SystemTime, SVError> {
        Ok(self.timestamp)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    secs: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(secs),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.secs.fetch_add(by.as_secs(), Ordering::SeqCst);
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Result<SystemTime, SVError> {
        Ok(UNIX_EPOCH + Duration::from_secs(self.secs.load(Ordering::SeqCst)))
    }
}

/// Parse an RFC 3339 timestamp into Unix seconds.
pub fn parse_rfc3339(s: &str) -> Result<i64, SVError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp())
        .map_err(|e| SVError::InvalidArgument(format!("Invalid RFC 3339 timestamp '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_source() {
        let now = SystemTimeSource.now_unix().unwrap();
        // 2024-01-01
        assert!(now > 1_704_067_200);
    }

    #[test]
    fn test_fixed_time_source() {
        let fixed = FixedTimeSource::from_unix_secs(1_735_689_600);
        assert_eq!(fixed.now_unix().unwrap(), 1_735_689_600);
        assert_eq!(fixed.now().unwrap(), fixed.timestamp());
    }

    #[test]
    fn test_manual_time_source() {
        let clock = ManualTimeSource::new(100);
        assert_eq!(clock.now_unix().unwrap(), 100);
        clock.advance(Duration::from_secs(50));
        assert_eq!(clock.now_unix().unwrap(), 150);
        clock.set(10);
        assert_eq!(clock.now_unix().unwrap(), 10);
    }

    #[test]
    fn test_parse_rfc3339() {
        assert_eq!(parse_rfc3339("2025-01-01T00:00:00Z").unwrap(), 1_735_689_600);
        assert_eq!(parse_rfc3339("2025-01-01T00:00:00.123Z").unwrap(), 1_735_689_600);
        assert_eq!(parse_rfc3339("2025-01-01T01:00:00+01:00").unwrap(), 1_735_689_600);
        assert!(parse_rfc3339("2025-01-01").is_err());
        assert!(parse_rfc3339("garbage").is_err());
    }
}
