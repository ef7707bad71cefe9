//! Audit logging for verification decisions.
//!
//! Events are emitted through `tracing` on the `sigver::audit` target, so they
//! can be routed separately from operational `log` output.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sigver::audit::{self, AuditConfig, LogDestination};
//!
//! audit::init(AuditConfig {
//!     destination: LogDestination::Stdout,
//!     ..AuditConfig::default()
//! })?;
//! ```
//!
//! # Event Types
//!
//! - `verification.attempt` - Verification started
//! - `verification.success` - Verification passed
//! - `verification.failure` - Verification failed
//! - `signature.rejected` - A keyed signature did not validate
//! - `trust_root.refreshed` - A new trust root replaced the cached one
//!
//! # JSON Output Example
//!
//! ```json
//! {
//!   "timestamp": "2026-01-04T20:00:00Z",
//!   "level": "WARN",
//!   "target": "sigver::audit",
//!   "event_type": "verification.failure",
//!   "mode": "keyed",
//!   "payload_digest": "sha256:e3b0c442...",
//!   "error_type": "signature_invalid"
//! }
//! ```
//!
//! Audit output is observability only. Nothing here can change a result.

use crate::error::SVError;
use std::sync::OnceLock;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

/// Tracing target of every audit event
pub const AUDIT_TARGET: &str = "sigver::audit";

static AUDIT_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Audit log configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Enable audit logging (default: true)
    pub enabled: bool,
    /// Log destination
    pub destination: LogDestination,
    /// Use JSON format (default: true)
    pub json_format: bool,
    /// Redact e-mail identities (default: true)
    pub redact_pii: bool,
    /// Log level filter (default: "sigver::audit=info")
    pub filter: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            destination: LogDestination::Stderr,
            json_format: true,
            redact_pii: true,
            filter: format!("{}=info", AUDIT_TARGET),
        }
    }
}

/// Audit log destination
#[derive(Debug, Clone, Default)]
pub enum LogDestination {
    Stdout,
    #[default]
    Stderr,
    /// Append to a file
    File(String),
}

static REDACT_PII: OnceLock<bool> = OnceLock::new();

/// Install the audit subscriber.
///
/// Only the first call has an effect. If another global subscriber is
/// already installed, events go to that one instead.
pub fn init(config: AuditConfig) -> Result<(), SVError> {
    if AUDIT_INITIALIZED.get().is_some() {
        return Ok(());
    }
    let _ = REDACT_PII.set(config.redact_pii);

    if !config.enabled {
        let _ = AUDIT_INITIALIZED.set(true);
        return Ok(());
    }

    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = match config.destination {
        LogDestination::Stdout if config.json_format => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_events(FmtSpan::NONE)
                    .with_writer(std::io::stdout),
            )
            .try_init(),
        LogDestination::Stdout => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stdout))
            .try_init(),
        LogDestination::Stderr if config.json_format => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_events(FmtSpan::NONE)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogDestination::Stderr => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
        LogDestination::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            if config.json_format {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_span_events(FmtSpan::NONE)
                            .with_writer(std::sync::Mutex::new(file)),
                    )
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .with_target(true)
                            .with_ansi(false)
                            .with_writer(std::sync::Mutex::new(file)),
                    )
                    .try_init()
            }
        }
    };

    if let Err(e) = installed {
        log::debug!("Audit subscriber not installed: {}", e);
    }
    let _ = AUDIT_INITIALIZED.set(true);
    Ok(())
}

/// Redact an email address for PII protection.
///
/// Transforms "user@example.com" into "us***@example.com"
pub fn redact_email(email: &str) -> String {
    if let Some(at_pos) = email.find('@') {
        let local = &email[..at_pos];
        let domain = &email[at_pos..];
        let visible: String = local.chars().take(2).collect();
        format!("{}***{}", visible, domain)
    } else {
        "***".to_string()
    }
}

/// Redact e-mail identities; URIs and key identifiers are kept as is.
pub fn redact_identity(identity: &str) -> String {
    let redact = *REDACT_PII.get().unwrap_or(&true);
    if redact && identity.contains('@') && !identity.contains("://") {
        redact_email(identity)
    } else {
        identity.to_string()
    }
}

/// Generate a new correlation ID for tracking related audit events.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn log_verification_attempt(correlation_id: &str, mode: &str, payload_digest: &str) {
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = "verification.attempt",
        correlation_id = correlation_id,
        mode = mode,
        payload_digest = payload_digest,
        "Verification initiated"
    );
}

pub fn log_verification_success(
    correlation_id: &str,
    mode: &str,
    payload_digest: &str,
    identities: &[String],
) {
    let identities_display = identities
        .iter()
        .map(|i| redact_identity(i))
        .collect::<Vec<_>>()
        .join(",");

    tracing::info!(
        target: AUDIT_TARGET,
        event_type = "verification.success",
        correlation_id = correlation_id,
        mode = mode,
        payload_digest = payload_digest,
        identity_count = identities.len(),
        identities = %identities_display,
        "Verification completed successfully"
    );
}

pub fn log_verification_failure(
    correlation_id: &str,
    mode: &str,
    payload_digest: &str,
    error_type: &str,
    error_message: &str,
) {
    let safe_message = sanitize_error_message(error_message);

    tracing::warn!(
        target: AUDIT_TARGET,
        event_type = "verification.failure",
        correlation_id = correlation_id,
        mode = mode,
        payload_digest = payload_digest,
        error_type = error_type,
        error_message = %safe_message,
        "Verification failed"
    );
}

/// A keyed signature failed validation. Carries the key fingerprint, never
/// key material.
pub fn log_signature_rejected(key_id: &str, key_fingerprint: &str, error_type: &str) {
    tracing::warn!(
        target: AUDIT_TARGET,
        event_type = "signature.rejected",
        key_id = key_id,
        key_fingerprint = key_fingerprint,
        error_type = error_type,
        "Signature rejected"
    );
}

pub fn log_trust_root_refreshed(
    target: &str,
    format_version: &str,
    certificate_authorities: usize,
    transparency_logs: usize,
) {
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = "trust_root.refreshed",
        trust_root_target = target,
        format_version = format_version,
        certificate_authorities = certificate_authorities,
        transparency_logs = transparency_logs,
        "Trust root refreshed"
    );
}

/// Sanitize error messages to avoid leaking sensitive information.
fn sanitize_error_message(message: &str) -> String {
    let sanitized = message
        .split_whitespace()
        .map(|word| {
            if word.len() > 40 && word.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_')
            {
                "[REDACTED]"
            } else {
                word
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    if sanitized.chars().count() > 500 {
        let truncated: String = sanitized.chars().take(497).collect();
        format!("{}...", truncated)
    } else {
        sanitized
    }
}
