//! Signature verification for signed attestations.
//!
//! Two trust models are supported, each fixed when a [`Verifier`] is built:
//!
//! - **keyless**: Sigstore bundles, verified against a trust root resolved
//!   through a [`TrustRootProvider`] and a [`VerificationPolicy`].
//! - **keyed**: DSSE envelopes, whose signatures are verified with keys
//!   resolved through a [`KeyLookup`].
//!
//! ```rust,ignore
//! use sigver::{EnvelopeCodec, MemoryKeyLookup, Verifier};
//! use std::sync::Arc;
//!
//! let verifier = Verifier::keyed(Arc::new(lookup), EnvelopeCodec::default());
//! let identities = verifier.verify(&envelope_json)?;
//! ```

#![forbid(unsafe_code)]

mod error;

/// DSSE envelope codec
pub mod envelope;

/// Public keys, key lookup and signature validation
pub mod signature;

/// Keyless trust root resolution and caching
pub mod trust_root;

/// Keyless (Sigstore bundle) verification
pub mod keyless;

/// Key-based (DSSE envelope) verification
pub mod keyed;

mod facade;

/// Clock abstraction
pub mod time;

/// Structured audit events for verification decisions
pub mod audit;

/// Verification counters and latency
pub mod metrics;

pub use envelope::{CodecConfig, Envelope, EnvelopeCodec};
pub use error::*;
pub use facade::{VerificationMode, VerifiedIdentity, Verifier};
pub use keyed::KeyedVerifier;
pub use keyless::{CertificateIdentity, KeylessOutcome, KeylessVerifier, VerificationPolicy};
pub use signature::{
    DirectoryKeyLookup, HashAlgorithm, KeyLookup, MemoryKeyLookup, PublicKey, TrustedKey,
};
pub use trust_root::{RefreshPolicy, TrustRootMaterial, TrustRootProvider};

pub mod reexports {
    pub use {log, thiserror};
}
