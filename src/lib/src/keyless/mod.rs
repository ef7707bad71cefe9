//! Keyless (Sigstore) verification
//!
//! A bundle binds a signature to a short-lived certificate issued by a
//! trusted certificate authority, and proves through transparency log
//! entries that the signature was logged while the certificate was valid.
//!
//! ```text
//! resolve trust root -> parse bundle -> identity policy -> signature
//!   -> log entries (SET, inclusion proof, checkpoint, body)
//!   -> RFC 3161 timestamps
//!   -> certificate chain at each verified timestamp -> embedded SCTs
//! ```

pub mod bundle;
pub mod cert;
pub mod merkle;
pub mod policy;
pub mod sct;
pub mod timestamp;
pub mod tlog;
mod verifier;

pub use bundle::{Bundle, BundleContent, BundleVersion, VerificationMaterial};
pub use cert::SignerIdentity;
pub use policy::{ArtifactPolicy, CertificateIdentity, IdentityPolicy, VerificationPolicy};
pub use verifier::{KeylessOutcome, KeylessVerifier};
