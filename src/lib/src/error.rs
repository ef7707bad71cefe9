/// The sigver error type.
///
/// Every verification failure surfaces as one of these variants; there is no
/// "partially verified" success.
#[derive(Debug, thiserror::Error)]
pub enum SVError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Malformed bundle: {0}")]
    MalformedBundle(String),

    #[error("Trust root unavailable: {0}")]
    TrustRootUnavailable(String),

    #[error("Trust root malformed: {0}")]
    TrustRootMalformed(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("I/O error")]
    IOError(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: [{0}]")]
    InternalError(String),
}

impl SVError {
    /// Stable label for audit events and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SVError::MalformedEnvelope(_) => "malformed_envelope",
            SVError::MalformedBundle(_) => "malformed_bundle",
            SVError::TrustRootUnavailable(_) => "trust_root_unavailable",
            SVError::TrustRootMalformed(_) => "trust_root_malformed",
            SVError::KeyNotFound(_) => "key_not_found",
            SVError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            SVError::SignatureInvalid(_) => "signature_invalid",
            SVError::VerificationFailed(_) => "verification_failed",
            SVError::IOError(_) => "io_error",
            SVError::InvalidArgument(_) => "invalid_argument",
            SVError::InternalError(_) => "internal_error",
        }
    }
}

// X509 error conversion
impl From<x509_parser::error::X509Error> for SVError {
    fn from(err: x509_parser::error::X509Error) -> Self {
        SVError::VerificationFailed(format!("X.509 error: {:?}", err))
    }
}

// DER error conversion
impl From<x509_cert::der::Error> for SVError {
    fn from(err: x509_cert::der::Error) -> Self {
        SVError::VerificationFailed(format!("DER error: {}", err))
    }
}
