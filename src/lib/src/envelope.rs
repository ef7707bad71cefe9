//! DSSE envelope codec
//!
//! Wire shape (JSON):
//!
//! ```text
//! {
//!   "payloadType": "application/vnd.in-toto+json",
//!   "payload": "<base64>",
//!   "signatures": [ { "keyid": "<id>", "sig": "<base64>" }, ... ]
//! }
//! ```
//!
//! Payload and signature bytes are decoded during parsing, so the rest of the
//! crate only ever sees raw bytes.

use crate::error::SVError;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Default upper bound on the size of an encoded envelope document
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

/// Top-level fields of the DSSE wire format
const ENVELOPE_FIELDS: [&str; 3] = ["payloadType", "payload", "signatures"];

/// A signed envelope: a typed payload and an ordered list of signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub payload_type: String,
    pub payload: Vec<u8>,
    pub signatures: Vec<Signature>,
}

/// One signature entry of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Identifier of the key that produced the signature
    pub key_id: String,
    /// Raw signature bytes
    pub sig: Vec<u8>,
}

impl Envelope {
    pub fn new(payload_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            payload_type: payload_type.into(),
            payload,
            signatures: Vec::new(),
        }
    }

    /// Append a signature, keeping envelope order.
    pub fn with_signature(mut self, key_id: impl Into<String>, sig: Vec<u8>) -> Self {
        self.signatures.push(Signature {
            key_id: key_id.into(),
            sig,
        });
        self
    }

    /// Bytes that DSSE signatures are computed over.
    pub fn pae(&self) -> Vec<u8> {
        pae(&self.payload_type, &self.payload)
    }
}

/// DSSE v1 pre-authentication encoding.
///
/// `"DSSEv1" SP LEN(type) SP type SP LEN(payload) SP payload`, lengths as
/// ASCII decimal.
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let type_len = payload_type.len().to_string();
    let payload_len = payload.len().to_string();

    let mut out = Vec::with_capacity(
        16 + type_len.len() + payload_type.len() + payload_len.len() + payload.len(),
    );
    out.extend_from_slice(b"DSSEv1 ");
    out.extend_from_slice(type_len.as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload_type.as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload_len.as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload);
    out
}

/// Codec configuration, fixed when the codec is built.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Reject unknown top-level fields and a missing `signatures` array
    pub strict: bool,

    /// Reject documents larger than this many bytes
    pub max_document_bytes: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            strict: false,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

impl CodecConfig {
    /// Configuration that follows the DSSE schema to the letter
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    pub fn with_max_document_bytes(mut self, max: usize) -> Self {
        self.max_document_bytes = max;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    payload_type: Option<String>,
    payload: Option<String>,
    #[serde(default)]
    signatures: Option<Vec<WireSignature>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireSignature {
    #[serde(default)]
    keyid: Option<String>,
    #[serde(default)]
    sig: Option<String>,
}

/// Parser and serializer for DSSE envelopes.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeCodec {
    config: CodecConfig,
}

impl EnvelopeCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Parse a JSON envelope document, decoding payload and signatures.
    pub fn parse(&self, bytes: &[u8]) -> Result<Envelope, SVError> {
        if bytes.len() > self.config.max_document_bytes {
            return Err(SVError::MalformedEnvelope(format!(
                "Document too large: {} bytes (max {})",
                bytes.len(),
                self.config.max_document_bytes
            )));
        }

        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| SVError::MalformedEnvelope(format!("Invalid JSON: {}", e)))?;

        let object = value.as_object().ok_or_else(|| {
            SVError::MalformedEnvelope("Top-level value is not an object".to_string())
        })?;

        if self.config.strict {
            if let Some(unknown) = object
                .keys()
                .find(|k| !ENVELOPE_FIELDS.contains(&k.as_str()))
            {
                return Err(SVError::MalformedEnvelope(format!(
                    "Unknown field '{}'",
                    unknown
                )));
            }
        }

        let wire: WireEnvelope = serde_json::from_value(value)
            .map_err(|e| SVError::MalformedEnvelope(format!("Invalid envelope: {}", e)))?;

        let payload_type = wire
            .payload_type
            .ok_or_else(|| SVError::MalformedEnvelope("Missing payloadType".to_string()))?;

        let payload_b64 = wire
            .payload
            .ok_or_else(|| SVError::MalformedEnvelope("Missing payload".to_string()))?;
        let payload = self
            .decode(&payload_b64)
            .map_err(|e| SVError::MalformedEnvelope(format!("Invalid payload encoding: {}", e)))?;

        let wire_signatures = match wire.signatures {
            Some(signatures) => signatures,
            None if self.config.strict => {
                return Err(SVError::MalformedEnvelope(
                    "Missing signatures".to_string(),
                ))
            }
            None => Vec::new(),
        };

        let mut signatures = Vec::with_capacity(wire_signatures.len());
        for (i, entry) in wire_signatures.into_iter().enumerate() {
            let key_id = match entry.keyid {
                Some(id) if !id.is_empty() => id,
                _ => {
                    return Err(SVError::MalformedEnvelope(format!(
                        "Signature {} has no key identifier",
                        i
                    )))
                }
            };
            let sig_b64 = entry.sig.ok_or_else(|| {
                SVError::MalformedEnvelope(format!("Signature {} has no sig field", i))
            })?;
            let sig = self.decode(&sig_b64).map_err(|e| {
                SVError::MalformedEnvelope(format!("Invalid encoding of signature {}: {}", i, e))
            })?;
            signatures.push(Signature { key_id, sig });
        }

        log::debug!(
            "Parsed envelope: type={}, payload={} bytes, {} signature(s)",
            payload_type,
            payload.len(),
            signatures.len()
        );

        Ok(Envelope {
            payload_type,
            payload,
            signatures,
        })
    }

    /// Serialize an envelope to its JSON wire form.
    pub fn serialize(&self, envelope: &Envelope) -> Result<Vec<u8>, SVError> {
        let wire = WireEnvelope {
            payload_type: Some(envelope.payload_type.clone()),
            payload: Some(STANDARD.encode(&envelope.payload)),
            signatures: Some(
                envelope
                    .signatures
                    .iter()
                    .map(|s| WireSignature {
                        keyid: Some(s.key_id.clone()),
                        sig: Some(STANDARD.encode(&s.sig)),
                    })
                    .collect(),
            ),
        };
        serde_json::to_vec(&wire)
            .map_err(|e| SVError::InternalError(format!("Failed to serialize envelope: {}", e)))
    }

    fn decode(&self, s: &str) -> Result<Vec<u8>, base64::DecodeError> {
        match STANDARD.decode(s) {
            Ok(bytes) => Ok(bytes),
            Err(e) if self.config.strict => Err(e),
            Err(e) => STANDARD_NO_PAD
                .decode(s)
                .or_else(|_| URL_SAFE.decode(s))
                .or_else(|_| URL_SAFE_NO_PAD.decode(s))
                .map_err(|_| e),
        }
    }
}
