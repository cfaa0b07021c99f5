//! Validation of captured signature images.
//!
//! A signature is a raster image drawn by the approver. Nothing here checks
//! what the picture shows; the only guarantees are that the payload is
//! non-empty, within the size ceiling, and decodable.

use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};

use crate::errors::ApprovalError;

pub const DEFAULT_MAX_SIGNATURE_BYTES: usize = 512 * 1024;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
const JPEG_MAGIC: &[u8] = &[0xff, 0xd8, 0xff];
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignaturePolicy {
    pub max_bytes: usize,
}

impl Default for SignaturePolicy {
    fn default() -> Self {
        Self { max_bytes: DEFAULT_MAX_SIGNATURE_BYTES }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedSignature {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub sha256_hex: String,
}

/// Bytes as posted by a client, before validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignaturePayload {
    pub bytes: Vec<u8>,
    pub declared_content_type: Option<String>,
}

impl SignaturePayload {
    pub fn raw(bytes: Vec<u8>) -> Self {
        Self { bytes, declared_content_type: None }
    }

    /// Accepts either a data URL (`data:image/png;base64,...`) or bare base64.
    pub fn decode(encoded: &str) -> Result<Self, ApprovalError> {
        let trimmed = encoded.trim();
        if trimmed.is_empty() {
            return Err(ApprovalError::InvalidSignature("signature payload is empty".to_owned()));
        }

        let (declared_content_type, body) = match trimmed.strip_prefix("data:") {
            Some(rest) => {
                let (header, body) = rest.split_once(',').ok_or_else(|| {
                    ApprovalError::InvalidSignature("data URL is missing its payload".to_owned())
                })?;
                let Some(media_type) = header.strip_suffix(";base64") else {
                    return Err(ApprovalError::InvalidSignature(
                        "data URL must be base64 encoded".to_owned(),
                    ));
                };
                let media_type = media_type.trim();
                ((!media_type.is_empty()).then(|| media_type.to_ascii_lowercase()), body)
            }
            None => (None, trimmed),
        };

        let compact: String = body.chars().filter(|ch| !ch.is_ascii_whitespace()).collect();
        let bytes = STANDARD.decode(compact.as_bytes()).map_err(|error| {
            ApprovalError::InvalidSignature(format!("payload is not valid base64: {error}"))
        })?;

        Ok(Self { bytes, declared_content_type })
    }
}

impl SignaturePolicy {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn validate(&self, payload: SignaturePayload) -> Result<ValidatedSignature, ApprovalError> {
        let SignaturePayload { bytes, declared_content_type } = payload;

        if bytes.is_empty() {
            return Err(ApprovalError::InvalidSignature("signature image is empty".to_owned()));
        }
        if bytes.len() > self.max_bytes {
            return Err(ApprovalError::InvalidSignature(format!(
                "signature image is {} bytes; the limit is {} bytes",
                bytes.len(),
                self.max_bytes
            )));
        }

        let content_type = declared_content_type
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| sniff_content_type(&bytes).to_owned());
        let sha256_hex = format!("{:x}", Sha256::digest(&bytes));

        Ok(ValidatedSignature { bytes, content_type, sha256_hex })
    }
}

fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(PNG_MAGIC) {
        "image/png"
    } else if bytes.starts_with(JPEG_MAGIC) {
        "image/jpeg"
    } else {
        FALLBACK_CONTENT_TYPE
    }
}
