use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::notice::UserId;

/// Opaque handle to a stored signature image.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureRef(pub String);

impl SignatureRef {
    pub fn generate() -> Self {
        Self(format!("SIG-{}", Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for SignatureRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBlob {
    pub signature_ref: SignatureRef,
    pub content_type: String,
    pub sha256_hex: String,
    pub bytes: Vec<u8>,
    pub captured_by: Option<UserId>,
    pub captured_at: DateTime<Utc>,
}

impl SignatureBlob {
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}
