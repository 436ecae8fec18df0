//! Resource names: the `{fileName, digest}` tuple addressing a blob.
//!
//! On the wire a resource name is the JSON form of the tuple, base64-encoded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::digest::{Digest, DigestError};

/// Errors building or decoding a resource name.
#[derive(Debug, thiserror::Error)]
pub enum ResourceNameError {
    #[error("file name is empty")]
    EmptyFileName,

    #[error("invalid digest: {0}")]
    Digest(#[from] DigestError),

    #[error("resource name is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("resource name payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A blob address on the CAS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceName {
    pub file_name: String,
    pub digest: Digest,
}

impl ResourceName {
    /// Build a resource name; both parts are required.
    pub fn new(file_name: impl Into<String>, digest: &str) -> Result<Self, ResourceNameError> {
        let file_name = file_name.into();
        if file_name.is_empty() {
            return Err(ResourceNameError::EmptyFileName);
        }
        let digest: Digest = digest.parse()?;
        Ok(Self { file_name, digest })
    }

    /// Encode for transport.
    pub fn encode(&self) -> Result<String, ResourceNameError> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }

    /// Decode a transported resource name and re-check its invariants.
    pub fn decode(encoded: &str) -> Result<Self, ResourceNameError> {
        let bytes = STANDARD.decode(encoded)?;
        let parsed: ResourceName = serde_json::from_slice(&bytes)?;
        if parsed.file_name.is_empty() {
            return Err(ResourceNameError::EmptyFileName);
        }
        Ok(parsed)
    }
}
