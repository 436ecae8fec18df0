//! Crafted material records

use cas_protocol::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::contract::MaterialType;

/// Type-specific content of a material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MaterialPayload {
    String {
        value: String,
        digest: Digest,
    },
    ContainerImage {
        /// Repository name, e.g. `ghcr.io/acme/widget`
        name: String,
        digest: Digest,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        tag: String,
        #[serde(default)]
        is_subject: bool,
    },
    /// Every file-based kind
    Artifact {
        /// File name (no directories)
        name: String,
        digest: Digest,
        #[serde(default, with = "inline_content", skip_serializing_if = "Option::is_none")]
        content: Option<Vec<u8>>,
        #[serde(default)]
        is_subject: bool,
    },
}

impl MaterialPayload {
    pub fn digest(&self) -> &Digest {
        match self {
            Self::String { digest, .. }
            | Self::ContainerImage { digest, .. }
            | Self::Artifact { digest, .. } => digest,
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::ContainerImage { .. } => "container_image",
            Self::Artifact { .. } => "artifact",
        }
    }
}

/// Reasons a material fails validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaterialValidationError {
    #[error("material id is empty")]
    EmptyId,

    #[error("material '{id}' of type {kind} carries a {shape} payload")]
    PayloadMismatch {
        id: String,
        kind: MaterialType,
        shape: &'static str,
    },

    #[error("material '{id}': {field} is empty")]
    EmptyField { id: String, field: &'static str },

    #[error("material '{id}': must be either uploaded to the CAS or inlined, not both or neither")]
    StorageConflict { id: String },

    #[error("material '{id}': inline storage without content")]
    MissingInlineContent { id: String },

    #[error("material '{id}': content embedded although it was uploaded to the CAS")]
    UnexpectedInlineContent { id: String },
}

/// One typed, content-addressed unit of evidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    /// Material name (key in the attestation)
    pub id: String,

    pub material_type: MaterialType,

    pub added_at: DateTime<Utc>,

    pub payload: MaterialPayload,

    #[serde(default)]
    pub uploaded_to_cas: bool,

    #[serde(default)]
    pub inline_cas: bool,

    /// Declared as an output in the contract
    #[serde(default)]
    pub output: bool,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Material {
    pub fn new(id: impl Into<String>, material_type: MaterialType, payload: MaterialPayload) -> Self {
        Self {
            id: id.into(),
            material_type,
            added_at: Utc::now(),
            payload,
            uploaded_to_cas: false,
            inline_cas: false,
            output: false,
            annotations: BTreeMap::new(),
        }
    }

    pub fn digest(&self) -> &Digest {
        self.payload.digest()
    }

    /// Whether this material is a subject of the attestation
    pub fn is_subject(&self) -> bool {
        match &self.payload {
            MaterialPayload::ContainerImage { is_subject, .. }
            | MaterialPayload::Artifact { is_subject, .. } => *is_subject || self.output,
            MaterialPayload::String { .. } => self.output,
        }
    }

    /// Type-specific required-field checks
    pub fn validate(&self) -> Result<(), MaterialValidationError> {
        if self.id.is_empty() {
            return Err(MaterialValidationError::EmptyId);
        }

        let expected_shape = match self.material_type {
            MaterialType::String => "string",
            MaterialType::ContainerImage => "container_image",
            _ => "artifact",
        };
        if self.payload.shape() != expected_shape {
            return Err(MaterialValidationError::PayloadMismatch {
                id: self.id.clone(),
                kind: self.material_type,
                shape: self.payload.shape(),
            });
        }

        let empty = |field| MaterialValidationError::EmptyField {
            id: self.id.clone(),
            field,
        };

        match &self.payload {
            MaterialPayload::String { value, .. } => {
                if value.is_empty() {
                    return Err(empty("value"));
                }
                self.check_no_cas()
            }
            MaterialPayload::ContainerImage { name, .. } => {
                if name.is_empty() {
                    return Err(empty("name"));
                }
                self.check_no_cas()
            }
            MaterialPayload::Artifact { name, content, .. } => {
                if name.is_empty() {
                    return Err(empty("name"));
                }
                if self.uploaded_to_cas == self.inline_cas {
                    return Err(MaterialValidationError::StorageConflict { id: self.id.clone() });
                }
                if self.inline_cas && content.is_none() {
                    return Err(MaterialValidationError::MissingInlineContent { id: self.id.clone() });
                }
                if self.uploaded_to_cas && content.is_some() {
                    return Err(MaterialValidationError::UnexpectedInlineContent {
                        id: self.id.clone(),
                    });
                }
                Ok(())
            }
        }
    }

    fn check_no_cas(&self) -> Result<(), MaterialValidationError> {
        if self.uploaded_to_cas || self.inline_cas {
            return Err(MaterialValidationError::StorageConflict { id: self.id.clone() });
        }
        Ok(())
    }
}

/// Inline bytes are persisted base64-encoded
mod inline_content {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
