//! STRING: the value itself, no file I/O

use cas_protocol::Digest;

use super::MaterialError;
use crate::api::{Material, MaterialPayload, MaterialType};

pub(super) fn craft(id: &str, value: &str) -> Result<Material, MaterialError> {
    if value.is_empty() {
        return Err(MaterialError::invalid(MaterialType::String, "value is empty"));
    }
    Ok(Material::new(
        id,
        MaterialType::String,
        MaterialPayload::String {
            value: value.to_string(),
            digest: Digest::of_bytes(value.as_bytes()),
        },
    ))
}
