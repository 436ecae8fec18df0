//! ATTESTATION: a DSSE-wrapped in-toto statement used as a material
//!
//! The envelope is stored canonicalized (RFC 8785) so the same attestation
//! always yields the same digest, whatever its original formatting.

use std::fs;
use std::path::Path;

use super::pipeline::file_name_of;
use super::{upload_and_craft_bytes, CraftContext, MaterialError};
use crate::api::{Material, MaterialType};
use crate::renderer::{Envelope, Statement, IN_TOTO_PAYLOAD_TYPE};

fn parse(bytes: &[u8]) -> Result<Envelope, String> {
    let envelope = Envelope::from_json(bytes).map_err(|e| e.to_string())?;
    if envelope.payload_type != IN_TOTO_PAYLOAD_TYPE {
        return Err(format!("unexpected payloadType '{}'", envelope.payload_type));
    }
    let payload = envelope.decode_payload().map_err(|e| e.to_string())?;
    let statement: Statement =
        serde_json::from_slice(&payload).map_err(|e| format!("payload is not a statement: {}", e))?;
    statement.check().map_err(|e| e.to_string())?;
    Ok(envelope)
}

pub(super) fn craft(id: &str, value: &str, ctx: CraftContext<'_>) -> Result<Material, MaterialError> {
    let kind = MaterialType::Attestation;
    let path = Path::new(value);
    let bytes = fs::read(path).map_err(|e| MaterialError::io(path, e))?;
    let envelope = parse(&bytes).map_err(|reason| MaterialError::invalid(kind, reason))?;

    let canonical = serde_json_canonicalizer::to_vec(&envelope)?;
    upload_and_craft_bytes(kind, id, &file_name_of(path), canonical, ctx.backend)
}
