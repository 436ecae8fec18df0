//! OPENVEX and the CSAF document family

use std::path::Path;

use serde_json::Value;

use super::{read_json, upload_and_craft, CraftContext, MaterialError};
use crate::api::{Material, MaterialType};

const OPENVEX_CONTEXT_PREFIX: &str = "https://openvex.dev/ns";

fn check_openvex(doc: &Value) -> Result<(), String> {
    match doc.get("@context").and_then(Value::as_str) {
        Some(ctx) if ctx.starts_with(OPENVEX_CONTEXT_PREFIX) => {}
        _ => return Err("@context is not an OpenVEX namespace".into()),
    }
    if doc.get("@id").and_then(Value::as_str).is_none() {
        return Err("missing @id".into());
    }
    if !doc.get("statements").map(Value::is_array).unwrap_or(false) {
        return Err("missing statements array".into());
    }
    Ok(())
}

/// `document.category` value for each CSAF kind
fn csaf_category(kind: MaterialType) -> Option<&'static str> {
    match kind {
        MaterialType::CsafVex => Some("csaf_vex"),
        MaterialType::CsafInformationalAdvisory => Some("csaf_informational_advisory"),
        MaterialType::CsafSecurityAdvisory => Some("csaf_security_advisory"),
        MaterialType::CsafSecurityIncidentResponse => Some("csaf_security_incident_response"),
        _ => None,
    }
}

fn check_csaf(doc: &Value, category: &str) -> Result<(), String> {
    let document = doc.get("document").ok_or("missing document section")?;
    match document.get("csaf_version").and_then(Value::as_str) {
        Some("2.0") => {}
        Some(v) => return Err(format!("unsupported csaf_version {}", v)),
        None => return Err("missing document.csaf_version".into()),
    }
    match document.get("category").and_then(Value::as_str) {
        Some(c) if c == category => {}
        Some(c) => return Err(format!("category {} is not {}", c, category)),
        None => return Err("missing document.category".into()),
    }
    for field in ["title", "publisher", "tracking"] {
        if document.get(field).is_none() {
            return Err(format!("missing document.{}", field));
        }
    }
    Ok(())
}

pub(super) fn craft_openvex(
    id: &str,
    value: &str,
    ctx: CraftContext<'_>,
) -> Result<Material, MaterialError> {
    let kind = MaterialType::Openvex;
    let path = Path::new(value);
    let doc = read_json(kind, path)?;
    check_openvex(&doc).map_err(|reason| MaterialError::invalid(kind, reason))?;
    upload_and_craft(kind, id, path, ctx.backend)
}

pub(super) fn craft_csaf(
    kind: MaterialType,
    id: &str,
    value: &str,
    ctx: CraftContext<'_>,
) -> Result<Material, MaterialError> {
    let category = csaf_category(kind)
        .ok_or_else(|| MaterialError::invalid(kind, "not a CSAF material kind"))?;
    let path = Path::new(value);
    let doc = read_json(kind, path)?;
    check_csaf(&doc, category).map_err(|reason| MaterialError::invalid(kind, reason))?;
    upload_and_craft(kind, id, path, ctx.backend)
}
