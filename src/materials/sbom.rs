//! SBOM_CYCLONEDX_JSON and SBOM_SPDX_JSON

use std::path::Path;

use serde_json::Value;

use super::{read_json, upload_and_craft, CraftContext, MaterialError};
use crate::api::{Material, MaterialType};

fn check_cyclonedx(doc: &Value) -> Result<(), String> {
    if doc.get("bomFormat").and_then(Value::as_str) != Some("CycloneDX") {
        return Err("bomFormat is not CycloneDX".into());
    }
    match doc.get("specVersion").and_then(Value::as_str) {
        Some(v) if v.starts_with("1.") => {}
        Some(v) => return Err(format!("unsupported specVersion {}", v)),
        None => return Err("missing specVersion".into()),
    }
    if let Some(components) = doc.get("components") {
        if !components.is_array() {
            return Err("components is not an array".into());
        }
    }
    Ok(())
}

fn check_spdx(doc: &Value) -> Result<(), String> {
    match doc.get("spdxVersion").and_then(Value::as_str) {
        Some(v) if v.starts_with("SPDX-") => {}
        _ => return Err("missing or malformed spdxVersion".into()),
    }
    if doc.get("SPDXID").and_then(Value::as_str).is_none() {
        return Err("missing SPDXID".into());
    }
    if doc.get("name").and_then(Value::as_str).is_none() {
        return Err("missing document name".into());
    }
    Ok(())
}

pub(super) fn craft_cyclonedx(
    id: &str,
    value: &str,
    ctx: CraftContext<'_>,
) -> Result<Material, MaterialError> {
    let kind = MaterialType::SbomCyclonedxJson;
    let path = Path::new(value);
    let doc = read_json(kind, path)?;
    check_cyclonedx(&doc).map_err(|reason| MaterialError::invalid(kind, reason))?;
    upload_and_craft(kind, id, path, ctx.backend)
}

pub(super) fn craft_spdx(
    id: &str,
    value: &str,
    ctx: CraftContext<'_>,
) -> Result<Material, MaterialError> {
    let kind = MaterialType::SbomSpdxJson;
    let path = Path::new(value);
    let doc = read_json(kind, path)?;
    check_spdx(&doc).map_err(|reason| MaterialError::invalid(kind, reason))?;
    upload_and_craft(kind, id, path, ctx.backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cyclonedx_accepts_minimal_bom() {
        let doc = json!({"bomFormat": "CycloneDX", "specVersion": "1.5", "version": 1});
        assert!(check_cyclonedx(&doc).is_ok());
    }

    #[test]
    fn test_cyclonedx_rejects_spdx() {
        let doc = json!({"spdxVersion": "SPDX-2.3", "SPDXID": "SPDXRef-DOCUMENT", "name": "x"});
        assert!(check_cyclonedx(&doc).is_err());
        assert!(check_spdx(&doc).is_ok());
    }

    #[test]
    fn test_cyclonedx_rejects_bad_components() {
        let doc = json!({"bomFormat": "CycloneDX", "specVersion": "1.4", "components": {}});
        assert!(check_cyclonedx(&doc).is_err());
    }

    #[test]
    fn test_spdx_requires_id() {
        let doc = json!({"spdxVersion": "SPDX-2.3", "name": "x"});
        assert!(check_spdx(&doc).is_err());
    }
}
