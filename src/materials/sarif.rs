//! SARIF 2.1.0 reports

use std::path::Path;

use serde_json::Value;

use super::{read_json, upload_and_craft, CraftContext, MaterialError};
use crate::api::{Material, MaterialType};

fn check_sarif(doc: &Value) -> Result<(), String> {
    if doc.get("version").and_then(Value::as_str) != Some("2.1.0") {
        return Err("version is not 2.1.0".into());
    }
    let runs = doc
        .get("runs")
        .and_then(Value::as_array)
        .ok_or("missing runs array")?;
    for run in runs {
        if run.pointer("/tool/driver/name").and_then(Value::as_str).is_none() {
            return Err("run without tool.driver.name".into());
        }
    }
    Ok(())
}

pub(super) fn craft(id: &str, value: &str, ctx: CraftContext<'_>) -> Result<Material, MaterialError> {
    let kind = MaterialType::Sarif;
    let path = Path::new(value);
    let doc = read_json(kind, path)?;
    check_sarif(&doc).map_err(|reason| MaterialError::invalid(kind, reason))?;
    upload_and_craft(kind, id, path, ctx.backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepts_report() {
        let doc = json!({"version": "2.1.0", "runs": [{"tool": {"driver": {"name": "clippy"}}, "results": []}]});
        assert!(check_sarif(&doc).is_ok());
    }

    #[test]
    fn test_rejects_other_versions_and_shapes() {
        assert!(check_sarif(&json!({"version": "2.0.0", "runs": []})).is_err());
        assert!(check_sarif(&json!({"version": "2.1.0"})).is_err());
        assert!(check_sarif(&json!({"version": "2.1.0", "runs": [{}]})).is_err());
    }
}
