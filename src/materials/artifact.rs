//! ARTIFACT and EVIDENCE: any readable file

use std::path::Path;

use super::{upload_and_craft, CraftContext, MaterialError};
use crate::api::{Material, MaterialType};

pub(super) fn craft(
    kind: MaterialType,
    id: &str,
    value: &str,
    ctx: CraftContext<'_>,
) -> Result<Material, MaterialError> {
    let path = Path::new(value);
    if path.is_dir() {
        return Err(MaterialError::invalid(kind, "path is a directory"));
    }
    upload_and_craft(kind, id, path, ctx.backend)
}
