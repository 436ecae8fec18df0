//! HELM_CHART packaged charts (`.tgz`)

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path};

use flate2::read::GzDecoder;

use super::{upload_and_craft, CraftContext, MaterialError};
use crate::api::{Material, MaterialType};

const CHART_FILE: &str = "Chart.yaml";
const VALUES_FILE: &str = "values.yaml";

/// `<chart>/<file>` at the top level of the archive
fn top_level_file(path: &Path) -> Option<String> {
    let parts: Vec<_> = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    match parts.as_slice() {
        [Component::Normal(_), Component::Normal(file)] => Some(file.to_string_lossy().into_owned()),
        _ => None,
    }
}

fn check_chart_yaml(contents: &str) -> Result<(), String> {
    for key in ["apiVersion:", "name:", "version:"] {
        if !contents.lines().any(|l| l.starts_with(key)) {
            return Err(format!("{} has no top-level {}", CHART_FILE, key.trim_end_matches(':')));
        }
    }
    Ok(())
}

fn check_helm<R: Read>(source: R) -> Result<(), String> {
    let mut archive = tar::Archive::new(GzDecoder::new(source));
    let entries = archive.entries().map_err(|e| format!("not a gzipped tarball: {}", e))?;

    let mut chart_yaml = None;
    let mut has_values = false;
    for entry in entries {
        let mut entry = entry.map_err(|e| format!("corrupt archive: {}", e))?;
        let path = entry
            .path()
            .map_err(|e| format!("corrupt archive entry: {}", e))?
            .into_owned();
        match top_level_file(&path).as_deref() {
            Some(CHART_FILE) => {
                let mut contents = String::new();
                entry
                    .read_to_string(&mut contents)
                    .map_err(|e| format!("unreadable {}: {}", CHART_FILE, e))?;
                chart_yaml = Some(contents);
            }
            Some(VALUES_FILE) => has_values = true,
            _ => {}
        }
    }

    let chart_yaml = chart_yaml.ok_or_else(|| format!("missing {}", CHART_FILE))?;
    check_chart_yaml(&chart_yaml)?;
    if !has_values {
        return Err(format!("missing {}", VALUES_FILE));
    }
    Ok(())
}

pub(super) fn craft(id: &str, value: &str, ctx: CraftContext<'_>) -> Result<Material, MaterialError> {
    let kind = MaterialType::HelmChart;
    let path = Path::new(value);
    let file = File::open(path).map_err(|e| MaterialError::io(path, e))?;
    check_helm(BufReader::new(file)).map_err(|reason| MaterialError::invalid(kind, reason))?;
    upload_and_craft(kind, id, path, ctx.backend)
}

#[cfg(test)]
pub(crate) fn chart_tgz(files: &[(&str, &str)]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}
