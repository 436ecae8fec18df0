//! Material crafters
//!
//! One crafter per [`MaterialType`]. File-based kinds validate the file
//! format, then go through the shared upload-and-craft pipeline: hash and
//! size in one pass, enforce the backend limit, upload through the
//! backend's uploader or inline the bytes.
//!
//! Format rejections surface as [`MaterialError::InvalidMaterialType`] so
//! auto-detection can move on to the next candidate; anything else stops it.

mod artifact;
mod attestation;
mod helm;
mod junit;
mod oci;
mod pipeline;
mod sarif;
mod sbom;
mod string;
mod vex;

pub use oci::{ImageReference, ImageResolver, RegistryCredentials, RegistryResolver, ResolvedImage};
pub use pipeline::{upload_and_craft, upload_and_craft_bytes};

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::api::{Material, MaterialType};
use crate::casclient::{BlobUploader, CasClientError};
use crate::controlplane::CasBackendInfo;

/// Errors from crafting a material
#[derive(Debug, thiserror::Error)]
pub enum MaterialError {
    /// The value does not conform to the expected format
    #[error("invalid {kind} material: {reason}")]
    InvalidMaterialType { kind: MaterialType, reason: String },

    #[error("reading {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "material is too big for the {backend} CAS backend: {size} bytes exceeds the {limit} bytes limit, please contact your administrator"
    )]
    TooBigForBackend { backend: String, size: u64, limit: u64 },

    #[error("uploading material to the CAS")]
    Upload(#[from] CasClientError),

    #[error("resolving container image '{reference}': {reason}")]
    ImageResolution { reference: String, reason: String },

    #[error("could not auto-detect material kind for '{value}'")]
    AutoDetectFailed { value: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MaterialError {
    pub fn is_invalid_material_type(&self) -> bool {
        matches!(self, MaterialError::InvalidMaterialType { .. })
    }

    pub fn is_too_big_for_backend(&self) -> bool {
        matches!(self, MaterialError::TooBigForBackend { .. })
    }

    pub(crate) fn invalid(kind: MaterialType, reason: impl fmt::Display) -> Self {
        MaterialError::InvalidMaterialType {
            kind,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        MaterialError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Where crafted file content goes
#[derive(Clone)]
pub struct CasBackend {
    /// Backend name or provider, used in error messages
    pub name: String,
    /// Largest accepted blob in bytes, 0 = unlimited
    pub max_size: u64,
    /// `None` forces inline storage regardless of size
    pub uploader: Option<Arc<dyn BlobUploader>>,
}

impl CasBackend {
    /// Backend that embeds content in the attestation
    pub fn inline(name: impl Into<String>, max_size: u64) -> Self {
        Self {
            name: name.into(),
            max_size,
            uploader: None,
        }
    }

    pub fn with_uploader(
        name: impl Into<String>,
        max_size: u64,
        uploader: Arc<dyn BlobUploader>,
    ) -> Self {
        Self {
            name: name.into(),
            max_size,
            uploader: Some(uploader),
        }
    }
}

impl CasBackend {
    /// Backend described by the control plane at init time.
    /// An inline backend ignores `uploader`.
    pub fn from_backend_info(info: &CasBackendInfo, uploader: Option<Arc<dyn BlobUploader>>) -> Self {
        match uploader {
            Some(uploader) if !info.is_inline => {
                Self::with_uploader(info.provider.clone(), info.max_bytes, uploader)
            }
            _ => Self::inline(info.provider.clone(), info.max_bytes),
        }
    }
}

impl fmt::Debug for CasBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CasBackend")
            .field("name", &self.name)
            .field("max_size", &self.max_size)
            .field("uploader", &self.uploader.is_some())
            .finish()
    }
}

/// Collaborators a crafter may need
#[derive(Clone, Copy)]
pub struct CraftContext<'a> {
    pub backend: &'a CasBackend,
    pub resolver: &'a dyn ImageResolver,
}

/// Craft `value` as a material of `kind` named `id`
pub fn craft(
    kind: MaterialType,
    id: &str,
    value: &str,
    ctx: CraftContext<'_>,
) -> Result<Material, MaterialError> {
    debug!(%kind, id, "crafting material");
    match kind {
        MaterialType::String => string::craft(id, value),
        MaterialType::ContainerImage => oci::craft(id, value, ctx.resolver),
        MaterialType::Artifact | MaterialType::Evidence => artifact::craft(kind, id, value, ctx),
        MaterialType::SbomCyclonedxJson => sbom::craft_cyclonedx(id, value, ctx),
        MaterialType::SbomSpdxJson => sbom::craft_spdx(id, value, ctx),
        MaterialType::JunitXml => junit::craft(id, value, ctx),
        MaterialType::Openvex => vex::craft_openvex(id, value, ctx),
        MaterialType::CsafVex
        | MaterialType::CsafInformationalAdvisory
        | MaterialType::CsafSecurityAdvisory
        | MaterialType::CsafSecurityIncidentResponse => vex::craft_csaf(kind, id, value, ctx),
        MaterialType::Sarif => sarif::craft(id, value, ctx),
        MaterialType::HelmChart => helm::craft(id, value, ctx),
        MaterialType::Attestation => attestation::craft(id, value, ctx),
    }
}

/// Candidates tried for a value naming an existing file, most specific first.
///
/// EVIDENCE never appears: it accepts exactly what ARTIFACT accepts.
pub const FILE_AUTODETECT_ORDER: &[MaterialType] = &[
    MaterialType::Attestation,
    MaterialType::SbomCyclonedxJson,
    MaterialType::SbomSpdxJson,
    MaterialType::Openvex,
    MaterialType::CsafVex,
    MaterialType::CsafInformationalAdvisory,
    MaterialType::CsafSecurityAdvisory,
    MaterialType::CsafSecurityIncidentResponse,
    MaterialType::Sarif,
    MaterialType::JunitXml,
    MaterialType::HelmChart,
    MaterialType::Artifact,
];

/// Candidates tried for any other value
pub const VALUE_AUTODETECT_ORDER: &[MaterialType] =
    &[MaterialType::ContainerImage, MaterialType::String];

/// Detect the kind of `value` with the default priority order
pub fn auto_detect(
    id: &str,
    value: &str,
    ctx: CraftContext<'_>,
) -> Result<Material, MaterialError> {
    let candidates = if Path::new(value).is_file() {
        FILE_AUTODETECT_ORDER
    } else {
        VALUE_AUTODETECT_ORDER
    };
    auto_detect_among(id, value, ctx, candidates)
}

/// Return the first candidate that accepts `value`.
///
/// A format rejection moves on to the next candidate, as does any failure to
/// resolve a container image (a plain string is the usual fallback). Every
/// other error is returned as is.
pub fn auto_detect_among(
    id: &str,
    value: &str,
    ctx: CraftContext<'_>,
    candidates: &[MaterialType],
) -> Result<Material, MaterialError> {
    for &kind in candidates {
        match craft(kind, id, value, ctx) {
            Ok(material) => {
                debug!(%kind, id, "auto-detected material kind");
                return Ok(material);
            }
            Err(e) if e.is_invalid_material_type() => {
                debug!(%kind, error = %e, "not this kind");
            }
            Err(e @ MaterialError::ImageResolution { .. }) => {
                debug!(%kind, error = %e, "not a resolvable image");
            }
            Err(e) => return Err(e),
        }
    }
    Err(MaterialError::AutoDetectFailed {
        value: value.to_string(),
    })
}

/// Read a file that must parse as JSON; unparseable content is a format
/// rejection for `kind`.
pub(crate) fn read_json(kind: MaterialType, path: &Path) -> Result<serde_json::Value, MaterialError> {
    let bytes = std::fs::read(path).map_err(|e| MaterialError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| MaterialError::invalid(kind, e))
}
