//! Shared upload-and-craft pipeline for file-based kinds

use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use cas_protocol::Digest;
use tracing::debug;

use super::{CasBackend, MaterialError};
use crate::api::{Material, MaterialPayload, MaterialType};

fn check_size(backend: &CasBackend, size: u64) -> Result<(), MaterialError> {
    if backend.max_size > 0 && size > backend.max_size {
        return Err(MaterialError::TooBigForBackend {
            backend: backend.name.clone(),
            size,
            limit: backend.max_size,
        });
    }
    Ok(())
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn artifact(kind: MaterialType, id: &str, name: String, digest: Digest) -> Material {
    Material::new(
        id,
        kind,
        MaterialPayload::Artifact {
            name,
            digest,
            content: None,
            is_subject: false,
        },
    )
}

/// Hash and size `path`, then upload it or inline it.
///
/// Inline content is read once and hashed in memory, so the embedded bytes
/// always match the recorded digest.
pub fn upload_and_craft(
    kind: MaterialType,
    id: &str,
    path: &Path,
    backend: &CasBackend,
) -> Result<Material, MaterialError> {
    let Some(uploader) = &backend.uploader else {
        let size = fs::metadata(path).map_err(|e| MaterialError::io(path, e))?.len();
        check_size(backend, size)?;
        let data = fs::read(path).map_err(|e| MaterialError::io(path, e))?;
        return upload_and_craft_bytes(kind, id, &file_name_of(path), data, backend);
    };

    let file = File::open(path).map_err(|e| MaterialError::io(path, e))?;
    let (digest, size) =
        Digest::of_reader(BufReader::new(file)).map_err(|e| MaterialError::io(path, e))?;
    check_size(backend, size)?;

    let result = uploader.upload_file(path, &digest.to_string())?;
    debug!(id, digest = %digest, committed = result.committed_size, "material uploaded");
    let mut material = artifact(kind, id, file_name_of(path), digest);
    material.uploaded_to_cas = true;
    Ok(material)
}

/// Same as [`upload_and_craft`] for content already in memory
pub fn upload_and_craft_bytes(
    kind: MaterialType,
    id: &str,
    filename: &str,
    data: Vec<u8>,
    backend: &CasBackend,
) -> Result<Material, MaterialError> {
    let digest = Digest::of_bytes(&data);
    check_size(backend, data.len() as u64)?;

    let mut material = artifact(kind, id, filename.to_string(), digest.clone());
    match &backend.uploader {
        Some(uploader) => {
            uploader.upload_bytes(&data, filename, &digest.to_string())?;
            material.uploaded_to_cas = true;
        }
        None => {
            if let MaterialPayload::Artifact { content, .. } = &mut material.payload {
                *content = Some(data);
            }
            material.inline_cas = true;
        }
    }
    Ok(material)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::casclient::{CasClient, ClientConfig, InMemoryCas};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn file_of(dir: &TempDir, size: usize) -> std::path::PathBuf {
        let path = dir.path().join("blob.bin");
        fs::write(&path, vec![b'x'; size]).unwrap();
        path
    }

    #[test]
    fn test_size_limit_enforced_with_uploader() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, 100);
        let cas = InMemoryCas::new();
        let client = CasClient::new(Arc::new(cas), ClientConfig::default());
        let backend = CasBackend::with_uploader("s3", 50, Arc::new(client));

        let err = upload_and_craft(MaterialType::Artifact, "a", &path, &backend).unwrap_err();
        match err {
            MaterialError::TooBigForBackend { backend, size, limit } => {
                assert_eq!(backend, "s3");
                assert_eq!(size, 100);
                assert_eq!(limit, 50);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unlimited_backend_accepts_large_file() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, 100);
        let backend = CasBackend::inline("inline", 0);

        let m = upload_and_craft(MaterialType::Artifact, "a", &path, &backend).unwrap();
        assert!(m.inline_cas);
        assert!(!m.uploaded_to_cas);
        m.validate().unwrap();
    }

    #[test]
    fn test_uploader_marks_uploaded_and_stores_blob() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, 10);
        let cas = InMemoryCas::new();
        let client = CasClient::new(Arc::new(cas.clone()), ClientConfig::default());
        let backend = CasBackend::with_uploader("oci", 0, Arc::new(client));

        let m = upload_and_craft(MaterialType::Evidence, "e", &path, &backend).unwrap();
        assert!(m.uploaded_to_cas);
        assert!(cas.contains(&m.digest().to_string()));
        m.validate().unwrap();
    }

    #[test]
    fn test_inline_content_matches_recorded_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "release notes").unwrap();
        let backend = CasBackend::inline("inline", 0);

        let m = upload_and_craft(MaterialType::Artifact, "notes", &path, &backend).unwrap();
        match &m.payload {
            MaterialPayload::Artifact { content, name, digest, .. } => {
                let content = content.as_deref().unwrap();
                assert_eq!(content, b"release notes");
                assert_eq!(digest, &Digest::of_bytes(content));
                assert_eq!(name, "notes.txt");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_inline_size_limit_checked_before_reading() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, 100);
        let backend = CasBackend::inline("inline", 10);

        let err = upload_and_craft(MaterialType::Artifact, "a", &path, &backend).unwrap_err();
        assert!(matches!(err, MaterialError::TooBigForBackend { size: 100, limit: 10, .. }));
    }

    #[test]
    fn test_bytes_variant_inlines_content() {
        let backend = CasBackend::inline("inline", 0);
        let m = upload_and_craft_bytes(MaterialType::Attestation, "att", "att.json", b"{}".to_vec(), &backend)
            .unwrap();
        assert_eq!(m.digest(), &Digest::of_bytes(b"{}"));
        match &m.payload {
            MaterialPayload::Artifact { content, name, .. } => {
                assert_eq!(content.as_deref(), Some(&b"{}"[..]));
                assert_eq!(name, "att.json");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
