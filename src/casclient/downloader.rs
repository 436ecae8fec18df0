//! Streaming download with independent re-hash

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use cas_protocol::{DescribeRequest, DescribeResponse, Digest, ReadRequest};
use sha2::{Digest as _, Sha256};
use tracing::debug;

use super::{CasClient, CasClientError, TransferSession};

/// What actually arrived on the read stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    /// Digest recomputed over the received bytes
    pub digest: String,
    pub bytes: u64,
}

impl CasClient {
    /// Blob metadata without transferring content
    pub fn describe(&self, digest: &str) -> Result<DescribeResponse, CasClientError> {
        let digest: Digest = digest.parse()?;
        Ok(self.transport.describe(&DescribeRequest {
            digest: digest.to_string(),
        })?)
    }

    /// Stream the blob addressed by `digest` into `writer`.
    ///
    /// Returns the digest of the received bytes; comparing it with the
    /// requested one is up to the caller (see [`CasClient::download_verified`]).
    pub fn download<W: Write>(
        &self,
        mut writer: W,
        digest: &str,
        expected_size: u64,
    ) -> Result<DownloadResult, CasClientError> {
        let parsed: Digest = digest.parse()?;
        let mut stream = self.transport.open_read(&ReadRequest {
            resource_name: parsed.to_string(),
            read_offset: 0,
            read_limit: 0,
        })?;

        let mut session = TransferSession::new(digest, "", expected_size);
        let mut hasher = Sha256::new();

        loop {
            self.cancel.check()?;
            let Some(chunk) = stream.recv()? else {
                break;
            };
            writer.write_all(&chunk.data)?;
            hasher.update(&chunk.data);
            session.advance(chunk.data.len() as u64);
            self.report(session.status());
        }
        writer.flush()?;

        let received = Digest::sha256_from_hex(hex::encode(hasher.finalize()))?;
        debug!(digest, bytes = session.offset, "download finished");
        Ok(DownloadResult {
            digest: received.to_string(),
            bytes: session.offset,
        })
    }

    /// Describe, download, then fail on any digest mismatch
    pub fn download_verified<W: Write>(
        &self,
        writer: W,
        digest: &str,
    ) -> Result<DownloadResult, CasClientError> {
        let info = self.describe(digest)?;
        let result = self.download(writer, digest, info.size)?;
        check_digest(digest, &result.digest)?;
        Ok(result)
    }

    /// Download into `dir`, named `filename` or the name the CAS reports.
    ///
    /// Bytes land in a temporary file that is renamed into place only once
    /// their digest matches.
    pub fn download_to_dir(
        &self,
        dir: &Path,
        digest: &str,
        filename: Option<&str>,
    ) -> Result<PathBuf, CasClientError> {
        let info = self.describe(digest)?;
        let name = match filename {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => info.filename.clone(),
        };
        check_file_name(&name)?;

        fs::create_dir_all(dir)?;
        let target = dir.join(&name);
        let partial = dir.join(format!(".{}.partial", name));

        let result = {
            let file = File::create(&partial)?;
            self.download(BufWriter::new(file), digest, info.size)
        };
        let outcome = result.and_then(|r| check_digest(digest, &r.digest));
        if let Err(e) = outcome {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }

        fs::rename(&partial, &target)?;
        Ok(target)
    }
}

/// A bare file name: one normal path component, nothing that climbs or roots
fn check_file_name(name: &str) -> Result<(), CasClientError> {
    let mut components = Path::new(name).components();
    let safe = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\']);
    if safe {
        Ok(())
    } else {
        Err(CasClientError::UnsafeFileName(name.to_string()))
    }
}

fn check_digest(expected: &str, actual: &str) -> Result<(), CasClientError> {
    if expected == actual {
        Ok(())
    } else {
        Err(CasClientError::DigestMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::casclient::{progress_channel, ClientConfig, InMemoryCas};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn client(cas: &InMemoryCas) -> CasClient {
        CasClient::new(Arc::new(cas.clone()), ClientConfig::default())
    }

    #[test]
    fn test_describe_then_download_rehashes() {
        let cas = InMemoryCas::new().with_read_chunk_size(3);
        let digest = cas.insert("notes.txt", b"hello world");
        let (reporter, receiver) = progress_channel(16);
        let client = client(&cas).with_progress(reporter);

        let info = client.describe(&digest).unwrap();
        assert_eq!(info.size, 11);
        assert_eq!(info.filename, "notes.txt");

        let mut out = Vec::new();
        let result = client.download(&mut out, &digest, info.size).unwrap();
        assert_eq!(out, b"hello world");
        assert_eq!(result.digest, digest);
        assert_eq!(result.bytes, 11);

        let last = receiver.try_iter().last().unwrap();
        assert_eq!(last.processed_bytes, 11);
        assert_eq!(last.total_bytes, 11);
    }

    #[test]
    fn test_corrupted_bytes_are_detected() {
        let cas = InMemoryCas::new();
        let digest = cas.insert("a.bin", b"payload");
        cas.set_corrupt_reads(true);

        let err = client(&cas)
            .download_verified(Vec::new(), &digest)
            .unwrap_err();
        assert!(err.is_digest_mismatch());
    }

    #[test]
    fn test_download_to_dir_uses_described_name() {
        let cas = InMemoryCas::new();
        let digest = cas.insert("report.xml", b"<testsuites/>");
        let dir = TempDir::new().unwrap();

        let path = client(&cas).download_to_dir(dir.path(), &digest, None).unwrap();
        assert_eq!(path, dir.path().join("report.xml"));
        assert_eq!(fs::read(&path).unwrap(), b"<testsuites/>");
    }

    #[test]
    fn test_download_to_dir_leaves_nothing_on_mismatch() {
        let cas = InMemoryCas::new();
        let digest = cas.insert("a.bin", b"payload");
        cas.set_corrupt_reads(true);
        let dir = TempDir::new().unwrap();

        let err = client(&cas)
            .download_to_dir(dir.path(), &digest, Some("out.bin"))
            .unwrap_err();
        assert!(err.is_digest_mismatch());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_download_to_dir_rejects_names_leaving_the_dir() {
        let cas = InMemoryCas::new();
        let digest = cas.insert("../escaped.txt", b"payload");
        let root = TempDir::new().unwrap();
        let out = root.path().join("out");
        let client = client(&cas);

        let err = client.download_to_dir(&out, &digest, None).unwrap_err();
        assert!(matches!(err, CasClientError::UnsafeFileName(ref n) if n == "../escaped.txt"));

        for name in ["/etc/passwd", "nested/file.txt", "..", "."] {
            let err = client.download_to_dir(&out, &digest, Some(name)).unwrap_err();
            assert!(matches!(err, CasClientError::UnsafeFileName(_)), "{name}");
        }
        assert!(!root.path().join("escaped.txt").exists());
        assert!(!out.exists());
    }

    #[test]
    fn test_missing_blob() {
        let cas = InMemoryCas::new();
        let digest = Digest::of_bytes(b"absent").to_string();
        let err = client(&cas).describe(&digest).unwrap_err();
        assert!(matches!(err, CasClientError::Service(_)));
    }
}
