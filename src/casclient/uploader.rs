//! Chunked upload over a write stream

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use cas_protocol::{Digest, ResourceName, WriteRequest};
use tracing::debug;

use super::{CasClient, CasClientError, UpDownStatus};

/// Byte accounting for one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSession {
    pub digest: String,
    pub filename: String,
    /// Total content length
    pub total_bytes: u64,
    /// Bytes sent or received so far
    pub offset: u64,
}

impl TransferSession {
    pub fn new(digest: impl Into<String>, filename: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            digest: digest.into(),
            filename: filename.into(),
            total_bytes,
            offset: 0,
        }
    }

    pub fn advance(&mut self, bytes: u64) {
        self.offset = self.offset.saturating_add(bytes);
    }

    pub fn status(&self) -> UpDownStatus {
        UpDownStatus {
            digest: self.digest.clone(),
            filename: self.filename.clone(),
            total_bytes: self.total_bytes,
            processed_bytes: self.offset,
        }
    }
}

/// Outcome of a finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub digest: String,
    pub filename: String,
    /// Bytes read from the source
    pub size: u64,
    /// Size acknowledged by the server
    pub committed_size: u64,
}

/// Read until `buf` is full or the reader is exhausted
fn fill_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl CasClient {
    /// Hash `path` then upload it
    pub fn upload_path(&self, path: &Path) -> Result<UploadResult, CasClientError> {
        let (digest, _) = Digest::of_reader(File::open(path)?)?;
        self.upload_file_with_digest(path, &digest.to_string())
    }

    /// Upload `path` under a digest the caller already computed
    pub fn upload_file_with_digest(
        &self,
        path: &Path,
        digest: &str,
    ) -> Result<UploadResult, CasClientError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        self.upload(file, &file_name_of(path), digest, size)
    }

    /// Stream `reader` as `filename`/`digest`.
    ///
    /// Sends full `chunk_size` data frames, then a single `finish_write` frame.
    /// A stream-closed error while sending means the server already has
    /// enough and ends the send loop without failing.
    pub fn upload<R: Read>(
        &self,
        mut reader: R,
        filename: &str,
        digest: &str,
        size: u64,
    ) -> Result<UploadResult, CasClientError> {
        let resource = ResourceName::new(filename, digest)?.encode()?;
        let mut session = TransferSession::new(digest, filename, size);
        let mut stream = self.transport.open_write()?;
        let mut buf = vec![0u8; self.config.chunk_size.max(1)];
        let mut closed_early = false;

        loop {
            self.cancel.check()?;

            let n = fill_chunk(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }

            let frame = WriteRequest::chunk(&resource, session.offset, buf[..n].to_vec());
            match stream.send(frame) {
                Ok(()) => {}
                Err(e) if e.is_stream_closed() => {
                    debug!(digest, "server closed write stream early");
                    closed_early = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            session.advance(n as u64);
            self.report(session.status());

            if n < buf.len() {
                break;
            }
        }

        if !closed_early {
            self.cancel.check()?;
            match stream.send(WriteRequest::finish(&resource, session.offset)) {
                Ok(()) => {}
                Err(e) if e.is_stream_closed() => {
                    debug!(digest, "server closed write stream before finish frame");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let ack = stream.close_and_recv()?;
        debug!(
            digest,
            filename,
            sent = session.offset,
            committed = ack.committed_size,
            "upload finished"
        );

        Ok(UploadResult {
            digest: digest.to_string(),
            filename: filename.to_string(),
            size: session.offset,
            committed_size: ack.committed_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::casclient::{progress_channel, ClientConfig, InMemoryCas};
    use std::sync::Arc;

    fn client(cas: &InMemoryCas, chunk_size: usize) -> CasClient {
        CasClient::new(Arc::new(cas.clone()), ClientConfig { chunk_size })
    }

    #[test]
    fn test_session_accounting() {
        let mut session = TransferSession::new("sha256:x", "f", 1000);
        session.advance(400);
        assert_eq!(session.status().processed_bytes, 400);
        session.advance(600);
        let status = session.status();
        assert_eq!(status.processed_bytes, 1000);
        assert_eq!(status.total_bytes, 1000);
        assert_eq!(status.filename, "f");
    }

    #[test]
    fn test_upload_frames_and_progress() {
        let cas = InMemoryCas::new();
        let (reporter, receiver) = progress_channel(16);
        let data = vec![7u8; 25];
        let digest = Digest::of_bytes(&data).to_string();

        let result = client(&cas, 10)
            .with_progress(reporter)
            .upload(&data[..], "blob.bin", &digest, data.len() as u64)
            .unwrap();
        assert_eq!(result.committed_size, 25);
        assert_eq!(cas.get(&digest).unwrap(), data);

        let frames = cas.frames();
        let lens: Vec<usize> = frames.iter().map(|f| f.data_len).collect();
        assert_eq!(lens, vec![10, 10, 5, 0]);
        assert!(frames.last().unwrap().finish_write);
        assert_eq!(frames[2].write_offset, 20);

        let processed: Vec<u64> = receiver.try_iter().map(|s| s.processed_bytes).collect();
        assert_eq!(processed, vec![10, 20, 25]);
    }

    #[test]
    fn test_empty_upload_sends_only_finish() {
        let cas = InMemoryCas::new();
        let digest = Digest::of_bytes(b"").to_string();
        let result = client(&cas, 10).upload(&b""[..], "empty", &digest, 0).unwrap();
        assert_eq!(result.committed_size, 0);
        assert_eq!(cas.frames().len(), 1);
        assert!(cas.frames()[0].finish_write);
    }

    #[test]
    fn test_existing_blob_closes_early_without_error() {
        let cas = InMemoryCas::new();
        let data = vec![1u8; 30];
        let digest = cas.insert("blob.bin", &data);

        let result = client(&cas, 10)
            .upload(&data[..], "blob.bin", &digest, 30)
            .unwrap();
        assert_eq!(result.committed_size, 30);
        assert_eq!(cas.frames().len(), 1);
    }

    #[test]
    fn test_wrong_digest_is_rejected_by_server() {
        let cas = InMemoryCas::new();
        let digest = Digest::of_bytes(b"other").to_string();
        let err = client(&cas, 10)
            .upload(&b"data"[..], "f", &digest, 4)
            .unwrap_err();
        assert!(matches!(err, CasClientError::Service(_)));
    }

    #[test]
    fn test_cancelled_before_first_chunk() {
        let cas = InMemoryCas::new();
        let client = client(&cas, 10);
        client.cancel_token().cancel();
        let digest = Digest::of_bytes(b"data").to_string();
        let err = client.upload(&b"data"[..], "f", &digest, 4).unwrap_err();
        assert!(matches!(err, CasClientError::Cancelled));
        assert!(cas.frames().is_empty());
    }

    #[test]
    fn test_invalid_resource_name() {
        let cas = InMemoryCas::new();
        let err = client(&cas, 10).upload(&b"x"[..], "", "sha256:abc", 1).unwrap_err();
        assert!(matches!(err, CasClientError::ResourceName(_)));
    }
}
