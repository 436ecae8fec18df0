//! Byte-stream transport abstraction
//!
//! Decouples the transfer loops from the wire. Provides:
//! - ByteStreamTransport: open write/read streams, describe blobs
//! - InMemoryCas: in-process CAS service for tests and dry runs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use cas_protocol::{
    CasError, DescribeRequest, DescribeResponse, Digest, ReadRequest, ReadResponse, ResourceName,
    WriteRequest, WriteResponse, DEFAULT_CHUNK_SIZE,
};

/// Client half of a write stream
pub trait WriteStream: Send {
    fn send(&mut self, frame: WriteRequest) -> Result<(), CasError>;

    /// Half-close and wait for the server acknowledgement
    fn close_and_recv(self: Box<Self>) -> Result<WriteResponse, CasError>;
}

/// Client half of a read stream
pub trait ReadStream: Send {
    /// Next chunk, `None` once the server signals end of stream
    fn recv(&mut self) -> Result<Option<ReadResponse>, CasError>;
}

/// Connection to a CAS service; may be shared across transfers
pub trait ByteStreamTransport: Send + Sync {
    fn open_write(&self) -> Result<Box<dyn WriteStream>, CasError>;

    fn open_read(&self, request: &ReadRequest) -> Result<Box<dyn ReadStream>, CasError>;

    fn describe(&self, request: &DescribeRequest) -> Result<DescribeResponse, CasError>;
}

/// A write frame as seen by the in-memory server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFrame {
    pub resource_name: String,
    pub write_offset: u64,
    pub data_len: usize,
    pub finish_write: bool,
}

#[derive(Debug, Clone)]
struct StoredBlob {
    filename: String,
    data: Vec<u8>,
}

#[derive(Debug)]
struct CasInner {
    blobs: HashMap<String, StoredBlob>,
    frames: Vec<RecordedFrame>,
    max_bytes: u64,
    read_chunk_size: usize,
    corrupt_reads: bool,
}

impl Default for CasInner {
    fn default() -> Self {
        Self {
            blobs: HashMap::new(),
            frames: Vec::new(),
            max_bytes: 0,
            read_chunk_size: DEFAULT_CHUNK_SIZE,
            corrupt_reads: false,
        }
    }
}

/// In-process CAS service.
///
/// Verifies uploaded bytes against the digest in the resource name, closes
/// the write stream early when the blob is already stored, and records every
/// write frame for inspection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCas {
    inner: Arc<Mutex<CasInner>>,
}

fn lock(inner: &Mutex<CasInner>) -> MutexGuard<'_, CasInner> {
    // A panicking test thread must not wedge the others.
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryCas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject blobs larger than `max_bytes` (0 = unlimited)
    pub fn with_max_bytes(self, max_bytes: u64) -> Self {
        lock(&self.inner).max_bytes = max_bytes;
        self
    }

    pub fn with_read_chunk_size(self, chunk_size: usize) -> Self {
        lock(&self.inner).read_chunk_size = chunk_size.max(1);
        self
    }

    /// Flip the first byte of every blob served, to exercise integrity checks
    pub fn set_corrupt_reads(&self, corrupt: bool) {
        lock(&self.inner).corrupt_reads = corrupt;
    }

    /// Store a blob directly, returning its digest
    pub fn insert(&self, filename: &str, data: &[u8]) -> String {
        let digest = Digest::of_bytes(data).to_string();
        lock(&self.inner).blobs.insert(
            digest.clone(),
            StoredBlob {
                filename: filename.to_string(),
                data: data.to_vec(),
            },
        );
        digest
    }

    pub fn get(&self, digest: &str) -> Option<Vec<u8>> {
        lock(&self.inner).blobs.get(digest).map(|b| b.data.clone())
    }

    pub fn contains(&self, digest: &str) -> bool {
        lock(&self.inner).blobs.contains_key(digest)
    }

    pub fn frames(&self) -> Vec<RecordedFrame> {
        lock(&self.inner).frames.clone()
    }
}

impl ByteStreamTransport for InMemoryCas {
    fn open_write(&self) -> Result<Box<dyn WriteStream>, CasError> {
        Ok(Box::new(InMemoryWriteStream {
            inner: self.inner.clone(),
            resource: None,
            buffer: Vec::new(),
            existing_size: None,
            finished: false,
        }))
    }

    fn open_read(&self, request: &ReadRequest) -> Result<Box<dyn ReadStream>, CasError> {
        let inner = lock(&self.inner);
        let blob = inner
            .blobs
            .get(&request.resource_name)
            .ok_or_else(|| CasError::not_found(&request.resource_name))?;

        let mut data = blob.data.clone();
        if inner.corrupt_reads {
            if let Some(first) = data.first_mut() {
                *first ^= 0xff;
            }
        }

        let start = (request.read_offset as usize).min(data.len());
        let end = if request.read_limit == 0 {
            data.len()
        } else {
            (start + request.read_limit as usize).min(data.len())
        };

        Ok(Box::new(InMemoryReadStream {
            data: data[start..end].to_vec(),
            pos: 0,
            chunk_size: inner.read_chunk_size,
        }))
    }

    fn describe(&self, request: &DescribeRequest) -> Result<DescribeResponse, CasError> {
        let inner = lock(&self.inner);
        let blob = inner
            .blobs
            .get(&request.digest)
            .ok_or_else(|| CasError::not_found(&request.digest))?;
        Ok(DescribeResponse {
            digest: request.digest.clone(),
            filename: blob.filename.clone(),
            size: blob.data.len() as u64,
        })
    }
}

struct InMemoryWriteStream {
    inner: Arc<Mutex<CasInner>>,
    resource: Option<ResourceName>,
    buffer: Vec<u8>,
    /// Set when the blob was already stored; the server stops reading
    existing_size: Option<u64>,
    finished: bool,
}

impl WriteStream for InMemoryWriteStream {
    fn send(&mut self, frame: WriteRequest) -> Result<(), CasError> {
        if self.existing_size.is_some() || self.finished {
            return Err(CasError::stream_closed());
        }

        let resource = ResourceName::decode(&frame.resource_name)
            .map_err(|e| CasError::invalid_request(e.to_string()))?;
        if let Some(current) = &self.resource {
            if current != &resource {
                return Err(CasError::invalid_request("resource name changed mid-stream"));
            }
        }
        if frame.write_offset != self.buffer.len() as u64 {
            return Err(CasError::invalid_request(format!(
                "write offset {} does not match received {} bytes",
                frame.write_offset,
                self.buffer.len()
            )));
        }

        let mut inner = lock(&self.inner);
        inner.frames.push(RecordedFrame {
            resource_name: frame.resource_name.clone(),
            write_offset: frame.write_offset,
            data_len: frame.data.len(),
            finish_write: frame.finish_write,
        });

        let digest = resource.digest.to_string();
        if let Some(existing) = inner.blobs.get(&digest) {
            self.existing_size = Some(existing.data.len() as u64);
        }
        self.resource = Some(resource);

        self.buffer.extend_from_slice(&frame.data);
        if inner.max_bytes > 0 && self.buffer.len() as u64 > inner.max_bytes {
            return Err(CasError::payload_too_large(self.buffer.len() as u64, inner.max_bytes));
        }
        if frame.finish_write {
            self.finished = true;
        }
        Ok(())
    }

    fn close_and_recv(self: Box<Self>) -> Result<WriteResponse, CasError> {
        if let Some(size) = self.existing_size {
            return Ok(WriteResponse { committed_size: size });
        }

        let resource = self
            .resource
            .ok_or_else(|| CasError::invalid_request("stream closed before any frame"))?;
        if !self.finished {
            return Err(CasError::invalid_request("stream closed without finish_write"));
        }

        let expected = resource.digest.to_string();
        let actual = Digest::of_bytes(&self.buffer).to_string();
        if expected != actual {
            return Err(CasError::digest_mismatch(&expected, &actual));
        }

        let committed_size = self.buffer.len() as u64;
        lock(&self.inner).blobs.insert(
            expected,
            StoredBlob {
                filename: resource.file_name,
                data: self.buffer,
            },
        );
        Ok(WriteResponse { committed_size })
    }
}

struct InMemoryReadStream {
    data: Vec<u8>,
    pos: usize,
    chunk_size: usize,
}

impl ReadStream for InMemoryReadStream {
    fn recv(&mut self) -> Result<Option<ReadResponse>, CasError> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let end = (self.pos + self.chunk_size).min(self.data.len());
        let chunk = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(Some(ReadResponse { data: chunk }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(data: &[u8]) -> String {
        ResourceName::new("blob.bin", &Digest::of_bytes(data).to_string())
            .unwrap()
            .encode()
            .unwrap()
    }

    #[test]
    fn test_write_then_describe() {
        let cas = InMemoryCas::new();
        let name = resource(b"abc");
        let mut stream = cas.open_write().unwrap();
        stream.send(WriteRequest::chunk(&name, 0, b"abc".to_vec())).unwrap();
        stream.send(WriteRequest::finish(&name, 3)).unwrap();
        let ack = stream.close_and_recv().unwrap();
        assert_eq!(ack.committed_size, 3);

        let digest = Digest::of_bytes(b"abc").to_string();
        let info = cas
            .describe(&DescribeRequest { digest: digest.clone() })
            .unwrap();
        assert_eq!(info.filename, "blob.bin");
        assert_eq!(info.size, 3);
    }

    #[test]
    fn test_rejects_wrong_bytes() {
        let cas = InMemoryCas::new();
        let name = resource(b"abc");
        let mut stream = cas.open_write().unwrap();
        stream.send(WriteRequest::chunk(&name, 0, b"xyz".to_vec())).unwrap();
        stream.send(WriteRequest::finish(&name, 3)).unwrap();
        let err = stream.close_and_recv().unwrap_err();
        assert_eq!(err.code, cas_protocol::ErrorCode::DigestMismatch);
    }

    #[test]
    fn test_closes_early_when_blob_exists() {
        let cas = InMemoryCas::new();
        cas.insert("blob.bin", b"abcdef");
        let name = resource(b"abcdef");

        let mut stream = cas.open_write().unwrap();
        stream.send(WriteRequest::chunk(&name, 0, b"abc".to_vec())).unwrap();
        let err = stream
            .send(WriteRequest::chunk(&name, 3, b"def".to_vec()))
            .unwrap_err();
        assert!(err.is_stream_closed());
        assert_eq!(stream.close_and_recv().unwrap().committed_size, 6);
    }

    #[test]
    fn test_read_in_chunks() {
        let cas = InMemoryCas::new().with_read_chunk_size(2);
        let digest = cas.insert("a", b"12345");
        let mut stream = cas
            .open_read(&ReadRequest {
                resource_name: digest,
                read_offset: 0,
                read_limit: 0,
            })
            .unwrap();
        let mut chunks = Vec::new();
        while let Some(resp) = stream.recv().unwrap() {
            chunks.push(resp.data);
        }
        assert_eq!(chunks, vec![b"12".to_vec(), b"34".to_vec(), b"5".to_vec()]);
    }

    #[test]
    fn test_read_missing() {
        let cas = InMemoryCas::new();
        let err = cas
            .open_read(&ReadRequest {
                resource_name: Digest::of_bytes(b"nope").to_string(),
                read_offset: 0,
                read_limit: 0,
            })
            .err()
            .unwrap();
        assert_eq!(err.code, cas_protocol::ErrorCode::NotFound);
    }
}
