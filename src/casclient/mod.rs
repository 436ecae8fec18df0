//! CAS transfer client
//!
//! Chunked streaming upload and download of blobs against a CAS service:
//! - Uploads send fixed-size data frames then one `finish_write` frame
//! - Downloads stream chunks into a writer and re-hash what was received
//! - Progress is pushed onto a bounded channel and dropped when nobody keeps up
//!
//! Transfers are synchronous on the caller's thread. Cancellation goes
//! through a shared [`CancelToken`] checked between chunks.

mod downloader;
mod progress;
mod transport;
mod uploader;

pub use downloader::DownloadResult;
pub use progress::{progress_channel, ProgressReporter, ProgressRenderer, UpDownStatus};
pub use transport::{ByteStreamTransport, InMemoryCas, ReadStream, RecordedFrame, WriteStream};
pub use uploader::{TransferSession, UploadResult};

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cas_protocol::{CasError, DigestError, ResourceNameError, DEFAULT_CHUNK_SIZE};

/// Errors from CAS transfers
#[derive(Debug, thiserror::Error)]
pub enum CasClientError {
    #[error(transparent)]
    Service(#[from] CasError),

    #[error("invalid resource name: {0}")]
    ResourceName(#[from] ResourceNameError),

    #[error("invalid digest: {0}")]
    Digest(#[from] DigestError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("refusing to write blob under unsafe file name '{0}'")]
    UnsafeFileName(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
}

impl CasClientError {
    pub fn is_digest_mismatch(&self) -> bool {
        matches!(self, CasClientError::DigestMismatch { .. })
    }
}

/// Cooperative cancellation shared between a transfer and whoever may abort it
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<(), CasClientError> {
        if self.is_cancelled() {
            Err(CasClientError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bytes per data frame (default 1 MiB)
    pub chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Capability used by material crafting to push a file to the CAS
pub trait BlobUploader: Send + Sync {
    /// Upload `path` under the already-computed `digest`
    fn upload_file(&self, path: &Path, digest: &str) -> Result<UploadResult, CasClientError>;

    /// Upload an in-memory blob
    fn upload_bytes(
        &self,
        data: &[u8],
        filename: &str,
        digest: &str,
    ) -> Result<UploadResult, CasClientError>;
}

/// Upload/download client over one transport
pub struct CasClient {
    transport: Arc<dyn ByteStreamTransport>,
    config: ClientConfig,
    progress: Option<ProgressReporter>,
    cancel: CancelToken,
}

impl CasClient {
    pub fn new(transport: Arc<dyn ByteStreamTransport>, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            progress: None,
            cancel: CancelToken::new(),
        }
    }

    /// Attach a best-effort progress reporter
    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn report(&self, status: UpDownStatus) {
        if let Some(progress) = &self.progress {
            progress.report(status);
        }
    }
}

impl BlobUploader for CasClient {
    fn upload_file(&self, path: &Path, digest: &str) -> Result<UploadResult, CasClientError> {
        CasClient::upload_file_with_digest(self, path, digest)
    }

    fn upload_bytes(
        &self,
        data: &[u8],
        filename: &str,
        digest: &str,
    ) -> Result<UploadResult, CasClientError> {
        self.upload(data, filename, digest, data.len() as u64)
    }
}
