//! CAS Protocol Types
//!
//! Defines the frames exchanged with a content-addressable storage service
//! over a byte-stream style write/read channel, plus the unary describe call.

pub mod digest;
pub mod error;
pub mod ops;
pub mod resource;

pub use digest::{Digest, DigestError};
pub use error::{CasError, ErrorCode};
pub use ops::{DescribeRequest, DescribeResponse, ReadRequest, ReadResponse, WriteRequest, WriteResponse};
pub use resource::{ResourceName, ResourceNameError};

/// Default chunk size for uploads and downloads (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
