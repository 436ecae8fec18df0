//! Error types returned by a CAS service.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes returned by the CAS service.
///
/// These codes are stable and used for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed frame or resource name.
    InvalidRequest,
    /// No blob stored under the requested digest.
    NotFound,
    /// Received bytes do not hash to the digest in the resource name.
    DigestMismatch,
    /// Blob exceeds the backend limit.
    PayloadTooLarge,
    /// The stream was closed by the peer.
    StreamClosed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::DigestMismatch => write!(f, "DIGEST_MISMATCH"),
            Self::PayloadTooLarge => write!(f, "PAYLOAD_TOO_LARGE"),
            Self::StreamClosed => write!(f, "STREAM_CLOSED"),
        }
    }
}

/// Service-side error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasError {
    pub code: ErrorCode,
    pub message: String,
}

impl CasError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn not_found(digest: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("no blob stored under '{}'", digest))
    }

    pub fn digest_mismatch(expected: &str, actual: &str) -> Self {
        Self::new(
            ErrorCode::DigestMismatch,
            format!("expected digest {}, received bytes hash to {}", expected, actual),
        )
    }

    pub fn payload_too_large(size: u64, max: u64) -> Self {
        Self::new(
            ErrorCode::PayloadTooLarge,
            format!("payload size {} exceeds maximum {}", size, max),
        )
    }

    pub fn stream_closed() -> Self {
        Self::new(ErrorCode::StreamClosed, "stream closed by peer")
    }

    /// Whether this signals the peer closing the stream (EOF semantics).
    pub fn is_stream_closed(&self) -> bool {
        self.code == ErrorCode::StreamClosed
    }
}

impl fmt::Display for CasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CasError {}
