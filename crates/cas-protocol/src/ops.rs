//! Frames for the write, read and describe calls.

use serde::{Deserialize, Serialize};

/// One frame on the write stream.
///
/// Data frames carry a chunk; the final frame has `finish_write` set and no data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    /// Encoded resource name.
    pub resource_name: String,
    /// Offset of `data` within the blob.
    pub write_offset: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub finish_write: bool,
}

impl WriteRequest {
    /// A data frame.
    pub fn chunk(resource_name: &str, write_offset: u64, data: Vec<u8>) -> Self {
        Self {
            resource_name: resource_name.to_string(),
            write_offset,
            data,
            finish_write: false,
        }
    }

    /// The terminating frame.
    pub fn finish(resource_name: &str, write_offset: u64) -> Self {
        Self {
            resource_name: resource_name.to_string(),
            write_offset,
            data: Vec::new(),
            finish_write: true,
        }
    }
}

/// Server acknowledgement returned when the write stream is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResponse {
    pub committed_size: u64,
}

/// Opens a read stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    /// Digest of the blob to read (`sha256:<hex>`).
    pub resource_name: String,
    #[serde(default)]
    pub read_offset: u64,
    /// 0 means "whole blob".
    #[serde(default)]
    pub read_limit: u64,
}

/// One chunk received on the read stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResponse {
    pub data: Vec<u8>,
}

/// Unary metadata lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeRequest {
    pub digest: String,
}

/// Metadata for a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeResponse {
    pub digest: String,
    pub filename: String,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_frame_has_no_data() {
        let f = WriteRequest::finish("res", 10);
        assert!(f.finish_write);
        assert!(f.data.is_empty());

        let json = serde_json::to_value(&f).unwrap();
        assert!(json.get("data").is_none());
        assert_eq!(json["finishWrite"], true);
    }

    #[test]
    fn test_chunk_frame() {
        let f = WriteRequest::chunk("res", 0, vec![1, 2, 3]);
        assert!(!f.finish_write);
        assert_eq!(f.data, vec![1, 2, 3]);
    }
}
