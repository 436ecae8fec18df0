//! Built-in defaults (layer 1) and the typed view of the merged config

use std::path::PathBuf;

use cas_protocol::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};

use crate::casclient::ClientConfig;
use crate::statemanager::default_state_path;

/// Inline storage cap when no remote CAS is configured
pub const DEFAULT_MAX_INLINE_BYTES: u64 = 500 * 1024;

/// Progress events buffered before new ones are dropped
pub const DEFAULT_PROGRESS_BUFFER: usize = 16;

/// CAS client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasConfig {
    /// Bytes per upload frame (default: 1 MiB)
    pub chunk_size: usize,

    /// Progress channel capacity (default: 16)
    pub progress_buffer: usize,

    /// Largest blob stored inline in the attestation (default: 500 KiB)
    pub max_inline_bytes: u64,
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_buffer: DEFAULT_PROGRESS_BUFFER,
            max_inline_bytes: DEFAULT_MAX_INLINE_BYTES,
        }
    }
}

impl CasConfig {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            chunk_size: self.chunk_size,
        }
    }
}

/// Crafter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrafterConfig {
    /// Local crafting state file (default: `{tmpdir}/chainloop-attestation.tmp.json`)
    pub state_path: PathBuf,

    #[serde(default)]
    pub cas: CasConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_addr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cas_addr: Option<String>,

    /// `tracing` filter directive used when `RUST_LOG` is unset (default: "info")
    pub log_level: String,

    #[serde(default)]
    pub dry_run: bool,
}

impl Default for CrafterConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            cas: CasConfig::default(),
            control_plane_addr: None,
            cas_addr: None,
            log_level: "info".to_string(),
            dry_run: false,
        }
    }
}

impl CrafterConfig {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "state_path": self.state_path.to_string_lossy(),
            "cas": {
                "chunk_size": self.cas.chunk_size,
                "progress_buffer": self.cas.progress_buffer,
                "max_inline_bytes": self.cas.max_inline_bytes
            },
            "log_level": self.log_level,
            "dry_run": self.dry_run
        })
    }
}
