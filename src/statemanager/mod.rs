//! Crafting state persistence
//!
//! Two backends:
//! - Filesystem: one JSON file, single attestation per machine (key ignored)
//! - Remote: the control plane's state service, keyed by workflow run id

mod filesystem;
mod remote;

pub use filesystem::{default_state_path, FilesystemStateManager, DEFAULT_STATE_FILE};
pub use remote::RemoteStateManager;

use cas_protocol::Digest;
use std::io;

use crate::api::CraftingState;
use crate::controlplane::ServiceError;

/// Errors from state persistence
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("crafting state not found for '{0}'")]
    NotFound(String),

    #[error("crafting state for '{0}' was modified concurrently")]
    Conflict(String),

    #[error("remote state requires a workflow run id")]
    MissingKey,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("state service error: {0}")]
    Remote(ServiceError),
}

impl StateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound(_))
    }
}

/// Persistence contract used by the crafter
pub trait StateManager {
    fn initialized(&self, key: &str) -> Result<bool, StateError>;

    fn write(&self, key: &str, state: &CraftingState) -> Result<(), StateError>;

    /// Fails with `NotFound` when nothing was written under `key`
    fn read(&self, key: &str) -> Result<CraftingState, StateError>;

    /// Idempotent
    fn reset(&self, key: &str) -> Result<(), StateError>;

    /// Human-readable location, diagnostics only
    fn info(&self, key: &str) -> String;
}

/// Digest of the canonical (JCS) JSON form of a state
pub fn state_digest(state: &CraftingState) -> Result<String, StateError> {
    let jcs_bytes = serde_json_canonicalizer::to_vec(state)?;
    Ok(Digest::of_bytes(&jcs_bytes).to_string())
}
