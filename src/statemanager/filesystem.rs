//! Local JSON file state backend

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{StateError, StateManager};
use crate::api::CraftingState;

/// File name used under the temp directory when no path is configured
pub const DEFAULT_STATE_FILE: &str = "chainloop-attestation.tmp.json";

/// `{tmpdir}/chainloop-attestation.tmp.json`
pub fn default_state_path() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_STATE_FILE)
}

/// Keeps a single crafting state in one file; the key is ignored.
#[derive(Debug, Clone)]
pub struct FilesystemStateManager {
    path: PathBuf,
}

impl FilesystemStateManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FilesystemStateManager {
    fn default() -> Self {
        Self::new(default_state_path())
    }
}

impl StateManager for FilesystemStateManager {
    fn initialized(&self, _key: &str) -> Result<bool, StateError> {
        Ok(self.path.is_file())
    }

    /// Write atomically (write-then-rename)
    fn write(&self, _key: &str, state: &CraftingState) -> Result<(), StateError> {
        let json = state.to_json()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = self.path.with_extension("json.partial");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, &self.path)?;

        debug!(path = %self.path.display(), "crafting state written");
        Ok(())
    }

    fn read(&self, key: &str) -> Result<CraftingState, StateError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StateError::NotFound(if key.is_empty() {
                    self.path.display().to_string()
                } else {
                    key.to_string()
                }))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(CraftingState::from_json(&json)?)
    }

    fn reset(&self, _key: &str) -> Result<(), StateError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn info(&self, _key: &str) -> String {
        self.path.display().to_string()
    }
}
