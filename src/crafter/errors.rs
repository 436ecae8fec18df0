//! Crafter error types

use ci_runners::RunnerError;
use thiserror::Error;

use crate::api::{ContractError, MaterialType, MaterialValidationError, StateValidationError};
use crate::materials::MaterialError;
use crate::statemanager::StateError;

/// Errors from crafter operations
#[derive(Debug, Error)]
pub enum CrafterError {
    #[error("crafting state not initialized, run init first")]
    NotInitialized,

    #[error("attestation already initialized, reset it or force a new one")]
    AlreadyInitialized,

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("crafting state storage failed")]
    State(#[from] StateError),

    #[error("invalid contract")]
    Contract(#[from] ContractError),

    #[error("invalid crafting state")]
    Validation(#[from] StateValidationError),

    #[error("invalid runner type '{0}' in crafting state")]
    InvalidRunnerType(String),

    #[error("material '{0}' not found in schema")]
    MaterialNotInContract(String),

    #[error("material '{key}' is declared as {declared} in the contract, not {requested}")]
    MaterialKindMismatch {
        key: String,
        declared: MaterialType,
        requested: MaterialType,
    },

    #[error("material '{material}': annotation '{annotation}' is not declared in the contract")]
    UnknownAnnotation { material: String, annotation: String },

    #[error("material '{material}': annotation '{annotation}' has no value")]
    MissingAnnotation { material: String, annotation: String },

    #[error("attestation annotation '{0}' is not declared in the contract")]
    UnknownAttestationAnnotation(String),

    #[error("environment variables required by the contract are not set: {}", .0.join(", "))]
    MissingEnvVars(Vec<String>),

    #[error("adding material '{key}'")]
    AddMaterial {
        key: String,
        #[source]
        source: MaterialError,
    },

    #[error("crafted material is invalid")]
    InvalidMaterial(#[from] MaterialValidationError),
}

impl CrafterError {
    pub fn is_not_initialized(&self) -> bool {
        matches!(self, CrafterError::NotInitialized)
    }

    pub fn is_already_initialized(&self) -> bool {
        matches!(self, CrafterError::AlreadyInitialized)
    }

    pub fn is_runner_context_not_found(&self) -> bool {
        matches!(
            self,
            CrafterError::Runner(RunnerError::RunnerContextNotFound { .. })
        )
    }

    /// The material crafting failure behind this error, if any
    pub fn material_error(&self) -> Option<&MaterialError> {
        match self {
            CrafterError::AddMaterial { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// One line naming every error in the `source()` chain, outermost first
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        let message = cause.to_string();
        // Leaf wrappers such as "IO error: {0}" already carry their cause.
        if !rendered.ends_with(&message) {
            rendered.push_str(": ");
            rendered.push_str(&message);
        }
        current = cause.source();
    }
    rendered
}
