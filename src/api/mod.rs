//! Contract and crafting-state data model
//!
//! These records are what gets persisted between CLI invocations and what
//! the renderer consumes once the state has been validated.

mod contract;
mod material;
mod state;

pub use contract::{
    Annotation, ContractError, CraftingSchema, MaterialSchema, MaterialType, RunnerRequirement,
    SCHEMA_VERSION,
};
pub use material::{Material, MaterialPayload, MaterialValidationError};
pub use state::{
    Attestation, CraftingState, HeadCommit, PolicyEvaluation, Remote, StateValidationError,
    WorkflowMetadata,
};
