//! Control-plane service contracts
//!
//! The crafter consumes these services but does not implement their
//! transport. Only the fields the crafting core relies on are modelled.

use serde::{Deserialize, Serialize};

use crate::api::{CraftingSchema, CraftingState, WorkflowMetadata};

/// Errors returned by control-plane calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency check failed on a state write
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("no CAS backend configured for this organization")]
    CasBackendMissing,

    #[error("transport error: {0}")]
    Transport(String),
}

/// CAS backend descriptor returned with upload credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasBackendInfo {
    pub provider: String,
    /// 0 means unlimited
    pub max_bytes: u64,
    pub is_inline: bool,
}

/// Request for `AttestationService::init`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitRequest {
    pub workflow_name: String,
    pub project_name: String,
    #[serde(default)]
    pub contract_revision: Option<u32>,
    pub runner_type: String,
    #[serde(default)]
    pub job_url: Option<String>,
}

/// Response of `AttestationService::init`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitResponse {
    /// Attestation identifier from here on
    pub workflow_run_id: String,
    pub workflow: WorkflowMetadata,
    pub cas_backend: CasBackendInfo,
}

/// Response of `AttestationService::get_contract`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractResponse {
    pub revision: u32,
    pub schema: CraftingSchema,
}

/// Response of `AttestationService::get_upload_creds`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCreds {
    pub token: String,
    pub backend: CasBackendInfo,
}

/// Request for `AttestationService::store`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub workflow_run_id: String,
    /// Serialized DSSE envelope
    pub envelope: Vec<u8>,
}

/// Why a run is being cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelTrigger {
    Failure,
    Cancellation,
}

/// Attestation lifecycle on the control plane
pub trait AttestationService {
    fn init(&self, request: &InitRequest) -> Result<InitResponse, ServiceError>;

    fn get_contract(&self, workflow_name: &str, revision: Option<u32>) -> Result<ContractResponse, ServiceError>;

    fn get_upload_creds(&self, workflow_run_id: &str) -> Result<UploadCreds, ServiceError>;

    /// Returns the digest the control plane assigned to the stored envelope
    fn store(&self, request: &StoreRequest) -> Result<String, ServiceError>;

    fn cancel(&self, workflow_run_id: &str, trigger: CancelTrigger, reason: &str) -> Result<(), ServiceError>;
}

/// Remote persistence of crafting state, keyed by workflow run id
pub trait AttestationStateService: Send + Sync {
    fn initialized(&self, workflow_run_id: &str) -> Result<bool, ServiceError>;

    /// Returns the state and the digest it was stored under
    fn read(&self, workflow_run_id: &str) -> Result<(CraftingState, String), ServiceError>;

    /// `base_digest` is the digest of the state this write is based on.
    /// A mismatch with what the service holds is a `Conflict`.
    fn save(&self, workflow_run_id: &str, state: &CraftingState, base_digest: Option<&str>) -> Result<(), ServiceError>;

    fn reset(&self, workflow_run_id: &str) -> Result<(), ServiceError>;
}
