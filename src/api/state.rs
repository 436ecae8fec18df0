//! Crafting state: the in-progress attestation plus its contract

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::contract::CraftingSchema;
use super::material::{Material, MaterialValidationError};

/// Workflow the attestation belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub workflow_id: String,
    pub name: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub contract_name: String,
    #[serde(default)]
    pub contract_revision: u32,
    /// Server-issued run id; empty in local mode
    #[serde(default)]
    pub workflow_run_id: String,
}

/// A named git remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

/// Git context of the working directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadCommit {
    pub hash: String,
    pub author_name: String,
    pub author_email: String,
    pub date: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub remotes: Vec<Remote>,
}

/// Outcome of a policy evaluated against the attestation or one of its materials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material_name: Option<String>,
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default)]
    pub skipped: bool,
}

/// The attestation being built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub workflow: WorkflowMetadata,

    pub initialized_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Runner identifier as written in contracts, e.g. `GITHUB_ACTION`
    pub runner_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<HeadCommit>,

    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,

    #[serde(default)]
    pub materials: BTreeMap<String, Material>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub policy_evaluations: Vec<PolicyEvaluation>,
}

/// Structural problems in a crafting state
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateValidationError {
    #[error("workflow name is empty")]
    MissingWorkflowName,

    #[error("runner type is empty")]
    MissingRunnerType,

    #[error("material stored under '{key}' has id '{id}'")]
    KeyMismatch { key: String, id: String },

    #[error("required material '{0}' has not been added")]
    MissingMaterial(String),

    #[error("material '{material}': annotation '{annotation}' has no value")]
    MissingMaterialAnnotation { material: String, annotation: String },

    #[error("attestation annotation '{0}' has no value")]
    MissingAnnotation(String),

    #[error(transparent)]
    Material(#[from] MaterialValidationError),
}

/// Persisted crafting state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CraftingState {
    pub input_schema: CraftingSchema,
    pub attestation: Attestation,
    #[serde(default)]
    pub dry_run: bool,
}

impl CraftingState {
    /// Structural validation of the whole state
    pub fn validate(&self) -> Result<(), StateValidationError> {
        let att = &self.attestation;
        if att.workflow.name.is_empty() {
            return Err(StateValidationError::MissingWorkflowName);
        }
        if att.runner_type.is_empty() {
            return Err(StateValidationError::MissingRunnerType);
        }

        for (key, material) in &att.materials {
            if key != &material.id {
                return Err(StateValidationError::KeyMismatch {
                    key: key.clone(),
                    id: material.id.clone(),
                });
            }
            material.validate()?;
        }

        Ok(())
    }

    /// Structural validation plus contract completeness: every required
    /// material present and every declared annotation filled in
    pub fn validate_complete(&self) -> Result<(), StateValidationError> {
        self.validate()?;
        let att = &self.attestation;

        for expected in &self.input_schema.materials {
            if !expected.optional && !att.materials.contains_key(&expected.name) {
                return Err(StateValidationError::MissingMaterial(expected.name.clone()));
            }
        }

        for material in att.materials.values() {
            if let Some((name, _)) = material.annotations.iter().find(|(_, v)| v.is_empty()) {
                return Err(StateValidationError::MissingMaterialAnnotation {
                    material: material.id.clone(),
                    annotation: name.clone(),
                });
            }
        }

        for annotation in &self.input_schema.annotations {
            let filled = att
                .annotations
                .get(&annotation.name)
                .map(|v| !v.is_empty())
                .unwrap_or(false);
            if !filled {
                return Err(StateValidationError::MissingAnnotation(annotation.name.clone()));
            }
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
