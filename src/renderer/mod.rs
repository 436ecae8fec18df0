//! Attestation rendering
//!
//! Turns a completed crafting state into an in-toto Statement v1 carrying
//! the attestation predicate, then wraps it in a signed DSSE envelope.
//! A state that fails completeness validation is never rendered.

mod dsse;

pub use dsse::{
    key_fingerprint, pae, sign_envelope, verify_envelope, Ed25519Signer, Envelope,
    EnvelopeSignature, Signer, IN_TOTO_PAYLOAD_TYPE,
};

use std::collections::BTreeMap;
use std::io;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cas_protocol::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{CraftingState, Material, MaterialPayload, PolicyEvaluation, StateValidationError};

/// `_type` of every statement we emit
pub const STATEMENT_TYPE_V1: &str = "https://in-toto.io/Statement/v1";

/// Legacy statement type still accepted when parsing nested attestations
pub const STATEMENT_TYPE_V01: &str = "https://in-toto.io/Statement/v0.1";

pub const PREDICATE_TYPE: &str = "chainloop.dev/attestation/v0.2";

pub const BUILD_TYPE: &str = "chainloop.dev/workflowrun/v0.1";

/// Subject name used for the git head commit
pub const GIT_HEAD_SUBJECT: &str = "git.head";

/// Prefix of the subject naming the workflow itself
pub const WORKFLOW_SUBJECT_PREFIX: &str = "chainloop.workflow.";

/// Errors rendering, signing or verifying
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("crafting state is not complete")]
    Incomplete(#[from] StateValidationError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid DSSE envelope: {0}")]
    InvalidEnvelope(String),

    #[error("invalid in-toto statement: {0}")]
    InvalidStatement(String),

    #[error("no signature verifies under the given key")]
    SignatureMismatch,

    #[error("signing failed: {0}")]
    Signing(String),
}

/// An artifact the statement is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    /// Algorithm to hex digest
    pub digest: BTreeMap<String, String>,
}

/// in-toto Statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    #[serde(rename = "_type")]
    pub statement_type: String,
    pub subject: Vec<Subject>,
    pub predicate_type: String,
    pub predicate: serde_json::Value,
}

impl Statement {
    /// Structural checks for a statement found inside an envelope
    pub fn check(&self) -> Result<(), RenderError> {
        if self.statement_type != STATEMENT_TYPE_V1 && self.statement_type != STATEMENT_TYPE_V01 {
            return Err(RenderError::InvalidStatement(format!(
                "unknown _type '{}'",
                self.statement_type
            )));
        }
        if self.predicate_type.is_empty() {
            return Err(RenderError::InvalidStatement("empty predicateType".into()));
        }
        if self.subject.is_empty() {
            return Err(RenderError::InvalidStatement("no subjects".into()));
        }
        for subject in &self.subject {
            if subject.digest.is_empty() {
                return Err(RenderError::InvalidStatement(format!(
                    "subject '{}' has no digest",
                    subject.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateMetadata {
    pub name: String,
    pub project: String,
    pub team: String,
    pub organization: String,
    #[serde(rename = "workflowID")]
    pub workflow_id: String,
    #[serde(rename = "workflowRunID")]
    pub workflow_run_id: String,
    pub contract_name: String,
    pub contract_revision: u32,
    pub initialized_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateMaterial {
    pub name: String,
    #[serde(rename = "type")]
    pub material_type: String,
    pub digest: BTreeMap<String, String>,
    /// String value, image repository or file name
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    pub uploaded_to_cas: bool,
    /// Base64 content of inline materials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_inline: Option<String>,
    pub output: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub build_type: String,
    pub builder: BTreeMap<String, String>,
    pub metadata: PredicateMetadata,
    pub runner_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "runnerURL")]
    pub runner_url: Option<String>,
    pub materials: Vec<PredicateMaterial>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_evaluations: Vec<PolicyEvaluation>,
}

fn digest_map(material: &Material) -> BTreeMap<String, String> {
    let digest = material.digest();
    BTreeMap::from([(digest.algorithm().to_string(), digest.hex().to_string())])
}

fn subject_name(material: &Material) -> String {
    match &material.payload {
        MaterialPayload::String { value, .. } => value.clone(),
        MaterialPayload::ContainerImage { name, .. } | MaterialPayload::Artifact { name, .. } => {
            name.clone()
        }
    }
}

fn predicate_material(material: &Material) -> PredicateMaterial {
    let (value, tag, inline) = match &material.payload {
        MaterialPayload::String { value, .. } => (value.clone(), String::new(), None),
        MaterialPayload::ContainerImage { name, tag, .. } => (name.clone(), tag.clone(), None),
        MaterialPayload::Artifact { name, content, .. } => (
            name.clone(),
            String::new(),
            content.as_ref().map(|c| STANDARD.encode(c)),
        ),
    };
    PredicateMaterial {
        name: material.id.clone(),
        material_type: material.material_type.to_string(),
        digest: digest_map(material),
        value,
        tag,
        uploaded_to_cas: material.uploaded_to_cas,
        embedded_inline: inline,
        output: material.output,
        annotations: material.annotations.clone(),
    }
}

/// Build the statement for a completed state
pub fn render_statement(state: &CraftingState) -> Result<Statement, RenderError> {
    state.validate_complete()?;
    let att = &state.attestation;

    let predicate = Predicate {
        build_type: BUILD_TYPE.to_string(),
        builder: BTreeMap::from([(
            "id".to_string(),
            format!("{}@{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        )]),
        metadata: PredicateMetadata {
            name: att.workflow.name.clone(),
            project: att.workflow.project.clone(),
            team: att.workflow.team.clone(),
            organization: att.workflow.organization.clone(),
            workflow_id: att.workflow.workflow_id.clone(),
            workflow_run_id: att.workflow.workflow_run_id.clone(),
            contract_name: att.workflow.contract_name.clone(),
            contract_revision: att.workflow.contract_revision,
            initialized_at: att.initialized_at,
            finished_at: att.finished_at.unwrap_or_else(Utc::now),
        },
        runner_type: att.runner_type.clone(),
        runner_url: att.runner_url.clone(),
        materials: att.materials.values().map(predicate_material).collect(),
        annotations: att.annotations.clone(),
        env: att.env_vars.clone(),
        policy_evaluations: att.policy_evaluations.clone(),
    };
    let predicate = serde_json::to_value(predicate)?;

    // The workflow subject keeps the list non-empty when nothing is an output.
    let workflow_digest = Digest::of_bytes(&serde_json_canonicalizer::to_vec(&predicate)?);
    let mut subject = vec![Subject {
        name: format!("{}{}", WORKFLOW_SUBJECT_PREFIX, att.workflow.name),
        digest: BTreeMap::from([(
            workflow_digest.algorithm().to_string(),
            workflow_digest.hex().to_string(),
        )]),
    }];
    subject.extend(att.materials.values().filter(|m| m.is_subject()).map(|m| Subject {
        name: subject_name(m),
        digest: digest_map(m),
    }));
    if let Some(head) = &att.head {
        subject.push(Subject {
            name: GIT_HEAD_SUBJECT.to_string(),
            digest: BTreeMap::from([("sha1".to_string(), head.hash.clone())]),
        });
    }

    Ok(Statement {
        statement_type: STATEMENT_TYPE_V1.to_string(),
        subject,
        predicate_type: PREDICATE_TYPE.to_string(),
        predicate,
    })
}

/// Render, canonicalize and sign
pub fn render_envelope(state: &CraftingState, signer: &dyn Signer) -> Result<Envelope, RenderError> {
    let statement = render_statement(state)?;
    let payload = serde_json_canonicalizer::to_vec(&statement)?;
    sign_envelope(IN_TOTO_PAYLOAD_TYPE, &payload, signer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        Attestation, CraftingSchema, HeadCommit, MaterialSchema, MaterialType, WorkflowMetadata,
    };

    fn material(id: &str, kind: MaterialType, payload: MaterialPayload) -> Material {
        Material::new(id, kind, payload)
    }

    fn complete_state() -> CraftingState {
        let mut materials = BTreeMap::new();
        let mut image = material(
            "image",
            MaterialType::ContainerImage,
            MaterialPayload::ContainerImage {
                name: "ghcr.io/acme/widget".into(),
                digest: Digest::of_bytes(b"manifest"),
                tag: "1.0".into(),
                is_subject: true,
            },
        );
        image.output = true;
        materials.insert("image".to_string(), image);

        let mut sbom = material(
            "sbom",
            MaterialType::SbomCyclonedxJson,
            MaterialPayload::Artifact {
                name: "bom.json".into(),
                digest: Digest::of_bytes(b"{}"),
                content: Some(b"{}".to_vec()),
                is_subject: false,
            },
        );
        sbom.inline_cas = true;
        materials.insert("sbom".to_string(), sbom);

        CraftingState {
            input_schema: CraftingSchema::default()
                .with_material(MaterialSchema::new("image", MaterialType::ContainerImage).output())
                .with_material(MaterialSchema::new("sbom", MaterialType::SbomCyclonedxJson)),
            attestation: Attestation {
                workflow: WorkflowMetadata {
                    workflow_id: "wf-1".into(),
                    name: "release".into(),
                    project: "widget".into(),
                    ..Default::default()
                },
                initialized_at: Utc::now(),
                finished_at: Some(Utc::now()),
                runner_type: "GITHUB_ACTION".into(),
                runner_url: Some("https://github.com/acme/widget/actions/runs/1".into()),
                head: Some(HeadCommit {
                    hash: "0123456789abcdef0123456789abcdef01234567".into(),
                    author_name: "Dev".into(),
                    author_email: "dev@example.com".into(),
                    date: Utc::now(),
                    message: "release".into(),
                    remotes: vec![],
                }),
                env_vars: BTreeMap::from([("BUILD".to_string(), "7".to_string())]),
                materials,
                annotations: BTreeMap::new(),
                policy_evaluations: Vec::new(),
            },
            dry_run: false,
        }
    }

    #[test]
    fn test_subjects_are_outputs_and_head() {
        let statement = render_statement(&complete_state()).unwrap();
        assert_eq!(statement.statement_type, STATEMENT_TYPE_V1);
        assert_eq!(statement.predicate_type, PREDICATE_TYPE);

        let names: Vec<&str> = statement.subject.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["chainloop.workflow.release", "ghcr.io/acme/widget", GIT_HEAD_SUBJECT]
        );
        assert!(statement.subject[1].digest.contains_key("sha256"));
        statement.check().unwrap();
    }

    #[test]
    fn test_predicate_carries_materials_and_env() {
        let statement = render_statement(&complete_state()).unwrap();
        let predicate: Predicate = serde_json::from_value(statement.predicate).unwrap();
        assert_eq!(predicate.metadata.name, "release");
        assert_eq!(predicate.runner_type, "GITHUB_ACTION");
        assert_eq!(predicate.env.get("BUILD").map(String::as_str), Some("7"));

        let sbom = predicate.materials.iter().find(|m| m.name == "sbom").unwrap();
        assert_eq!(sbom.material_type, "SBOM_CYCLONEDX_JSON");
        assert_eq!(sbom.embedded_inline.as_deref(), Some("e30="));
        assert!(!sbom.uploaded_to_cas);
    }

    #[test]
    fn test_refuses_incomplete_state() {
        let mut state = complete_state();
        state.attestation.materials.remove("sbom");
        assert!(matches!(
            render_statement(&state),
            Err(RenderError::Incomplete(StateValidationError::MissingMaterial(_)))
        ));
    }

    #[test]
    fn test_envelope_verifies_and_decodes_to_statement() {
        let signer = Ed25519Signer::generate();
        let envelope = render_envelope(&complete_state(), &signer).unwrap();
        assert_eq!(envelope.payload_type, IN_TOTO_PAYLOAD_TYPE);

        let payload = verify_envelope(&envelope, &signer.verifying_key()).unwrap();
        let statement: Statement = serde_json::from_slice(&payload).unwrap();
        assert_eq!(statement.subject.len(), 3);
    }

    #[test]
    fn test_workflow_subject_without_outputs_or_git() {
        let mut state = complete_state();
        state.attestation.head = None;
        for m in state.attestation.materials.values_mut() {
            m.output = false;
            if let MaterialPayload::ContainerImage { is_subject, .. } = &mut m.payload {
                *is_subject = false;
            }
        }
        for m in state.input_schema.materials.iter_mut() {
            m.output = false;
        }

        let statement = render_statement(&state).unwrap();
        assert_eq!(statement.subject.len(), 1);
        assert_eq!(statement.subject[0].name, "chainloop.workflow.release");

        let canonical = serde_json_canonicalizer::to_vec(&statement.predicate).unwrap();
        let expected = Digest::of_bytes(&canonical);
        assert_eq!(statement.subject[0].digest.get("sha256").map(String::as_str), Some(expected.hex()));
        statement.check().unwrap();
    }
}
