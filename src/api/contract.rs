//! Workflow contract (crafting schema)
//!
//! A contract declares which materials a workflow run must produce, which
//! environment variables get recorded, and which CI system it must run in.

use ci_runners::RunnerType;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

/// Contract schema version understood by this implementation
pub const SCHEMA_VERSION: &str = "v1";

/// Kinds of material an attestation can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaterialType {
    String,
    ContainerImage,
    Artifact,
    SbomCyclonedxJson,
    SbomSpdxJson,
    JunitXml,
    Openvex,
    CsafVex,
    CsafInformationalAdvisory,
    CsafSecurityAdvisory,
    CsafSecurityIncidentResponse,
    Sarif,
    HelmChart,
    Evidence,
    Attestation,
}

impl MaterialType {
    /// Every kind, in declaration order
    pub const ALL: &'static [MaterialType] = &[
        MaterialType::String,
        MaterialType::ContainerImage,
        MaterialType::Artifact,
        MaterialType::SbomCyclonedxJson,
        MaterialType::SbomSpdxJson,
        MaterialType::JunitXml,
        MaterialType::Openvex,
        MaterialType::CsafVex,
        MaterialType::CsafInformationalAdvisory,
        MaterialType::CsafSecurityAdvisory,
        MaterialType::CsafSecurityIncidentResponse,
        MaterialType::Sarif,
        MaterialType::HelmChart,
        MaterialType::Evidence,
        MaterialType::Attestation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::ContainerImage => "CONTAINER_IMAGE",
            Self::Artifact => "ARTIFACT",
            Self::SbomCyclonedxJson => "SBOM_CYCLONEDX_JSON",
            Self::SbomSpdxJson => "SBOM_SPDX_JSON",
            Self::JunitXml => "JUNIT_XML",
            Self::Openvex => "OPENVEX",
            Self::CsafVex => "CSAF_VEX",
            Self::CsafInformationalAdvisory => "CSAF_INFORMATIONAL_ADVISORY",
            Self::CsafSecurityAdvisory => "CSAF_SECURITY_ADVISORY",
            Self::CsafSecurityIncidentResponse => "CSAF_SECURITY_INCIDENT_RESPONSE",
            Self::Sarif => "SARIF",
            Self::HelmChart => "HELM_CHART",
            Self::Evidence => "EVIDENCE",
            Self::Attestation => "ATTESTATION",
        }
    }

    /// Whether crafting this kind reads a local file (and may touch the CAS)
    pub fn is_file_based(&self) -> bool {
        !matches!(self, Self::String | Self::ContainerImage)
    }
}

impl fmt::Display for MaterialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaterialType {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        MaterialType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| ContractError::UnknownMaterialType(s.to_string()))
    }
}

/// A name/value annotation; an empty value must be filled at runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl Annotation {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One expected material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialSchema {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: MaterialType,

    #[serde(default)]
    pub optional: bool,

    /// Output materials become subjects of the attestation
    #[serde(default)]
    pub output: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl MaterialSchema {
    pub fn new(name: impl Into<String>, kind: MaterialType) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            output: false,
            annotations: Vec::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn output(mut self) -> Self {
        self.output = true;
        self
    }

    pub fn with_annotation(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.push(Annotation::new(name, value));
        self
    }
}

/// CI system the workflow must run in
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerRequirement {
    #[serde(rename = "type", default)]
    pub kind: RunnerType,
}

/// Errors loading or validating a contract
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("unknown material type '{0}'")]
    UnknownMaterialType(String),

    #[error("unsupported contract schema version '{0}'")]
    UnsupportedVersion(String),

    #[error("material '{0}' is declared more than once")]
    DuplicateMaterial(String),

    #[error("invalid material name '{0}': must be lowercase alphanumerics and '-'")]
    InvalidMaterialName(String),

    #[error("invalid annotation name '{0}'")]
    InvalidAnnotationName(String),

    /// `scope` is the material name, or `attestation`
    #[error("annotation '{annotation}' declared twice on {scope}")]
    DuplicateAnnotation { scope: String, annotation: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// The contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CraftingSchema {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    #[serde(default)]
    pub materials: Vec<MaterialSchema>,

    /// Process environment variables that must be recorded
    #[serde(default)]
    pub env_allow_list: Vec<String>,

    #[serde(default)]
    pub runner: RunnerRequirement,

    /// Attestation-level annotations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

impl Default for CraftingSchema {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            materials: Vec::new(),
            env_allow_list: Vec::new(),
            runner: RunnerRequirement::default(),
            annotations: Vec::new(),
        }
    }
}

fn material_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"))
}

fn annotation_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid regex"))
}

impl CraftingSchema {
    pub fn with_material(mut self, material: MaterialSchema) -> Self {
        self.materials.push(material);
        self
    }

    pub fn with_runner(mut self, kind: RunnerType) -> Self {
        self.runner.kind = kind;
        self
    }

    pub fn find_material(&self, name: &str) -> Option<&MaterialSchema> {
        self.materials.iter().find(|m| m.name == name)
    }

    /// Structural checks performed before a contract is used
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ContractError::UnsupportedVersion(self.schema_version.clone()));
        }

        let mut seen = HashSet::new();
        for material in &self.materials {
            if !material_name_regex().is_match(&material.name) {
                return Err(ContractError::InvalidMaterialName(material.name.clone()));
            }
            if !seen.insert(material.name.as_str()) {
                return Err(ContractError::DuplicateMaterial(material.name.clone()));
            }
            check_annotations(&material.name, &material.annotations)?;
        }
        check_annotations("attestation", &self.annotations)?;

        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ContractError> {
        let schema: Self = serde_json::from_str(json)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, ContractError> {
        let schema: Self = toml::from_str(toml_str)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Load from a `.json` or `.toml` file (by extension, JSON otherwise)
    pub fn from_file(path: &Path) -> Result<Self, ContractError> {
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&contents),
            _ => Self::from_json(&contents),
        }
    }
}

fn check_annotations(scope: &str, annotations: &[Annotation]) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for annotation in annotations {
        if !annotation_name_regex().is_match(&annotation.name) {
            return Err(ContractError::InvalidAnnotationName(annotation.name.clone()));
        }
        if !seen.insert(annotation.name.as_str()) {
            return Err(ContractError::DuplicateAnnotation {
                scope: scope.to_string(),
                annotation: annotation.name.clone(),
            });
        }
    }
    Ok(())
}
