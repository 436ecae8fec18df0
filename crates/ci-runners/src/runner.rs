//! Runner trait and shared types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::env::Environment;

/// Identifier of a CI system, as written in contracts and attestations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RunnerType {
    #[default]
    #[serde(rename = "RUNNER_TYPE_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "GITHUB_ACTION")]
    GitHubAction,
    #[serde(rename = "GITLAB_PIPELINE")]
    GitLabPipeline,
    #[serde(rename = "AZURE_PIPELINE")]
    AzurePipeline,
    #[serde(rename = "JENKINS_JOB")]
    JenkinsJob,
    #[serde(rename = "CIRCLECI_BUILD")]
    CircleCiBuild,
    #[serde(rename = "DAGGER_PIPELINE")]
    DaggerPipeline,
}

impl RunnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "RUNNER_TYPE_UNSPECIFIED",
            Self::GitHubAction => "GITHUB_ACTION",
            Self::GitLabPipeline => "GITLAB_PIPELINE",
            Self::AzurePipeline => "AZURE_PIPELINE",
            Self::JenkinsJob => "JENKINS_JOB",
            Self::CircleCiBuild => "CIRCLECI_BUILD",
            Self::DaggerPipeline => "DAGGER_PIPELINE",
        }
    }
}

impl fmt::Display for RunnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunnerType {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "RUNNER_TYPE_UNSPECIFIED" => Ok(Self::Unspecified),
            "GITHUB_ACTION" => Ok(Self::GitHubAction),
            "GITLAB_PIPELINE" => Ok(Self::GitLabPipeline),
            "AZURE_PIPELINE" => Ok(Self::AzurePipeline),
            "JENKINS_JOB" => Ok(Self::JenkinsJob),
            "CIRCLECI_BUILD" => Ok(Self::CircleCiBuild),
            "DAGGER_PIPELINE" => Ok(Self::DaggerPipeline),
            other => Err(RunnerError::UnknownRunnerType(other.to_string())),
        }
    }
}

/// Where the runner is hosted, when the CI system exposes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerEnvironment {
    #[default]
    Unknown,
    Managed,
    SelfHosted,
}

/// An environment variable a runner records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvVarSpec {
    pub name: &'static str,
    pub optional: bool,
}

impl EnvVarSpec {
    pub const fn required(name: &'static str) -> Self {
        Self { name, optional: false }
    }

    pub const fn optional(name: &'static str) -> Self {
        Self { name, optional: true }
    }
}

/// Errors from runner detection and resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    #[error("runner context not found for {runner_type}, are you running in the right CI environment?")]
    RunnerContextNotFound { runner_type: RunnerType },

    #[error("required environment variables not present: {}", missing.join(", "))]
    EnvVarsNotResolved { missing: Vec<String> },

    #[error("unknown runner type '{0}'")]
    UnknownRunnerType(String),
}

/// A CI system.
pub trait Runner: Send + Sync {
    fn id(&self) -> RunnerType;

    /// Environment this runner reads from.
    fn env(&self) -> &dyn Environment;

    /// Variables whose presence identifies this CI system.
    fn required_env(&self) -> &'static [&'static str];

    /// Variables recorded into the attestation.
    fn list_env_vars(&self) -> &'static [EnvVarSpec];

    /// Link to the current job or run.
    fn run_uri(&self) -> Option<String>;

    fn environment(&self) -> RunnerEnvironment {
        RunnerEnvironment::Unknown
    }

    /// True when every identifying variable is set and non-empty.
    fn check_env(&self) -> bool {
        self.required_env()
            .iter()
            .all(|name| self.env().get_non_empty(name).is_some())
    }

    /// Read the declared variables. Missing required ones are reported together.
    fn resolve_env_vars(&self) -> Result<BTreeMap<String, String>, RunnerError> {
        let mut resolved = BTreeMap::new();
        let mut missing = Vec::new();

        for spec in self.list_env_vars() {
            match self.env().get_non_empty(spec.name) {
                Some(value) => {
                    resolved.insert(spec.name.to_string(), value);
                }
                None if spec.optional => {}
                None => missing.push(spec.name.to_string()),
            }
        }

        if missing.is_empty() {
            Ok(resolved)
        } else {
            Err(RunnerError::EnvVarsNotResolved { missing })
        }
    }
}
