//! Azure Pipelines.

use crate::env::{Environment, SharedEnv};
use crate::runner::{EnvVarSpec, Runner, RunnerType};

const REQUIRED: &[&str] = &["TF_BUILD", "BUILD_BUILDURI"];

const ENV_VARS: &[EnvVarSpec] = &[
    EnvVarSpec::required("BUILD_REQUESTEDFOREMAIL"),
    EnvVarSpec::required("BUILD_REQUESTEDFOR"),
    EnvVarSpec::required("BUILD_REPOSITORY_URI"),
    EnvVarSpec::required("BUILD_REPOSITORY_NAME"),
    EnvVarSpec::required("BUILD_BUILDID"),
    EnvVarSpec::required("BUILD_BUILDNUMBER"),
    EnvVarSpec::required("BUILD_BUILDURI"),
    EnvVarSpec::required("BUILD_REASON"),
    EnvVarSpec::required("AGENT_VERSION"),
    EnvVarSpec::required("TF_BUILD"),
    EnvVarSpec::required("SYSTEM_TEAMFOUNDATIONCOLLECTIONURI"),
    EnvVarSpec::required("SYSTEM_TEAMPROJECT"),
];

pub struct AzurePipeline {
    env: SharedEnv,
}

impl AzurePipeline {
    pub fn new(env: SharedEnv) -> Self {
        Self { env }
    }
}

impl Runner for AzurePipeline {
    fn id(&self) -> RunnerType {
        RunnerType::AzurePipeline
    }

    fn env(&self) -> &dyn Environment {
        self.env.as_ref()
    }

    fn required_env(&self) -> &'static [&'static str] {
        REQUIRED
    }

    fn list_env_vars(&self) -> &'static [EnvVarSpec] {
        ENV_VARS
    }

    /// `{collection_uri}{project}/_build/results?buildId={id}`
    fn run_uri(&self) -> Option<String> {
        let collection = self.env.get_non_empty("SYSTEM_TEAMFOUNDATIONCOLLECTIONURI")?;
        let project = self.env.get_non_empty("SYSTEM_TEAMPROJECT")?;
        let build_id = self.env.get_non_empty("BUILD_BUILDID")?;
        let collection = if collection.ends_with('/') {
            collection
        } else {
            format!("{}/", collection)
        };
        Some(format!(
            "{}{}/_build/results?buildId={}",
            collection, project, build_id
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;

    #[test]
    fn test_run_uri() {
        let env = MapEnv::new()
            .with("SYSTEM_TEAMFOUNDATIONCOLLECTIONURI", "https://dev.azure.com/acme")
            .with("SYSTEM_TEAMPROJECT", "widget")
            .with("BUILD_BUILDID", "99");
        let runner = AzurePipeline::new(env.shared());
        assert_eq!(
            runner.run_uri().as_deref(),
            Some("https://dev.azure.com/acme/widget/_build/results?buildId=99")
        );
    }

    #[test]
    fn test_check_env() {
        let env = MapEnv::new()
            .with("TF_BUILD", "True")
            .with("BUILD_BUILDURI", "vstfs:///Build/Build/99");
        assert!(AzurePipeline::new(env.shared()).check_env());
        assert!(!AzurePipeline::new(MapEnv::new().with("TF_BUILD", "True").shared()).check_env());
    }
}
