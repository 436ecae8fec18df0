//! Jenkins jobs.

use crate::env::{Environment, SharedEnv};
use crate::runner::{EnvVarSpec, Runner, RunnerType};

const REQUIRED: &[&str] = &["JENKINS_HOME", "BUILD_URL"];

const ENV_VARS: &[EnvVarSpec] = &[
    EnvVarSpec::required("JOB_NAME"),
    EnvVarSpec::required("BUILD_URL"),
    EnvVarSpec::optional("GIT_BRANCH"),
    EnvVarSpec::optional("GIT_COMMIT"),
    EnvVarSpec::optional("AGENT_WORKDIR"),
    EnvVarSpec::required("NODE_NAME"),
];

pub struct JenkinsJob {
    env: SharedEnv,
}

impl JenkinsJob {
    pub fn new(env: SharedEnv) -> Self {
        Self { env }
    }
}

impl Runner for JenkinsJob {
    fn id(&self) -> RunnerType {
        RunnerType::JenkinsJob
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

    fn run_uri(&self) -> Option<String> {
        self.env.get_non_empty("BUILD_URL")
    }
}
