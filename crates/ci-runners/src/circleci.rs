//! CircleCI builds.

use crate::env::{Environment, SharedEnv};
use crate::runner::{EnvVarSpec, Runner, RunnerType};

const REQUIRED: &[&str] = &["CI", "CIRCLECI"];

const ENV_VARS: &[EnvVarSpec] = &[
    EnvVarSpec::required("CIRCLE_BUILD_URL"),
    EnvVarSpec::required("CIRCLE_JOB"),
    EnvVarSpec::optional("CIRCLE_BRANCH"),
    EnvVarSpec::required("CIRCLE_NODE_TOTAL"),
    EnvVarSpec::required("CIRCLE_NODE_INDEX"),
];

pub struct CircleCiBuild {
    env: SharedEnv,
}

impl CircleCiBuild {
    pub fn new(env: SharedEnv) -> Self {
        Self { env }
    }
}

impl Runner for CircleCiBuild {
    fn id(&self) -> RunnerType {
        RunnerType::CircleCiBuild
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
        self.env.get_non_empty("CIRCLE_BUILD_URL")
    }
}
