//! Dagger pipelines, detected through the client marker set by the Dagger module.

use crate::env::{Environment, SharedEnv};
use crate::runner::{EnvVarSpec, Runner, RunnerType};

const REQUIRED: &[&str] = &["CHAINLOOP_DAGGER_CLIENT"];

const ENV_VARS: &[EnvVarSpec] = &[EnvVarSpec::required("CHAINLOOP_DAGGER_CLIENT")];

pub struct DaggerPipeline {
    env: SharedEnv,
}

impl DaggerPipeline {
    pub fn new(env: SharedEnv) -> Self {
        Self { env }
    }
}

impl Runner for DaggerPipeline {
    fn id(&self) -> RunnerType {
        RunnerType::DaggerPipeline
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

    // Dagger has no navigable run page of its own.
    fn run_uri(&self) -> Option<String> {
        None
    }
}
