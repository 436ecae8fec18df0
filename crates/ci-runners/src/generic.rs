//! Fallback runner accepting any environment.

use crate::env::{Environment, SharedEnv};
use crate::runner::{EnvVarSpec, Runner, RunnerType};

pub struct Generic {
    env: SharedEnv,
}

impl Generic {
    pub fn new(env: SharedEnv) -> Self {
        Self { env }
    }
}

impl Runner for Generic {
    fn id(&self) -> RunnerType {
        RunnerType::Unspecified
    }

    fn env(&self) -> &dyn Environment {
        self.env.as_ref()
    }

    fn required_env(&self) -> &'static [&'static str] {
        &[]
    }

    fn list_env_vars(&self) -> &'static [EnvVarSpec] {
        &[]
    }

    fn run_uri(&self) -> Option<String> {
        None
    }
}
