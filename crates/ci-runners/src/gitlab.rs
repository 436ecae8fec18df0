//! GitLab CI pipelines.

use crate::env::{Environment, SharedEnv};
use crate::runner::{EnvVarSpec, Runner, RunnerEnvironment, RunnerType};

const REQUIRED: &[&str] = &["GITLAB_CI", "CI_JOB_URL", "CI_CONFIG_PATH"];

const ENV_VARS: &[EnvVarSpec] = &[
    EnvVarSpec::required("GITLAB_USER_EMAIL"),
    EnvVarSpec::required("GITLAB_USER_LOGIN"),
    EnvVarSpec::required("CI_PROJECT_URL"),
    EnvVarSpec::required("CI_COMMIT_SHA"),
    EnvVarSpec::required("CI_JOB_URL"),
    EnvVarSpec::required("CI_PIPELINE_URL"),
    EnvVarSpec::required("CI_RUNNER_VERSION"),
    EnvVarSpec::optional("CI_RUNNER_DESCRIPTION"),
    EnvVarSpec::required("CI_COMMIT_REF_NAME"),
    EnvVarSpec::optional("CI_MERGE_REQUEST_IID"),
];

const SAAS_HOST: &str = "gitlab.com";

pub struct GitLabPipeline {
    env: SharedEnv,
}

impl GitLabPipeline {
    pub fn new(env: SharedEnv) -> Self {
        Self { env }
    }
}

impl Runner for GitLabPipeline {
    fn id(&self) -> RunnerType {
        RunnerType::GitLabPipeline
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
        self.env.get_non_empty("CI_JOB_URL")
    }

    fn environment(&self) -> RunnerEnvironment {
        match self.env.get_non_empty("CI_SERVER_HOST") {
            Some(host) if host == SAAS_HOST => RunnerEnvironment::Managed,
            Some(_) => RunnerEnvironment::SelfHosted,
            None => RunnerEnvironment::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;

    fn detect_env() -> MapEnv {
        MapEnv::new()
            .with("GITLAB_CI", "true")
            .with("CI_JOB_URL", "https://gitlab.com/acme/widget/-/jobs/7")
            .with("CI_CONFIG_PATH", ".gitlab-ci.yml")
    }

    #[test]
    fn test_check_env() {
        assert!(GitLabPipeline::new(detect_env().shared()).check_env());
        let no_config = MapEnv::new().with("GITLAB_CI", "true");
        assert!(!GitLabPipeline::new(no_config.shared()).check_env());
    }

    #[test]
    fn test_run_uri_is_job_url() {
        let runner = GitLabPipeline::new(detect_env().shared());
        assert_eq!(
            runner.run_uri().as_deref(),
            Some("https://gitlab.com/acme/widget/-/jobs/7")
        );
    }

    #[test]
    fn test_environment() {
        let saas = detect_env().with("CI_SERVER_HOST", "gitlab.com");
        assert_eq!(
            GitLabPipeline::new(saas.shared()).environment(),
            RunnerEnvironment::Managed
        );
        let own = detect_env().with("CI_SERVER_HOST", "git.acme.internal");
        assert_eq!(
            GitLabPipeline::new(own.shared()).environment(),
            RunnerEnvironment::SelfHosted
        );
    }
}
