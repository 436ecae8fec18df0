//! GitHub Actions.

use crate::env::{Environment, SharedEnv};
use crate::runner::{EnvVarSpec, Runner, RunnerEnvironment, RunnerType};

const REQUIRED: &[&str] = &["GITHUB_REPOSITORY", "GITHUB_RUN_ID"];

const ENV_VARS: &[EnvVarSpec] = &[
    EnvVarSpec::required("GITHUB_ACTOR"),
    EnvVarSpec::required("GITHUB_REF"),
    EnvVarSpec::required("GITHUB_REPOSITORY"),
    EnvVarSpec::required("GITHUB_REPOSITORY_OWNER"),
    EnvVarSpec::required("GITHUB_RUN_ID"),
    EnvVarSpec::required("GITHUB_SHA"),
    EnvVarSpec::required("RUNNER_NAME"),
    EnvVarSpec::required("RUNNER_OS"),
    EnvVarSpec::optional("GITHUB_HEAD_REF"),
    EnvVarSpec::optional("GITHUB_BASE_REF"),
    EnvVarSpec::optional("GITHUB_WORKFLOW_REF"),
];

const DEFAULT_SERVER_URL: &str = "https://github.com";

pub struct GitHubAction {
    env: SharedEnv,
}

impl GitHubAction {
    pub fn new(env: SharedEnv) -> Self {
        Self { env }
    }
}

impl Runner for GitHubAction {
    fn id(&self) -> RunnerType {
        RunnerType::GitHubAction
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

    /// `{server}/{repository}/actions/runs/{run_id}`
    fn run_uri(&self) -> Option<String> {
        let repo = self.env.get_non_empty("GITHUB_REPOSITORY")?;
        let run_id = self.env.get_non_empty("GITHUB_RUN_ID")?;
        let server = self
            .env
            .get_non_empty("GITHUB_SERVER_URL")
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        Some(format!(
            "{}/{}/actions/runs/{}",
            server.trim_end_matches('/'),
            repo,
            run_id
        ))
    }

    fn environment(&self) -> RunnerEnvironment {
        match self.env.get_non_empty("RUNNER_ENVIRONMENT").as_deref() {
            Some("github-hosted") => RunnerEnvironment::Managed,
            Some("self-hosted") => RunnerEnvironment::SelfHosted,
            _ => RunnerEnvironment::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;
    use crate::runner::RunnerError;

    fn full_env() -> MapEnv {
        MapEnv::new()
            .with("GITHUB_ACTOR", "octocat")
            .with("GITHUB_REF", "refs/heads/main")
            .with("GITHUB_REPOSITORY", "acme/widget")
            .with("GITHUB_REPOSITORY_OWNER", "acme")
            .with("GITHUB_RUN_ID", "42")
            .with("GITHUB_SHA", "1234abcd")
            .with("RUNNER_NAME", "hosted-1")
            .with("RUNNER_OS", "Linux")
    }

    #[test]
    fn test_check_env() {
        assert!(GitHubAction::new(full_env().shared()).check_env());
        assert!(!GitHubAction::new(MapEnv::new().shared()).check_env());
        let partial = MapEnv::new().with("GITHUB_REPOSITORY", "acme/widget");
        assert!(!GitHubAction::new(partial.shared()).check_env());
    }

    #[test]
    fn test_run_uri() {
        let runner = GitHubAction::new(full_env().shared());
        assert_eq!(
            runner.run_uri().as_deref(),
            Some("https://github.com/acme/widget/actions/runs/42")
        );

        let enterprise = full_env().with("GITHUB_SERVER_URL", "https://ghe.example.com/");
        assert_eq!(
            GitHubAction::new(enterprise.shared()).run_uri().as_deref(),
            Some("https://ghe.example.com/acme/widget/actions/runs/42")
        );
    }

    #[test]
    fn test_resolve_skips_missing_optional() {
        let runner = GitHubAction::new(full_env().with("GITHUB_HEAD_REF", "feature").shared());
        let vars = runner.resolve_env_vars().unwrap();
        assert_eq!(vars.get("GITHUB_HEAD_REF").map(String::as_str), Some("feature"));
        assert!(!vars.contains_key("GITHUB_BASE_REF"));
        assert_eq!(vars.len(), 9);
    }

    #[test]
    fn test_resolve_collects_all_missing() {
        let env = MapEnv::new()
            .with("GITHUB_REPOSITORY", "acme/widget")
            .with("GITHUB_RUN_ID", "42");
        let err = GitHubAction::new(env.shared()).resolve_env_vars().unwrap_err();
        match err {
            RunnerError::EnvVarsNotResolved { missing } => {
                assert_eq!(missing.len(), 6);
                assert!(missing.contains(&"GITHUB_ACTOR".to_string()));
                assert!(missing.contains(&"RUNNER_OS".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_environment() {
        let hosted = full_env().with("RUNNER_ENVIRONMENT", "github-hosted");
        assert_eq!(
            GitHubAction::new(hosted.shared()).environment(),
            RunnerEnvironment::Managed
        );
        assert_eq!(
            GitHubAction::new(full_env().shared()).environment(),
            RunnerEnvironment::Unknown
        );
    }
}
