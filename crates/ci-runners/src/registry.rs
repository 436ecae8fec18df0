//! Runner construction and detection policy.

use tracing::{debug, warn};

use crate::azure_pipeline::AzurePipeline;
use crate::circleci::CircleCiBuild;
use crate::dagger::DaggerPipeline;
use crate::env::SharedEnv;
use crate::generic::Generic;
use crate::github_action::GitHubAction;
use crate::gitlab::GitLabPipeline;
use crate::jenkins::JenkinsJob;
use crate::runner::{Runner, RunnerError, RunnerType};

/// Order in which CI systems are probed by [`discover`].
///
/// Dagger comes first because a Dagger pipeline usually runs nested inside
/// another CI system whose variables are also visible.
pub const DETECTION_ORDER: &[RunnerType] = &[
    RunnerType::DaggerPipeline,
    RunnerType::GitHubAction,
    RunnerType::GitLabPipeline,
    RunnerType::AzurePipeline,
    RunnerType::JenkinsJob,
    RunnerType::CircleCiBuild,
];

/// Build the runner for `runner_type`. `Unspecified` yields the generic runner.
pub fn new_runner(runner_type: RunnerType, env: SharedEnv) -> Box<dyn Runner> {
    match runner_type {
        RunnerType::GitHubAction => Box::new(GitHubAction::new(env)),
        RunnerType::GitLabPipeline => Box::new(GitLabPipeline::new(env)),
        RunnerType::AzurePipeline => Box::new(AzurePipeline::new(env)),
        RunnerType::JenkinsJob => Box::new(JenkinsJob::new(env)),
        RunnerType::CircleCiBuild => Box::new(CircleCiBuild::new(env)),
        RunnerType::DaggerPipeline => Box::new(DaggerPipeline::new(env)),
        RunnerType::Unspecified => Box::new(Generic::new(env)),
    }
}

/// First CI system whose context is present, or the generic runner.
pub fn discover(env: SharedEnv) -> Box<dyn Runner> {
    for runner_type in DETECTION_ORDER {
        let runner = new_runner(*runner_type, env.clone());
        if runner.check_env() {
            debug!(runner = %runner_type, "detected runner context");
            return runner;
        }
    }
    Box::new(Generic::new(env))
}

/// Pick the runner a contract requires and make sure we are running inside it.
///
/// An unspecified requirement falls back to [`discover`]. Outside dry-run a
/// missing context is fatal; in dry-run it only warns.
pub fn discover_and_enforce(
    required: RunnerType,
    env: SharedEnv,
    dry_run: bool,
) -> Result<Box<dyn Runner>, RunnerError> {
    if required == RunnerType::Unspecified {
        return Ok(discover(env));
    }

    let runner = new_runner(required, env);
    if !runner.check_env() {
        if !dry_run {
            return Err(RunnerError::RunnerContextNotFound {
                runner_type: required,
            });
        }
        warn!(runner = %required, "runner context not found, continuing because of dry-run");
    }

    Ok(runner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;

    fn github_env() -> MapEnv {
        MapEnv::new()
            .with("GITHUB_REPOSITORY", "acme/widget")
            .with("GITHUB_RUN_ID", "1")
    }

    #[test]
    fn test_new_runner_ids() {
        for t in DETECTION_ORDER {
            assert_eq!(new_runner(*t, MapEnv::new().shared()).id(), *t);
        }
        assert_eq!(
            new_runner(RunnerType::Unspecified, MapEnv::new().shared()).id(),
            RunnerType::Unspecified
        );
    }

    #[test]
    fn test_discover() {
        assert_eq!(discover(github_env().shared()).id(), RunnerType::GitHubAction);
        assert_eq!(discover(MapEnv::new().shared()).id(), RunnerType::Unspecified);
    }

    #[test]
    fn test_discover_prefers_dagger() {
        let env = github_env().with("CHAINLOOP_DAGGER_CLIENT", "v0.9");
        assert_eq!(discover(env.shared()).id(), RunnerType::DaggerPipeline);
    }

    #[test]
    fn test_enforce_outside_ci_fails() {
        let err = discover_and_enforce(RunnerType::GitHubAction, MapEnv::new().shared(), false)
            .err()
            .unwrap();
        assert_eq!(
            err,
            RunnerError::RunnerContextNotFound {
                runner_type: RunnerType::GitHubAction
            }
        );
    }

    #[test]
    fn test_enforce_outside_ci_dry_run_succeeds() {
        let runner =
            discover_and_enforce(RunnerType::GitHubAction, MapEnv::new().shared(), true).unwrap();
        assert_eq!(runner.id(), RunnerType::GitHubAction);
    }

    #[test]
    fn test_enforce_inside_ci() {
        let runner =
            discover_and_enforce(RunnerType::GitHubAction, github_env().shared(), false).unwrap();
        assert_eq!(runner.id(), RunnerType::GitHubAction);
    }

    #[test]
    fn test_enforce_unspecified_discovers() {
        let runner =
            discover_and_enforce(RunnerType::Unspecified, github_env().shared(), false).unwrap();
        assert_eq!(runner.id(), RunnerType::GitHubAction);
    }
}
