//! CI runner context detection.
//!
//! Each supported CI system knows which environment variables prove it is
//! the current execution context, which variables it records into an
//! attestation, and how to build a link back to the running job.
//!
//! Runners never read the process environment directly; they are handed an
//! [`Environment`] so detection can be exercised deterministically.

mod azure_pipeline;
mod circleci;
mod dagger;
mod env;
mod generic;
mod github_action;
mod gitlab;
mod jenkins;
mod registry;
mod runner;

pub use azure_pipeline::AzurePipeline;
pub use circleci::CircleCiBuild;
pub use dagger::DaggerPipeline;
pub use env::{Environment, MapEnv, ProcessEnv, SharedEnv};
pub use generic::Generic;
pub use github_action::GitHubAction;
pub use gitlab::GitLabPipeline;
pub use jenkins::JenkinsJob;
pub use registry::{discover, discover_and_enforce, new_runner, DETECTION_ORDER};
pub use runner::{EnvVarSpec, Runner, RunnerEnvironment, RunnerError, RunnerType};
