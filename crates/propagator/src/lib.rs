pub mod checkout;
pub mod config;
pub mod content;
pub mod error;
pub mod git;
pub mod hosting;
pub mod kustomize;
pub mod manifest;
pub mod merge;
pub mod naming;
pub mod orchestrator;
pub mod progress;
pub mod publish;
pub mod request;
pub mod resolver;
pub mod sanitize;
pub mod secrets;
pub mod telemetry;
pub mod throttle;

pub use config::{load_config, Config, ConfigResolver, StaticConfigResolver};
pub use error::{
    ConfigError, ContentError, HostingError, IndexError, PropagateError, Result,
};
pub use git::{CliGitClient, GitClient, GitError, WorkingCopy};
pub use hosting::{GitHubClient, PullRequestClient};
pub use orchestrator::{CancelHandle, DeleteOutcome, Orchestrator, PopulateOutcome};
pub use progress::{ProgressBroadcaster, RunEvent, Stage};
pub use publish::PublishResult;
pub use request::{ChangeRequest, ContentSource, HelmChart, IgnoreDifference, Layer};
pub use resolver::{ConflictResolver, IndexConflictResolver, Resolution};
pub use telemetry::init_tracing;
