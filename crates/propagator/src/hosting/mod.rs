//! Pull-request operations on the git hosting provider.

pub mod github;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HostingError;
use crate::git::RemoteRepo;

pub use github::GitHubClient;

/// How the provider combines a pull request into its base branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    #[default]
    Merge,
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        }
    }
}

/// Mergeability as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeState {
    Clean,
    /// Conflicts with the base branch.
    Dirty,
    /// Head is out of date with the base branch.
    Behind,
    /// Required checks or reviews are pending.
    Blocked,
    /// Mergeable with failing non-required checks.
    Unstable,
    HasHooks,
    Draft,
    /// Not computed yet.
    #[serde(other)]
    Unknown,
}

impl MergeState {
    pub fn is_mergeable(&self) -> bool {
        matches!(
            self,
            MergeState::Clean | MergeState::Unstable | MergeState::HasHooks
        )
    }

    /// Needs the base branch merged into the head before it can go in.
    pub fn needs_update(&self) -> bool {
        matches!(self, MergeState::Dirty | MergeState::Behind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub head: String,
    pub base: String,
    pub merged: bool,
    pub state: MergeState,
}

#[async_trait]
pub trait PullRequestClient: Send + Sync {
    async fn create_pull_request(
        &self,
        repo: &RemoteRepo,
        request: &NewPullRequest,
    ) -> Result<PullRequest, HostingError>;

    async fn get_pull_request(
        &self,
        repo: &RemoteRepo,
        number: u64,
    ) -> Result<PullRequest, HostingError>;

    async fn merge_pull_request(
        &self,
        repo: &RemoteRepo,
        number: u64,
        method: MergeMethod,
    ) -> Result<(), HostingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_state_from_provider_strings() {
        let parse = |s: &str| serde_json::from_value::<MergeState>(serde_json::json!(s)).unwrap();
        assert_eq!(parse("clean"), MergeState::Clean);
        assert_eq!(parse("has_hooks"), MergeState::HasHooks);
        assert_eq!(parse("something_new"), MergeState::Unknown);
    }

    #[test]
    fn test_merge_state_classification() {
        assert!(MergeState::Unstable.is_mergeable());
        assert!(!MergeState::Blocked.is_mergeable());
        assert!(MergeState::Behind.needs_update());
        assert!(!MergeState::Unknown.needs_update());
    }
}
