//! Git Repository Client: the clone/branch/commit/push/merge primitives the
//! publishers and the merger drive, plus a `git` CLI implementation.

pub mod auth;
pub mod error;
pub mod parse;
pub mod repository;
pub mod types;

use std::path::Path;

use async_trait::async_trait;

pub use error::GitError;
pub use repository::{CliGitClient, CliWorkingCopy};
pub use types::*;

#[async_trait]
pub trait GitClient: Send + Sync {
    /// Clones `remote` into `dest`, which must not exist yet.
    async fn clone_repo(
        &self,
        remote: &RemoteRepo,
        dest: &Path,
    ) -> Result<Box<dyn WorkingCopy>, GitError>;
}

/// A cloned repository exclusively owned by one run.
#[async_trait]
pub trait WorkingCopy: Send + Sync {
    fn path(&self) -> &Path;

    /// Creates and checks out `new_branch` at the remote tip of `from_ref`.
    async fn checkout_branch(&self, new_branch: &str, from_ref: &str) -> Result<(), GitError>;

    /// Stages everything, commits and pushes to `branch`.
    ///
    /// Returns `false` without committing when the tree has no changes.
    async fn commit_and_push(&self, message: &str, branch: &str) -> Result<bool, GitError>;

    /// Merges the remote tip of `branch` into the current branch.
    async fn merge_remote_branch(&self, branch: &str, message: &str)
        -> Result<MergeOutcome, GitError>;

    /// Replaces a conflicted file with the version from the branch being
    /// merged in. During a pull request update that is the target branch.
    async fn checkout_theirs(&self, file: &str) -> Result<(), GitError>;

    async fn stage(&self, file: &str) -> Result<(), GitError>;

    /// Records the staged state, concluding an in-progress merge.
    async fn commit_staged(&self, message: &str) -> Result<(), GitError>;

    /// Pushes the current `HEAD` to `branch` on the remote.
    async fn push_head(&self, branch: &str) -> Result<(), GitError>;
}
