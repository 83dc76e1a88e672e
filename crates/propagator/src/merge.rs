//! Pull-request merge state machine.
//!
//! Each round pauses for the rate limit, reads the pull request and then
//! either merges it, brings its head up to date with the base branch
//! (handing conflicts to a resolver), or waits for the provider to unblock it.

use std::path::Path;
use std::time::Duration;

use tracing::Instrument;

use crate::checkout::LocalCheckout;
use crate::error::{HostingError, PropagateError, Result};
use crate::git::{GitClient, RemoteRepo};
use crate::hosting::{MergeMethod, MergeState, PullRequest, PullRequestClient};
use crate::resolver::{ConflictResolver, Resolution};
use crate::throttle::Throttle;

/// Times the head branch is brought up to date before giving up.
const MAX_BRANCH_UPDATES: u32 = 3;

/// Bounded wait for a blocked pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl WaitPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

    /// Used when the provider has not computed mergeability yet and no
    /// explicit wait was requested.
    pub const PENDING_STATE: WaitPolicy = WaitPolicy {
        max_attempts: 5,
        interval: Duration::from_secs(2),
    };
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            interval: Self::DEFAULT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergePolicy {
    pub method: MergeMethod,
    pub throttle: Throttle,
    /// `None` fails immediately on a blocked pull request.
    pub wait: Option<WaitPolicy>,
}

pub struct PullRequestMerger<'a> {
    git: &'a dyn GitClient,
    hosting: &'a dyn PullRequestClient,
    workdir: &'a Path,
}

impl<'a> PullRequestMerger<'a> {
    pub fn new(git: &'a dyn GitClient, hosting: &'a dyn PullRequestClient, workdir: &'a Path) -> Self {
        Self {
            git,
            hosting,
            workdir,
        }
    }

    /// Drives `pull_number` to merged.
    pub async fn merge(
        &self,
        repo: &RemoteRepo,
        pull_number: u64,
        policy: &MergePolicy,
        resolver: Option<&dyn ConflictResolver>,
    ) -> Result<()> {
        let mut waits = 0u32;
        let mut updates = 0u32;

        loop {
            policy.throttle.pause().await;
            let pr = self.hosting.get_pull_request(repo, pull_number).await?;

            if pr.merged {
                tracing::info!(pull_number, "Pull request already merged");
                return Ok(());
            }

            if pr.state.needs_update() && updates < MAX_BRANCH_UPDATES {
                updates += 1;
                tracing::info!(
                    pull_number,
                    state = ?pr.state,
                    attempt = updates,
                    "Updating pull request branch {} with {}",
                    pr.head,
                    pr.base
                );
                self.update_branch(repo, &pr, resolver).await?;
                continue;
            }

            if pr.state.is_mergeable() {
                policy.throttle.pause().await;
                match self
                    .hosting
                    .merge_pull_request(repo, pull_number, policy.method)
                    .await
                {
                    Ok(()) => {
                        tracing::info!(pull_number, method = policy.method.as_str(), "Merged pull request");
                        return Ok(());
                    }
                    Err(e) if is_transient_refusal(&e) => {
                        tracing::debug!(pull_number, error = %e, "Merge refused, treating as blocked");
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let wait = match (policy.wait, pr.state) {
                (Some(wait), _) => Some(wait),
                (None, MergeState::Unknown) => Some(WaitPolicy::PENDING_STATE),
                (None, _) => None,
            };

            waits += 1;
            match wait {
                Some(wait) if waits < wait.max_attempts => {
                    tracing::info!(
                        pull_number,
                        state = ?pr.state,
                        attempt = waits,
                        max_attempts = wait.max_attempts,
                        "Pull request not mergeable yet, waiting {:?}",
                        wait.interval
                    );
                    tokio::time::sleep(wait.interval).await;
                }
                _ => {
                    return Err(PropagateError::MergeBlocked {
                        pull_number,
                        attempts: waits,
                    })
                }
            }
        }
    }

    /// Merges the base branch into the pull request head in a fresh checkout.
    async fn update_branch(
        &self,
        repo: &RemoteRepo,
        pr: &PullRequest,
        resolver: Option<&dyn ConflictResolver>,
    ) -> Result<()> {
        let checkout =
            LocalCheckout::reserve(self.workdir, &repo.name).map_err(|e| PropagateError::Checkout {
                path: self.workdir.to_path_buf(),
                source: e,
            })?;

        let span = tracing::info_span!("update_branch", pull_number = pr.number, head = %pr.head);
        async {
            let wc = self.git.clone_repo(repo, checkout.path()).await?;
            wc.checkout_branch(&pr.head, &pr.head).await?;

            let message = format!("Merge branch '{}' into {}", pr.base, pr.head);
            let outcome = wc.merge_remote_branch(&pr.base, &message).await?;

            if !outcome.clean {
                let resolution = match resolver {
                    Some(resolver) => resolver.resolve(wc.as_ref(), &outcome.conflicts).await,
                    None => Resolution::default(),
                };
                for (file, error) in &resolution.errors {
                    tracing::warn!(file = %file, error = %error, "Conflict resolver failed");
                }

                let unresolved = resolution.unresolved(&outcome.conflicts);
                if !unresolved.is_empty() {
                    return Err(PropagateError::UnresolvedConflict {
                        pull_number: pr.number,
                        files: unresolved,
                    });
                }
                tracing::info!(files = ?resolution.resolved, "Resolved index conflicts");
                wc.commit_staged(&message).await?;
            }

            wc.push_head(&pr.head).await?;
            Ok::<(), PropagateError>(())
        }
        .instrument(span)
        .await?;

        checkout.remove();
        Ok(())
    }
}

/// Provider refusals that go away once checks or reviews settle.
fn is_transient_refusal(error: &HostingError) -> bool {
    // 405: not mergeable, 409: head moved during the merge
    matches!(error, HostingError::Status { status: 405 | 409, .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{Credentials, GitError, WorkingCopy};
    use crate::hosting::NewPullRequest;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays a scripted sequence of states; the last one repeats.
    struct ScriptedHosting {
        states: Mutex<VecDeque<(MergeState, bool)>>,
        merge_results: Mutex<VecDeque<std::result::Result<(), u16>>>,
        merge_calls: Mutex<u32>,
        get_calls: Mutex<u32>,
    }

    impl ScriptedHosting {
        fn new(states: &[(MergeState, bool)]) -> Self {
            Self {
                states: Mutex::new(states.iter().copied().collect()),
                merge_results: Mutex::new(VecDeque::new()),
                merge_calls: Mutex::new(0),
                get_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl PullRequestClient for ScriptedHosting {
        async fn create_pull_request(
            &self,
            _: &RemoteRepo,
            _: &NewPullRequest,
        ) -> std::result::Result<PullRequest, HostingError> {
            unreachable!()
        }

        async fn get_pull_request(
            &self,
            _: &RemoteRepo,
            number: u64,
        ) -> std::result::Result<PullRequest, HostingError> {
            *self.get_calls.lock().unwrap() += 1;
            let mut states = self.states.lock().unwrap();
            let (state, merged) = if states.len() > 1 {
                states.pop_front().unwrap()
            } else {
                *states.front().unwrap()
            };
            Ok(PullRequest {
                number,
                url: format!("https://example.com/pull/{}", number),
                head: "api-config-1".to_string(),
                base: "main".to_string(),
                merged,
                state,
            })
        }

        async fn merge_pull_request(
            &self,
            _: &RemoteRepo,
            number: u64,
            _: MergeMethod,
        ) -> std::result::Result<(), HostingError> {
            *self.merge_calls.lock().unwrap() += 1;
            match self.merge_results.lock().unwrap().pop_front() {
                Some(Err(status)) => Err(HostingError::Status {
                    status,
                    url: format!("pulls/{}/merge", number),
                    body: String::new(),
                }),
                _ => Ok(()),
            }
        }
    }

    struct NoGit;

    #[async_trait]
    impl GitClient for NoGit {
        async fn clone_repo(
            &self,
            _: &RemoteRepo,
            _: &Path,
        ) -> std::result::Result<Box<dyn WorkingCopy>, GitError> {
            Err(GitError::Spawn("git disabled in this test".to_string()))
        }
    }

    fn repo() -> RemoteRepo {
        RemoteRepo {
            name: "argocd-config".to_string(),
            url: "https://github.com/acme/argocd-config.git".to_string(),
            credentials: Credentials::anonymous(),
        }
    }

    fn waiting(max_attempts: u32) -> MergePolicy {
        MergePolicy {
            wait: Some(WaitPolicy {
                max_attempts,
                interval: Duration::from_secs(10),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_clean_pull_request_is_merged() {
        let tmp = TempDir::new().unwrap();
        let hosting = ScriptedHosting::new(&[(MergeState::Clean, false)]);
        let merger = PullRequestMerger::new(&NoGit, &hosting, tmp.path());

        merger.merge(&repo(), 3, &MergePolicy::default(), None).await.unwrap();
        assert_eq!(*hosting.merge_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_already_merged_is_noop() {
        let tmp = TempDir::new().unwrap();
        let hosting = ScriptedHosting::new(&[(MergeState::Unknown, true)]);
        let merger = PullRequestMerger::new(&NoGit, &hosting, tmp.path());

        merger.merge(&repo(), 3, &MergePolicy::default(), None).await.unwrap();
        assert_eq!(*hosting.merge_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_blocked_without_wait_fails_immediately() {
        let tmp = TempDir::new().unwrap();
        let hosting = ScriptedHosting::new(&[(MergeState::Blocked, false)]);
        let merger = PullRequestMerger::new(&NoGit, &hosting, tmp.path());

        let err = merger
            .merge(&repo(), 4, &MergePolicy::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PropagateError::MergeBlocked {
                pull_number: 4,
                attempts: 1
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_then_clean_with_wait() {
        let tmp = TempDir::new().unwrap();
        let hosting = ScriptedHosting::new(&[
            (MergeState::Blocked, false),
            (MergeState::Blocked, false),
            (MergeState::Clean, false),
        ]);
        let merger = PullRequestMerger::new(&NoGit, &hosting, tmp.path());

        let start = tokio::time::Instant::now();
        merger.merge(&repo(), 5, &waiting(30), None).await.unwrap();

        assert_eq!(*hosting.get_calls.lock().unwrap(), 3);
        assert_eq!(*hosting.merge_calls.lock().unwrap(), 1);
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_bounded() {
        let tmp = TempDir::new().unwrap();
        let hosting = ScriptedHosting::new(&[(MergeState::Blocked, false)]);
        let merger = PullRequestMerger::new(&NoGit, &hosting, tmp.path());

        let err = merger.merge(&repo(), 6, &waiting(4), None).await.unwrap_err();
        assert!(matches!(err, PropagateError::MergeBlocked { attempts: 4, .. }));
        assert_eq!(*hosting.get_calls.lock().unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_state_polls_without_explicit_wait() {
        let tmp = TempDir::new().unwrap();
        let hosting = ScriptedHosting::new(&[(MergeState::Unknown, false), (MergeState::Clean, false)]);
        let merger = PullRequestMerger::new(&NoGit, &hosting, tmp.path());

        merger.merge(&repo(), 7, &MergePolicy::default(), None).await.unwrap();
        assert_eq!(*hosting.merge_calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_merge_is_retried_when_waiting() {
        let tmp = TempDir::new().unwrap();
        let hosting = ScriptedHosting::new(&[(MergeState::Clean, false)]);
        hosting.merge_results.lock().unwrap().push_back(Err(405));
        let merger = PullRequestMerger::new(&NoGit, &hosting, tmp.path());

        merger.merge(&repo(), 8, &waiting(3), None).await.unwrap();
        assert_eq!(*hosting.merge_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_hard_merge_failure_propagates() {
        let tmp = TempDir::new().unwrap();
        let hosting = ScriptedHosting::new(&[(MergeState::Clean, false)]);
        hosting.merge_results.lock().unwrap().push_back(Err(403));
        let merger = PullRequestMerger::new(&NoGit, &hosting, tmp.path());

        let err = merger
            .merge(&repo(), 9, &waiting(3), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PropagateError::Hosting(HostingError::Status { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn test_update_failure_cleans_checkout() {
        let tmp = TempDir::new().unwrap();
        let hosting = ScriptedHosting::new(&[(MergeState::Dirty, false)]);
        let merger = PullRequestMerger::new(&NoGit, &hosting, tmp.path());

        let err = merger
            .merge(&repo(), 10, &MergePolicy::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PropagateError::Git(GitError::Spawn(_))));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
