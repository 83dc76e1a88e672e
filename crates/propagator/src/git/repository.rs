//! `git` CLI implementation of [`GitClient`] and [`WorkingCopy`].

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::auth::build_auth_env;
use super::error::{classify_git_error, GitError};
use super::parse::{format_git_error, has_changes, parse_conflicted_files};
use super::types::*;
use super::{GitClient, WorkingCopy};
use crate::sanitize::redact_repo_url;

/// Maximum number of retries for transient errors.
const MAX_RETRIES: u32 = 3;
/// Base delay for exponential backoff (in seconds).
const RETRY_BASE_DELAY_SECS: u64 = 2;

/// Drives the `git` binary found on `PATH`.
#[derive(Debug, Clone)]
pub struct CliGitClient {
    identity: GitIdentity,
    retry_base_delay: Duration,
}

impl CliGitClient {
    pub fn new(identity: GitIdentity) -> Self {
        Self {
            identity,
            retry_base_delay: Duration::from_secs(RETRY_BASE_DELAY_SECS),
        }
    }

    /// Overrides the backoff base; retries wait `base`, `2*base`, `4*base`.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn identity(&self) -> &GitIdentity {
        &self.identity
    }
}

impl Default for CliGitClient {
    fn default() -> Self {
        Self::new(GitIdentity::default())
    }
}

#[async_trait]
impl GitClient for CliGitClient {
    async fn clone_repo(
        &self,
        remote: &RemoteRepo,
        dest: &Path,
    ) -> Result<Box<dyn WorkingCopy>, GitError> {
        let dest_str = dest.to_string_lossy().to_string();
        let display_url = redact_repo_url(&remote.url);
        let (dest_str, display_url) = (dest_str.as_str(), display_url.as_str());
        let (url, credentials) = (remote.url.as_str(), &remote.credentials);

        with_retry(self.retry_base_delay, "clone", move || async move {
            if dest.exists() {
                // Leftovers of a failed attempt.
                if let Err(e) = tokio::fs::remove_dir_all(dest).await {
                    log::warn!("Failed to remove leftover clone {}: {}", dest.display(), e);
                }
            }
            log::info!("Cloning {} into {}", display_url, dest.display());
            run_remote(None, credentials, &["clone", "--quiet", url, dest_str])
            .await
            .map(|_| ())
        })
        .await?;

        let copy = CliWorkingCopy {
            path: dest.to_path_buf(),
            credentials: remote.credentials.clone(),
            retry_base_delay: self.retry_base_delay,
        };
        copy.git(&["config", "user.name", &self.identity.name]).await?;
        copy.git(&["config", "user.email", &self.identity.email])
            .await?;
        copy.git(&["config", "commit.gpgsign", "false"]).await?;

        Ok(Box::new(copy))
    }
}

/// A clone driven through the `git` CLI.
#[derive(Debug)]
pub struct CliWorkingCopy {
    path: PathBuf,
    credentials: Credentials,
    retry_base_delay: Duration,
}

impl CliWorkingCopy {
    /// Runs a local git command, failing on a non-zero exit.
    async fn git(&self, args: &[&str]) -> Result<String, GitError> {
        let output = run_git(Some(&self.path), args, &[]).await?;
        check(args, &output)
    }

    async fn git_remote(&self, args: &[&str]) -> Result<String, GitError> {
        let command = args.first().copied().unwrap_or("git");
        let (path, credentials) = (self.path.as_path(), &self.credentials);
        with_retry(self.retry_base_delay, command, move || {
            run_remote(Some(path), credentials, args)
        })
        .await
    }

    async fn remote_branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        let reference = format!("refs/remotes/origin/{}", branch);
        let output = run_git(
            Some(&self.path),
            &["rev-parse", "--verify", "--quiet", &reference],
            &[],
        )
        .await?;
        Ok(output.status.success())
    }
}

#[async_trait]
impl WorkingCopy for CliWorkingCopy {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn checkout_branch(&self, new_branch: &str, from_ref: &str) -> Result<(), GitError> {
        if !self.remote_branch_exists(from_ref).await? {
            return Err(GitError::BranchNotFound(from_ref.to_string()));
        }
        let start = format!("origin/{}", from_ref);
        self.git(&["checkout", "--quiet", "-B", new_branch, &start])
            .await?;
        log::debug!("Checked out {} from {}", new_branch, start);
        Ok(())
    }

    async fn commit_and_push(&self, message: &str, branch: &str) -> Result<bool, GitError> {
        self.git(&["add", "-A"]).await?;

        let status = self.git(&["status", "--porcelain"]).await?;
        if !has_changes(&status) {
            log::debug!("Nothing to commit in {}", self.path.display());
            return Ok(false);
        }

        self.git(&["commit", "--quiet", "--no-verify", "-m", message])
            .await?;
        self.push_head(branch).await?;
        Ok(true)
    }

    async fn merge_remote_branch(
        &self,
        branch: &str,
        message: &str,
    ) -> Result<MergeOutcome, GitError> {
        let refspec = format!("+refs/heads/{0}:refs/remotes/origin/{0}", branch);
        self.git_remote(&["fetch", "--quiet", "origin", &refspec])
            .await?;

        let reference = format!("origin/{}", branch);
        let args = ["merge", "--no-ff", "--no-edit", "-m", message, &reference];
        let output = run_git(Some(&self.path), &args, &[]).await?;
        if output.status.success() {
            return Ok(MergeOutcome::clean());
        }

        let unmerged = self
            .git(&["diff", "--name-only", "--diff-filter=U"])
            .await?;
        let conflicts = parse_conflicted_files(&unmerged);
        if conflicts.is_empty() {
            return Err(classify_git_error("merge", &format_git_error(&output)));
        }

        log::info!(
            "Merging {} left {} conflicted file(s): {}",
            reference,
            conflicts.len(),
            conflicts.join(", ")
        );
        Ok(MergeOutcome {
            clean: false,
            conflicts,
        })
    }

    async fn checkout_theirs(&self, file: &str) -> Result<(), GitError> {
        self.git(&["checkout", "--theirs", "--", file]).await.map(|_| ())
    }

    async fn stage(&self, file: &str) -> Result<(), GitError> {
        self.git(&["add", "--", file]).await.map(|_| ())
    }

    async fn commit_staged(&self, message: &str) -> Result<(), GitError> {
        self.git(&["commit", "--quiet", "--no-verify", "--no-edit", "-m", message])
            .await
            .map(|_| ())
    }

    async fn push_head(&self, branch: &str) -> Result<(), GitError> {
        let refspec = format!("HEAD:refs/heads/{}", branch);
        self.git_remote(&["push", "--quiet", "origin", &refspec])
            .await?;
        log::debug!("Pushed {} from {}", branch, self.path.display());
        Ok(())
    }
}

/// Runs git with an auth environment for commands that reach the remote.
async fn run_remote(
    cwd: Option<&Path>,
    credentials: &Credentials,
    args: &[&str],
) -> Result<String, GitError> {
    let auth = build_auth_env(credentials)?;
    let output = run_git(cwd, args, &auth.env_vars).await?;
    // Drop auth env (cleanup guard) after command completes
    drop(auth);
    check(args, &output)
}

async fn run_git(
    cwd: Option<&Path>,
    args: &[&str],
    env: &[(String, String)],
) -> Result<Output, GitError> {
    let mut cmd = Command::new("git");
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env {
        cmd.env(key, value);
    }

    cmd.output()
        .await
        .map_err(|e| GitError::Spawn(e.to_string()))
}

fn check(args: &[&str], output: &Output) -> Result<String, GitError> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let command = args.first().copied().unwrap_or("git");
        Err(classify_git_error(command, &format_git_error(output)))
    }
}

/// Retries transient failures with exponential backoff.
async fn with_retry<T, F, Fut>(base_delay: Duration, command: &str, mut op: F) -> Result<T, GitError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, GitError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                let delay = base_delay * (1 << attempt);
                attempt += 1;
                log::warn!(
                    "git {} failed ({}), retrying (attempt {}/{}) after {:?}",
                    command,
                    e,
                    attempt + 1,
                    MAX_RETRIES + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn sh(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .current_dir(dir)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    /// Bare remote with one commit on `main`.
    fn seeded_remote(root: &Path) -> PathBuf {
        let remote = root.join("remote.git");
        let seed = root.join("seed");
        std::fs::create_dir_all(&remote).unwrap();
        std::fs::create_dir_all(&seed).unwrap();
        sh(&remote, &["init", "--quiet", "--bare", "--initial-branch=main"]);
        sh(&seed, &["init", "--quiet", "--initial-branch=main"]);
        sh(&seed, &["config", "user.name", "Seed"]);
        sh(&seed, &["config", "user.email", "seed@example.com"]);
        sh(&seed, &["config", "commit.gpgsign", "false"]);
        std::fs::write(seed.join("README.md"), "seed\n").unwrap();
        sh(&seed, &["add", "-A"]);
        sh(&seed, &["commit", "--quiet", "-m", "seed"]);
        sh(&seed, &["remote", "add", "origin", remote.to_str().unwrap()]);
        sh(&seed, &["push", "--quiet", "origin", "main"]);
        remote
    }

    fn remote_repo(path: &Path) -> RemoteRepo {
        RemoteRepo {
            name: "payload".to_string(),
            url: path.to_string_lossy().to_string(),
            credentials: Credentials::anonymous(),
        }
    }

    #[tokio::test]
    async fn test_clone_branch_commit_push() {
        let tmp = TempDir::new().unwrap();
        let remote = seeded_remote(tmp.path());
        let client = CliGitClient::default();

        let wc = client
            .clone_repo(&remote_repo(&remote), &tmp.path().join("wc"))
            .await
            .unwrap();
        wc.checkout_branch("api-payload-1", "main").await.unwrap();

        assert!(!wc.commit_and_push("noop", "api-payload-1").await.unwrap());

        std::fs::write(wc.path().join("app.yaml"), "a: 1\n").unwrap();
        assert!(wc.commit_and_push("add app", "api-payload-1").await.unwrap());

        let refs = std::process::Command::new("git")
            .current_dir(&remote)
            .args(["branch", "--list", "api-payload-1"])
            .output()
            .unwrap();
        assert!(String::from_utf8_lossy(&refs.stdout).contains("api-payload-1"));
    }

    #[tokio::test]
    async fn test_checkout_missing_base_branch() {
        let tmp = TempDir::new().unwrap();
        let remote = seeded_remote(tmp.path());
        let wc = CliGitClient::default()
            .clone_repo(&remote_repo(&remote), &tmp.path().join("wc"))
            .await
            .unwrap();

        let err = wc.checkout_branch("x", "does-not-exist").await.unwrap_err();
        assert!(matches!(err, GitError::BranchNotFound(b) if b == "does-not-exist"));
    }

    #[tokio::test]
    async fn test_clone_missing_remote_fails() {
        let tmp = TempDir::new().unwrap();
        let result = CliGitClient::default()
            .with_retry_base_delay(Duration::from_millis(1))
            .clone_repo(
                &remote_repo(&tmp.path().join("nope.git")),
                &tmp.path().join("wc"),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), GitError> = with_retry(Duration::from_millis(1), "fetch", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(GitError::Network("connection refused".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_permanent_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), GitError> = with_retry(Duration::from_millis(1), "push", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(GitError::AuthFailed("denied".to_string()))
        })
        .await;

        assert!(matches!(result, Err(GitError::AuthFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
