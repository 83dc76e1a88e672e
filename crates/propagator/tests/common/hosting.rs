//! In-memory pull-request provider backed by the bare repositories themselves.
//!
//! Mergeability is computed with a trial merge in a scratch clone, and a merge
//! really lands on the base branch, so conflict handling runs end to end.

#![allow(dead_code)]

use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::TempDir;

use propagator::error::HostingError;
use propagator::git::RemoteRepo;
use propagator::hosting::{MergeMethod, MergeState, NewPullRequest, PullRequest, PullRequestClient};

#[derive(Debug, Clone)]
pub struct PullRecord {
    pub number: u64,
    pub repo_url: String,
    pub title: String,
    pub head: String,
    pub base: String,
    pub merged: bool,
}

#[derive(Default)]
pub struct FakeHosting {
    pulls: Mutex<Vec<PullRecord>>,
}

impl FakeHosting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pulls(&self) -> Vec<PullRecord> {
        self.pulls.lock().unwrap().clone()
    }

    pub fn pull(&self, number: u64) -> PullRecord {
        self.pulls()
            .into_iter()
            .find(|p| p.number == number)
            .unwrap_or_else(|| panic!("no pull request #{}", number))
    }

    fn record(&self, repo: &RemoteRepo, number: u64) -> Result<PullRecord, HostingError> {
        self.pulls
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.number == number && p.repo_url == repo.url)
            .cloned()
            .ok_or(HostingError::NotFound(number))
    }

    fn to_pull_request(record: &PullRecord, state: MergeState) -> PullRequest {
        PullRequest {
            number: record.number,
            url: format!("{}/pull/{}", record.repo_url, record.number),
            head: record.head.clone(),
            base: record.base.clone(),
            merged: record.merged,
            state,
        }
    }
}

#[async_trait]
impl PullRequestClient for FakeHosting {
    async fn create_pull_request(
        &self,
        repo: &RemoteRepo,
        pr: &NewPullRequest,
    ) -> Result<PullRequest, HostingError> {
        let mut pulls = self.pulls.lock().unwrap();
        let record = PullRecord {
            number: pulls.len() as u64 + 1,
            repo_url: repo.url.clone(),
            title: pr.title.clone(),
            head: pr.head.clone(),
            base: pr.base.clone(),
            merged: false,
        };
        pulls.push(record.clone());
        Ok(Self::to_pull_request(&record, MergeState::Unknown))
    }

    async fn get_pull_request(
        &self,
        repo: &RemoteRepo,
        number: u64,
    ) -> Result<PullRequest, HostingError> {
        let record = self.record(repo, number)?;
        if record.merged {
            return Ok(Self::to_pull_request(&record, MergeState::Clean));
        }

        let scratch = TempDir::new().unwrap();
        let wc = clone_into(&record.repo_url, scratch.path());
        git(&wc, &["checkout", "--quiet", "-B", &record.head, &format!("origin/{}", record.head)]);
        let merges = try_git(
            &wc,
            &["merge", "--quiet", "--no-commit", "--no-ff", &format!("origin/{}", record.base)],
        );
        let state = if merges {
            MergeState::Clean
        } else {
            MergeState::Dirty
        };
        Ok(Self::to_pull_request(&record, state))
    }

    async fn merge_pull_request(
        &self,
        repo: &RemoteRepo,
        number: u64,
        _method: MergeMethod,
    ) -> Result<(), HostingError> {
        let record = self.record(repo, number)?;

        let scratch = TempDir::new().unwrap();
        let wc = clone_into(&record.repo_url, scratch.path());
        git(&wc, &["checkout", "--quiet", "-B", &record.base, &format!("origin/{}", record.base)]);
        let message = format!("Merge pull request #{}", number);
        if !try_git(
            &wc,
            &["merge", "--quiet", "--no-ff", "-m", &message, &format!("origin/{}", record.head)],
        ) {
            return Err(HostingError::Status {
                status: 405,
                url: record.repo_url.clone(),
                body: "Pull Request is not mergeable".to_string(),
            });
        }
        git(&wc, &["push", "--quiet", "origin", &format!("HEAD:refs/heads/{}", record.base)]);

        let mut pulls = self.pulls.lock().unwrap();
        if let Some(pull) = pulls
            .iter_mut()
            .find(|p| p.number == number && p.repo_url == repo.url)
        {
            pull.merged = true;
        }
        Ok(())
    }
}

fn clone_into(url: &str, scratch: &Path) -> std::path::PathBuf {
    let wc = scratch.join("wc");
    let status = Command::new("git")
        .args(["clone", "--quiet", url])
        .arg(&wc)
        .status()
        .unwrap();
    assert!(status.success(), "clone of {} failed", url);
    wc
}

fn command(wc: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(wc)
        .args([
            "-c",
            "user.name=Hosting",
            "-c",
            "user.email=hosting@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args);
    cmd
}

fn try_git(wc: &Path, args: &[&str]) -> bool {
    command(wc, args).output().unwrap().status.success()
}

fn git(wc: &Path, args: &[&str]) {
    let output = command(wc, args).output().unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}
