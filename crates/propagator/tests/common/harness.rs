//! Test harness for isolated end-to-end runs.
//!
//! The `TestHarness` owns a temporary directory containing:
//! - bare `payload.git` and `control.git` remotes seeded on `main`
//! - a content directory for the component being populated
//! - the orchestrator's checkout workdir

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;

use propagator::config::load_config_from_str;
use propagator::content::DefaultContentFetcher;
use propagator::git::{CliGitClient, Credentials, RemoteRepo};
use propagator::{ChangeRequest, Layer, Orchestrator, StaticConfigResolver};

use super::hosting::FakeHosting;

/// Index committed to the control repository before any test runs.
pub const SEED_INDEX: &str = "apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\nresources:\n- applications/dev-legacy.yaml\n";

pub struct TestHarness {
    temp_dir: TempDir,
    pub payload_remote: PathBuf,
    pub control_remote: PathBuf,
    pub content_dir: PathBuf,
    pub workdir: PathBuf,
    pub hosting: Arc<FakeHosting>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let payload_remote = seed_remote(base, "payload", &[("README.md", "payload\n")]);
        let control_remote = seed_remote(
            base,
            "control",
            &[
                ("README.md", "control\n"),
                ("cluster/default/kustomization.yaml", SEED_INDEX),
            ],
        );

        let content_dir = base.join("content");
        std::fs::create_dir_all(&content_dir).unwrap();
        std::fs::write(
            content_dir.join("deployment.yaml"),
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: api\n",
        )
        .unwrap();

        let workdir = base.join("work");

        Self {
            temp_dir,
            payload_remote,
            control_remote,
            content_dir,
            workdir,
            hosting: Arc::new(FakeHosting::new()),
        }
    }

    pub fn config_yaml(&self) -> String {
        format!(
            r#"
repositories:
  payload:
    url: '{payload}'
  argocd-config:
    url: '{control}'
layers:
  applications:
    payload:
      repository: payload
      basePath: apps
    control:
      repository: argocd-config
workdir: '{workdir}'
"#,
            payload = self.payload_remote.display(),
            control = self.control_remote.display(),
            workdir = self.workdir.display(),
        )
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let config = load_config_from_str(&self.config_yaml()).expect("harness config is valid");
        Orchestrator::new(
            Arc::new(CliGitClient::default()),
            self.hosting.clone(),
            Arc::new(StaticConfigResolver::new(config)),
            Arc::new(DefaultContentFetcher::new().unwrap()),
            self.workdir.clone(),
        )
    }

    /// Request populating `component` in `dev` from the harness content directory.
    pub fn request(&self, component: &str) -> propagator::request::ChangeRequestBuilder {
        ChangeRequest::builder(component, "dev", Layer::Applications).directory(&self.content_dir)
    }

    pub fn payload_repo(&self) -> RemoteRepo {
        RemoteRepo {
            name: "payload".to_string(),
            url: self.payload_remote.to_string_lossy().to_string(),
            credentials: Credentials::anonymous(),
        }
    }

    pub fn control_repo(&self) -> RemoteRepo {
        RemoteRepo {
            name: "argocd-config".to_string(),
            url: self.control_remote.to_string_lossy().to_string(),
            credentials: Credentials::anonymous(),
        }
    }

    /// File content at `branch:path` in a bare remote, if present.
    pub fn read_file(&self, remote: &Path, branch: &str, path: &str) -> Option<String> {
        let output = Command::new("git")
            .arg("--git-dir")
            .arg(remote)
            .args(["show", &format!("{}:{}", branch, path)])
            .output()
            .unwrap();
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub fn branches(&self, remote: &Path) -> Vec<String> {
        let output = Command::new("git")
            .arg("--git-dir")
            .arg(remote)
            .args(["for-each-ref", "--format=%(refname:short)", "refs/heads"])
            .output()
            .unwrap();
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Leftover entries in the checkout workdir.
    pub fn leftover_checkouts(&self) -> usize {
        std::fs::read_dir(&self.workdir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

/// Resource entries of the index text, in order.
pub fn index_resources(index: &str) -> Vec<String> {
    let value: serde_yaml::Value = serde_yaml::from_str(index).unwrap();
    value["resources"]
        .as_sequence()
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn seed_remote(base: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let remote = base.join(format!("{}.git", name));
    let seed = base.join(format!("{}-seed", name));
    std::fs::create_dir_all(&remote).unwrap();
    std::fs::create_dir_all(&seed).unwrap();

    sh(&remote, &["init", "--quiet", "--bare", "--initial-branch=main"]);
    sh(&seed, &["init", "--quiet", "--initial-branch=main"]);
    sh(&seed, &["config", "user.name", "Seed"]);
    sh(&seed, &["config", "user.email", "seed@example.com"]);
    sh(&seed, &["config", "commit.gpgsign", "false"]);
    for (path, content) in files {
        let file = seed.join(path);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(file, content).unwrap();
    }
    sh(&seed, &["add", "-A"]);
    sh(&seed, &["commit", "--quiet", "-m", "seed"]);
    sh(&seed, &["remote", "add", "origin", remote.to_str().unwrap()]);
    sh(&seed, &["push", "--quiet", "origin", "main"]);
    remote
}

fn sh(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .current_dir(dir)
        .args(args)
        .status()
        .unwrap();
    assert!(status.success(), "git {:?} failed", args);
}
