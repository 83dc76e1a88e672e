//! Publishers turning a change request into branches and pull requests.

pub mod control;
pub mod payload;

use serde::Serialize;

use crate::git::RemoteRepo;
use crate::hosting::{NewPullRequest, PullRequest, PullRequestClient};
use crate::request::ChangeRequest;

pub use control::{ControlPublisher, PayloadReference};
pub use payload::PayloadPublisher;

/// Outcome of one publisher run.
///
/// A missing `pull_number` means there was nothing to publish; `branch` is
/// then the base branch rather than the throwaway one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    /// Repository-relative path that was written.
    pub path: String,
    /// Repository URL.
    pub url: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_url: Option<String>,
    /// Application file, control publishes only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_file: Option<String>,
    /// Whether the delete changed anything, deletes only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_change: Option<bool>,
}

impl PublishResult {
    pub fn is_noop(&self) -> bool {
        self.pull_number.is_none()
    }
}

/// Joins repository-relative segments with `/`, skipping empty ones.
pub fn repo_path(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Payload target directory for a request under `base_path`.
pub fn payload_path(request: &ChangeRequest, base_path: &str) -> String {
    match request.application_path.as_deref() {
        Some(path) => repo_path(&[base_path, path]),
        None if request.namespace_scope => repo_path(&[base_path, &request.namespace]),
        None => repo_path(&[base_path, &request.namespace, &request.component]),
    }
}

/// Opens a pull request from `head` into `base`.
pub(crate) async fn open_pull_request(
    hosting: &dyn PullRequestClient,
    remote: &RemoteRepo,
    title: String,
    body: String,
    head: &str,
    base: &str,
) -> crate::error::Result<PullRequest> {
    let pr = hosting
        .create_pull_request(
            remote,
            &NewPullRequest {
                title,
                head: head.to_string(),
                base: base.to_string(),
                body,
            },
        )
        .await?;
    tracing::info!(pull_number = pr.number, url = %pr.url, head, base, "Opened pull request");
    Ok(pr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Layer;

    #[test]
    fn test_repo_path() {
        assert_eq!(repo_path(&["", "cluster", "default"]), "cluster/default");
        assert_eq!(repo_path(&["/apps/", "dev", "api"]), "apps/dev/api");
    }

    #[test]
    fn test_payload_path_variants() {
        let component = ChangeRequest::builder("api", "dev", Layer::Applications)
            .build()
            .unwrap();
        assert_eq!(payload_path(&component, "apps"), "apps/dev/api");

        let namespace = ChangeRequest::builder("api", "dev", Layer::Applications)
            .namespace_scope(true)
            .build()
            .unwrap();
        assert_eq!(payload_path(&namespace, ""), "dev");

        let custom = ChangeRequest::builder("api", "dev", Layer::Applications)
            .application_path("custom/api-v2")
            .build()
            .unwrap();
        assert_eq!(payload_path(&custom, "apps"), "apps/custom/api-v2");
    }
}
