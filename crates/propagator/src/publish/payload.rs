//! Payload Publisher: component content on a fresh branch of the payload repo.

use crate::config::RepoLayerConfig;
use crate::content::{ContentFetcher, Materialized};
use crate::error::{PropagateError, Result};
use crate::git::{RemoteRepo, WorkingCopy};
use crate::hosting::PullRequestClient;
use crate::naming::{branch_name, random_suffix};
use crate::publish::{open_pull_request, payload_path, PublishResult};
use crate::request::ChangeRequest;
use crate::sanitize::redact_repo_url;

pub struct PayloadPublisher<'a> {
    hosting: &'a dyn PullRequestClient,
    content: &'a dyn ContentFetcher,
}

impl<'a> PayloadPublisher<'a> {
    pub fn new(hosting: &'a dyn PullRequestClient, content: &'a dyn ContentFetcher) -> Self {
        Self { hosting, content }
    }

    /// Base branch the payload lands on.
    pub fn base_branch<'r>(request: &'r ChangeRequest, location: &'r RepoLayerConfig) -> &'r str {
        request.branch.as_deref().unwrap_or(&location.base_branch)
    }

    /// Writes the request's content and opens a pull request when it changed
    /// anything. Also returns what the control side needs to reference it.
    pub async fn publish(
        &self,
        working_copy: &dyn WorkingCopy,
        remote: &RemoteRepo,
        request: &ChangeRequest,
        location: &RepoLayerConfig,
    ) -> Result<(PublishResult, Materialized)> {
        let source = request.content.as_ref().ok_or_else(|| {
            PropagateError::InvalidRequest(format!(
                "no content source given for component '{}'",
                request.component
            ))
        })?;

        let path = payload_path(request, &location.base_path);
        let base = Self::base_branch(request, location);
        let branch = branch_name(&request.component, "payload", &random_suffix());

        tracing::info!(
            repository = %redact_repo_url(&remote.url),
            path = %path,
            branch = %branch,
            base = %base,
            "Publishing payload"
        );

        working_copy.checkout_branch(&branch, base).await?;

        let target = working_copy.path().join(&path);
        let materialized = self
            .content
            .materialize(source, &request.component, &target)
            .await?;

        let message = format!(
            "Populate {} in {} ({})",
            request.component, request.namespace, request.layer
        );
        let pushed = working_copy.commit_and_push(&message, &branch).await?;

        if !pushed {
            tracing::info!(path = %path, "Payload unchanged, nothing to publish");
            return Ok((
                PublishResult {
                    path,
                    url: remote.url.clone(),
                    branch: base.to_string(),
                    pull_number: None,
                    pull_url: None,
                    application_file: None,
                    file_change: None,
                },
                materialized,
            ));
        }

        let pr = open_pull_request(
            self.hosting,
            remote,
            message,
            format!(
                "Updates `{}` for component `{}` in namespace `{}`.",
                path, request.component, request.namespace
            ),
            &branch,
            base,
        )
        .await?;

        Ok((
            PublishResult {
                path,
                url: remote.url.clone(),
                branch,
                pull_number: Some(pr.number),
                pull_url: Some(pr.url),
                application_file: None,
                file_change: None,
            },
            materialized,
        ))
    }
}
