//! Control Publisher: ArgoCD application files and the shared overlay index.

use std::path::Path;

use crate::config::RepoLayerConfig;
use crate::content::Materialized;
use crate::error::{ContentError, PropagateError, Result};
use crate::git::{RemoteRepo, WorkingCopy};
use crate::hosting::PullRequestClient;
use crate::kustomize::{add_resource, remove_resource, INDEX_FILE_NAME};
use crate::manifest::{self, ApplicationDescriptor, DEFAULT_PROJECT};
use crate::naming::{application_entry, application_name, branch_name, random_suffix};
use crate::publish::{open_pull_request, repo_path, PublishResult};
use crate::request::ChangeRequest;
use crate::resolver::{IndexConflictResolver, IndexEdit};
use crate::sanitize::redact_repo_url;

/// Where the payload for an application lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadReference {
    pub repo_url: String,
    pub path: String,
    /// Revision ArgoCD tracks.
    pub branch: String,
    pub content: Materialized,
}

/// Repository-relative locations touched for one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlLayout {
    pub application_name: String,
    /// Overlay directory, `<basePath>/cluster/<server>`.
    pub overlay: String,
    pub index_file: String,
    /// Index entry, relative to the overlay.
    pub entry: String,
    pub application_file: String,
}

impl ControlLayout {
    pub fn new(request: &ChangeRequest, location: &RepoLayerConfig) -> Self {
        let application_name = application_name(
            &request.namespace,
            &request.component,
            request.branch.as_deref(),
        );
        let overlay = repo_path(&[
            &location.base_path,
            "cluster",
            request.server_or_default(),
        ]);
        let entry = application_entry(request.layer.as_str(), &application_name);
        Self {
            index_file: repo_path(&[&overlay, INDEX_FILE_NAME]),
            application_file: repo_path(&[&overlay, &entry]),
            application_name,
            overlay,
            entry,
        }
    }

    /// Resolver re-applying this layout's index edit during a later merge.
    pub fn conflict_resolver(&self, edit: IndexEdit) -> IndexConflictResolver {
        IndexConflictResolver::new(self.index_file.clone(), self.entry.clone(), edit)
    }
}

pub struct ControlPublisher<'a> {
    hosting: &'a dyn PullRequestClient,
}

impl<'a> ControlPublisher<'a> {
    pub fn new(hosting: &'a dyn PullRequestClient) -> Self {
        Self { hosting }
    }

    /// Writes the application file, registers it in the overlay index and
    /// opens a pull request when either changed.
    pub async fn publish(
        &self,
        working_copy: &dyn WorkingCopy,
        remote: &RemoteRepo,
        request: &ChangeRequest,
        location: &RepoLayerConfig,
        payload: &PayloadReference,
    ) -> Result<PublishResult> {
        let layout = ControlLayout::new(request, location);
        let base = location.base_branch.as_str();
        let branch = branch_name(&request.component, "config", &random_suffix());

        tracing::info!(
            repository = %redact_repo_url(&remote.url),
            application = %layout.application_name,
            index = %layout.index_file,
            branch = %branch,
            "Publishing control"
        );

        working_copy.checkout_branch(&branch, base).await?;

        let descriptor = ApplicationDescriptor {
            name: layout.application_name.clone(),
            namespace: request.namespace.clone(),
            project: DEFAULT_PROJECT.to_string(),
            source_repo_url: payload.repo_url.clone(),
            source_path: payload.path.clone(),
            source_branch: payload.branch.clone(),
            destination_name: request.server_name.clone(),
            is_helm: payload.content.is_helm,
            value_files: payload.content.value_files.clone(),
            release_name: payload.content.release_name.clone(),
            ignore_differences: request.ignore_differences.clone(),
            cascading_delete: request.cascading_delete,
        };
        let rendered = manifest::build(&descriptor)?;
        write_file(&working_copy.path().join(&layout.application_file), &rendered)?;

        let index_path = working_copy.path().join(&layout.index_file);
        let added = add_resource(&index_path, &layout.entry)?;
        tracing::debug!(entry = %layout.entry, added, "Updated overlay index");

        let message = format!(
            "Add application {} ({})",
            layout.application_name, request.layer
        );
        let pushed = working_copy.commit_and_push(&message, &branch).await?;

        let mut result = PublishResult {
            path: layout.overlay.clone(),
            url: remote.url.clone(),
            branch: base.to_string(),
            pull_number: None,
            pull_url: None,
            application_file: Some(layout.application_file.clone()),
            file_change: None,
        };

        if !pushed {
            tracing::info!(application = %layout.application_name, "Control unchanged, nothing to publish");
            return Ok(result);
        }

        let pr = open_pull_request(
            self.hosting,
            remote,
            message,
            format!(
                "Deploys `{}` from `{}` (`{}`) into namespace `{}`.",
                layout.application_name, payload.path, payload.branch, request.namespace
            ),
            &branch,
            base,
        )
        .await?;

        result.branch = branch;
        result.pull_number = Some(pr.number);
        result.pull_url = Some(pr.url);
        Ok(result)
    }

    /// Removes the application file and its index entry.
    ///
    /// Short-circuits with `file_change = false` and no pull request when the
    /// application is already gone.
    pub async fn delete(
        &self,
        working_copy: &dyn WorkingCopy,
        remote: &RemoteRepo,
        request: &ChangeRequest,
        location: &RepoLayerConfig,
    ) -> Result<PublishResult> {
        let layout = ControlLayout::new(request, location);
        let base = location.base_branch.as_str();
        let branch = branch_name(&request.component, "config", &random_suffix());

        tracing::info!(
            repository = %redact_repo_url(&remote.url),
            application = %layout.application_name,
            index = %layout.index_file,
            branch = %branch,
            "Deleting application"
        );

        working_copy.checkout_branch(&branch, base).await?;

        let index_path = working_copy.path().join(&layout.index_file);
        let removed_entry = remove_resource(&index_path, &layout.entry)?;
        let removed_file = remove_file(&working_copy.path().join(&layout.application_file))?;

        let mut result = PublishResult {
            path: layout.overlay.clone(),
            url: remote.url.clone(),
            branch: base.to_string(),
            pull_number: None,
            pull_url: None,
            application_file: Some(layout.application_file.clone()),
            file_change: Some(false),
        };

        if !removed_entry && !removed_file {
            tracing::info!(application = %layout.application_name, "Application already absent, nothing to delete");
            return Ok(result);
        }

        let message = format!(
            "Remove application {} ({})",
            layout.application_name, request.layer
        );
        result.file_change = Some(true);

        if !working_copy.commit_and_push(&message, &branch).await? {
            return Ok(result);
        }

        let pr = open_pull_request(
            self.hosting,
            remote,
            message,
            format!(
                "Removes `{}` from `{}`.",
                layout.application_name, layout.index_file
            ),
            &branch,
            base,
        )
        .await?;

        result.branch = branch;
        result.pull_number = Some(pr.number);
        result.pull_url = Some(pr.url);
        Ok(result)
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    let io_error = |source| {
        PropagateError::Content(ContentError::Io {
            path: path.to_path_buf(),
            source,
        })
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, content).map_err(io_error)
}

fn remove_file(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PropagateError::Content(ContentError::Io {
            path: path.to_path_buf(),
            source: e,
        })),
    }
}
