//! Populate and delete entry points.
//!
//! A run walks `ResolveInputs → PublishPayload → PublishControl →
//! [MergePayload → MergeControl]` (delete skips the payload stages). Every
//! publisher works in its own transient checkout that is removed on all exit
//! paths; nothing pushed is ever rolled back.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, info_span, Instrument};

use crate::checkout::LocalCheckout;
use crate::config::{Config, ConfigResolver, LayerConfig, MergeDefaults, StaticConfigResolver};
use crate::content::{ContentFetcher, DefaultContentFetcher};
use crate::error::{PropagateError, Result};
use crate::git::{CliGitClient, GitClient, RemoteRepo, WorkingCopy};
use crate::hosting::{GitHubClient, PullRequestClient};
use crate::merge::{MergePolicy, PullRequestMerger};
use crate::progress::{Operation, ProgressBroadcaster, RunEvent, RunTracker, Stage};
use crate::publish::control::ControlLayout;
use crate::publish::{ControlPublisher, PayloadPublisher, PayloadReference, PublishResult};
use crate::request::ChangeRequest;
use crate::resolver::IndexEdit;
use crate::sanitize::redact_repo_url;
use crate::throttle::Throttle;

/// Shared flag checked between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulateOutcome {
    pub payload: PublishResult,
    pub control: PublishResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub control: PublishResult,
}

/// Resolved inputs of one run.
struct RunInputs {
    layer: LayerConfig,
    payload_remote: RemoteRepo,
    control_remote: RemoteRepo,
    defaults: MergeDefaults,
}

pub struct Orchestrator {
    git: Arc<dyn GitClient>,
    hosting: Arc<dyn PullRequestClient>,
    config: Arc<dyn ConfigResolver>,
    content: Arc<dyn ContentFetcher>,
    workdir: PathBuf,
    progress: ProgressBroadcaster,
    cancel: CancelHandle,
}

impl Orchestrator {
    pub fn new(
        git: Arc<dyn GitClient>,
        hosting: Arc<dyn PullRequestClient>,
        config: Arc<dyn ConfigResolver>,
        content: Arc<dyn ContentFetcher>,
        workdir: PathBuf,
    ) -> Self {
        Self {
            git,
            hosting,
            config,
            content,
            workdir,
            progress: ProgressBroadcaster::default(),
            cancel: CancelHandle::new(),
        }
    }

    /// Production constructor: git CLI, GitHub API and the default content fetcher.
    pub fn from_config(config: Config) -> Result<Self> {
        let resolver = StaticConfigResolver::new(config);
        let git = CliGitClient::new(resolver.git_identity());
        let hosting = GitHubClient::new(resolver.config().hosting.api_url.as_deref())?;
        let content = DefaultContentFetcher::new()?;
        let workdir = resolver.config().workdir();

        Ok(Self::new(
            Arc::new(git),
            Arc::new(hosting),
            Arc::new(resolver),
            Arc::new(content),
            workdir,
        ))
    }

    /// Publishes run events to `progress` instead of a private channel.
    pub fn with_progress(mut self, progress: ProgressBroadcaster) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.progress.subscribe()
    }

    /// Publishes payload and control, then merges both when auto-merge is on.
    pub async fn populate(&self, request: &ChangeRequest) -> Result<PopulateOutcome> {
        let tracker = self.progress.start_run(Operation::Populate, &request.component);
        let span = info_span!("populate",
            run_id = %tracker.run_id(),
            component = %request.component,
            namespace = %request.namespace,
            layer = %request.layer,
        );

        let result = self.run_populate(request, &tracker).instrument(span).await;
        finish(&tracker, &result);
        result
    }

    /// Removes the application from the control repository.
    pub async fn delete(&self, request: &ChangeRequest) -> Result<DeleteOutcome> {
        let tracker = self.progress.start_run(Operation::Delete, &request.component);
        let span = info_span!("delete",
            run_id = %tracker.run_id(),
            component = %request.component,
            namespace = %request.namespace,
            layer = %request.layer,
        );

        let result = self.run_delete(request, &tracker).instrument(span).await;
        finish(&tracker, &result);
        result
    }

    async fn run_populate(
        &self,
        request: &ChangeRequest,
        tracker: &RunTracker,
    ) -> Result<PopulateOutcome> {
        self.enter(tracker, Stage::ResolveInputs, "Resolving layer configuration")?;
        if request.content.is_none() {
            return Err(PropagateError::InvalidRequest(format!(
                "populate of '{}' needs a content source",
                request.component
            )));
        }
        let inputs = self.resolve_inputs(request)?;

        self.enter(tracker, Stage::PublishPayload, "Publishing payload")?;
        let publisher = PayloadPublisher::new(self.hosting.as_ref(), self.content.as_ref());
        let (checkout, wc) = self.open_checkout(&inputs.payload_remote).await?;
        let published = publisher
            .publish(wc.as_ref(), &inputs.payload_remote, request, &inputs.layer.payload)
            .instrument(info_span!("publish_payload", repository = %inputs.payload_remote.name))
            .await;
        close_checkout(checkout, wc, &inputs.payload_remote, &published);
        let (payload, materialized) = published?;
        report_published(tracker, Stage::PublishPayload, &payload);

        self.enter(tracker, Stage::PublishControl, "Publishing control")?;
        let reference = PayloadReference {
            repo_url: inputs.payload_remote.url.clone(),
            path: payload.path.clone(),
            branch: PayloadPublisher::base_branch(request, &inputs.layer.payload).to_string(),
            content: materialized,
        };
        let publisher = ControlPublisher::new(self.hosting.as_ref());
        let (checkout, wc) = self.open_checkout(&inputs.control_remote).await?;
        let published = publisher
            .publish(
                wc.as_ref(),
                &inputs.control_remote,
                request,
                &inputs.layer.control,
                &reference,
            )
            .instrument(info_span!("publish_control", repository = %inputs.control_remote.name))
            .await;
        close_checkout(checkout, wc, &inputs.control_remote, &published);
        let control = published?;
        report_published(tracker, Stage::PublishControl, &control);

        if request.auto_merge {
            let policy = merge_policy(request, &inputs.defaults);
            let merger = PullRequestMerger::new(self.git.as_ref(), self.hosting.as_ref(), &self.workdir);

            if let Some(pull_number) = payload.pull_number {
                self.enter(tracker, Stage::MergePayload, "Merging payload pull request")?;
                merger
                    .merge(&inputs.payload_remote, pull_number, &policy, None)
                    .instrument(info_span!("merge_payload", pull_number))
                    .await?;
            }

            if let Some(pull_number) = control.pull_number {
                self.enter(tracker, Stage::MergeControl, "Merging control pull request")?;
                let resolver =
                    ControlLayout::new(request, &inputs.layer.control).conflict_resolver(IndexEdit::Add);
                merger
                    .merge(&inputs.control_remote, pull_number, &policy, Some(&resolver))
                    .instrument(info_span!("merge_control", pull_number))
                    .await?;
            }
        }

        info!(
            payload_pull = ?payload.pull_number,
            control_pull = ?control.pull_number,
            "Populate finished"
        );
        Ok(PopulateOutcome { payload, control })
    }

    async fn run_delete(&self, request: &ChangeRequest, tracker: &RunTracker) -> Result<DeleteOutcome> {
        self.enter(tracker, Stage::ResolveInputs, "Resolving layer configuration")?;
        let inputs = self.resolve_inputs(request)?;

        self.enter(tracker, Stage::PublishControl, "Removing application")?;
        let publisher = ControlPublisher::new(self.hosting.as_ref());
        let (checkout, wc) = self.open_checkout(&inputs.control_remote).await?;
        let published = publisher
            .delete(wc.as_ref(), &inputs.control_remote, request, &inputs.layer.control)
            .instrument(info_span!("delete_control", repository = %inputs.control_remote.name))
            .await;
        close_checkout(checkout, wc, &inputs.control_remote, &published);
        let control = published?;
        report_published(tracker, Stage::PublishControl, &control);

        if let (true, Some(pull_number)) = (request.auto_merge, control.pull_number) {
            self.enter(tracker, Stage::MergeControl, "Merging control pull request")?;
            let policy = merge_policy(request, &inputs.defaults);
            let merger = PullRequestMerger::new(self.git.as_ref(), self.hosting.as_ref(), &self.workdir);
            let resolver =
                ControlLayout::new(request, &inputs.layer.control).conflict_resolver(IndexEdit::Remove);
            merger
                .merge(&inputs.control_remote, pull_number, &policy, Some(&resolver))
                .instrument(info_span!("merge_control", pull_number))
                .await?;
        }

        info!(file_change = ?control.file_change, control_pull = ?control.pull_number, "Delete finished");
        Ok(DeleteOutcome { control })
    }

    fn resolve_inputs(&self, request: &ChangeRequest) -> Result<RunInputs> {
        let layer = self.config.layer(request.layer)?;
        let payload_remote = self.config.remote(&layer.payload)?;
        let control_remote = self.config.remote(&layer.control)?;
        Ok(RunInputs {
            layer,
            payload_remote,
            control_remote,
            defaults: self.config.merge_defaults(),
        })
    }

    /// Checks for cancellation, then reports the stage.
    fn enter(&self, tracker: &RunTracker, stage: Stage, message: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!(stage = %stage, "Run cancelled");
            return Err(PropagateError::Cancelled { stage });
        }
        tracker.stage(stage, message);
        Ok(())
    }

    /// Reserves a checkout directory and clones `remote` into it.
    async fn open_checkout(
        &self,
        remote: &RemoteRepo,
    ) -> Result<(LocalCheckout, Box<dyn WorkingCopy>)> {
        let checkout =
            LocalCheckout::reserve(&self.workdir, &remote.name).map_err(|e| PropagateError::Checkout {
                path: self.workdir.clone(),
                source: e,
            })?;

        match self.git.clone_repo(remote, checkout.path()).await {
            Ok(wc) => Ok((checkout, wc)),
            Err(e) => {
                error!(repository = %redact_repo_url(&remote.url), error = %e, "Clone failed");
                Err(e.into())
            }
        }
    }
}

fn merge_policy(request: &ChangeRequest, defaults: &MergeDefaults) -> MergePolicy {
    MergePolicy {
        method: defaults.method,
        throttle: Throttle::when(request.rate_limited, defaults.rate_limit),
        wait: request.wait_for_blocked_merge.then_some(defaults.wait),
    }
}

/// Drops the working copy and removes its directory, logging a failed publish.
fn close_checkout<T>(
    checkout: LocalCheckout,
    wc: Box<dyn WorkingCopy>,
    remote: &RemoteRepo,
    published: &Result<T>,
) {
    drop(wc);
    checkout.remove();
    if let Err(e) = published {
        error!(repository = %redact_repo_url(&remote.url), error = %e, "Publish failed");
    }
}

fn report_published(tracker: &RunTracker, stage: Stage, result: &PublishResult) {
    match &result.pull_url {
        Some(url) => tracker.stage_with_url(stage, "Pull request opened", url),
        None => tracker.stage(stage, "Nothing to publish"),
    }
}

fn finish<T>(tracker: &RunTracker, result: &Result<T>) {
    match result {
        Ok(_) => tracker.completed(),
        Err(e) => tracker.failed(&e.to_string()),
    }
}
