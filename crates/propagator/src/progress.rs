//! Run progress broadcasting for populate/delete operations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Stage of a propagation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ResolveInputs,
    PublishPayload,
    PublishControl,
    MergePayload,
    MergeControl,
    Completed,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::ResolveInputs => write!(f, "resolving inputs"),
            Stage::PublishPayload => write!(f, "publishing payload"),
            Stage::PublishControl => write!(f, "publishing control"),
            Stage::MergePayload => write!(f, "merging payload"),
            Stage::MergeControl => write!(f, "merging control"),
            Stage::Completed => write!(f, "completed"),
            Stage::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Populate,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Populate => write!(f, "populate"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// A progress event for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub run_id: String,
    pub operation: Operation,
    pub component: String,
    pub stage: Stage,
    pub message: String,
    /// Pull request URL, set once one exists for the stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Broadcasts run events to any number of subscribers.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    sender: Arc<broadcast::Sender<RunEvent>>,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Starts tracking a new run.
    pub fn start_run(&self, operation: Operation, component: &str) -> RunTracker {
        RunTracker {
            run_id: Uuid::new_v4().to_string(),
            operation,
            component: component.to_string(),
            sender: Arc::clone(&self.sender),
        }
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Emits events for a single run.
pub struct RunTracker {
    run_id: String,
    operation: Operation,
    component: String,
    sender: Arc<broadcast::Sender<RunEvent>>,
}

impl RunTracker {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn stage(&self, stage: Stage, message: &str) {
        self.send(stage, message, None, None);
    }

    /// Reports a stage that produced a pull request.
    pub fn stage_with_url(&self, stage: Stage, message: &str, url: &str) {
        self.send(stage, message, Some(url.to_string()), None);
    }

    pub fn completed(&self) {
        self.send(Stage::Completed, "Run completed", None, None);
    }

    pub fn failed(&self, error: &str) {
        self.send(Stage::Failed, "Run failed", None, Some(error.to_string()));
    }

    fn send(&self, stage: Stage, message: &str, url: Option<String>, error: Option<String>) {
        let event = RunEvent {
            run_id: self.run_id.clone(),
            operation: self.operation,
            component: self.component.clone(),
            stage,
            message: message.to_string(),
            url,
            error,
            timestamp: Utc::now(),
        };
        // No active receivers is fine
        let _ = self.sender.send(event);
    }
}
