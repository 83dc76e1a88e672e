//! Conflict resolution by re-applying a structured index edit.
//!
//! Instead of reconciling conflicting hunks, the resolver takes the target
//! branch's version of the shared index and re-derives its own entry on top.
//! Two branches adding different entries therefore converge in either merge
//! order.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::git::WorkingCopy;
use crate::kustomize::{add_resource, remove_resource};

/// Outcome of one resolver pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Conflicted files that were resolved and staged.
    pub resolved: Vec<String>,
    /// Files the resolver handles but failed on, with the reason.
    pub errors: Vec<(String, String)>,
}

impl Resolution {
    /// Files from `conflicted` still needing attention: unhandled or failed.
    pub fn unresolved(&self, conflicted: &[String]) -> Vec<String> {
        conflicted
            .iter()
            .filter(|file| !self.resolved.contains(file))
            .cloned()
            .collect()
    }
}

/// Resolves merge conflicts inside a working copy mid-merge.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(&self, working_copy: &dyn WorkingCopy, conflicted: &[String]) -> Resolution;
}

/// The structured edit a resolver re-applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexEdit {
    Add,
    Remove,
}

/// Resolves conflicts on one shared index file for one resource entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConflictResolver {
    /// Index file path relative to the repository root.
    index_file: String,
    resource: String,
    edit: IndexEdit,
}

impl IndexConflictResolver {
    pub fn new(index_file: impl Into<String>, resource: impl Into<String>, edit: IndexEdit) -> Self {
        Self {
            index_file: normalize(&index_file.into()),
            resource: resource.into(),
            edit,
        }
    }

    pub fn adding(index_file: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::new(index_file, resource, IndexEdit::Add)
    }

    pub fn removing(index_file: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::new(index_file, resource, IndexEdit::Remove)
    }

    pub fn index_file(&self) -> &str {
        &self.index_file
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn edit(&self) -> IndexEdit {
        self.edit
    }

    fn handles(&self, file: &str) -> bool {
        normalize(file) == self.index_file
    }

    async fn resolve_file(&self, working_copy: &dyn WorkingCopy, file: &str) -> Result<(), String> {
        working_copy
            .checkout_theirs(file)
            .await
            .map_err(|e| e.to_string())?;

        let path: PathBuf = working_copy.path().join(Path::new(file));
        let changed = match self.edit {
            IndexEdit::Add => add_resource(&path, &self.resource),
            IndexEdit::Remove => remove_resource(&path, &self.resource),
        }
        .map_err(|e| e.to_string())?;

        tracing::debug!(
            file = %file,
            resource = %self.resource,
            changed,
            "Re-applied index edit on target branch version"
        );

        working_copy.stage(file).await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ConflictResolver for IndexConflictResolver {
    async fn resolve(&self, working_copy: &dyn WorkingCopy, conflicted: &[String]) -> Resolution {
        let mut resolution = Resolution::default();

        for file in conflicted.iter().filter(|f| self.handles(f)) {
            match self.resolve_file(working_copy, file).await {
                Ok(()) => resolution.resolved.push(file.clone()),
                Err(e) => {
                    tracing::warn!(file = %file, error = %e, "Failed to resolve index conflict");
                    resolution.errors.push((file.clone(), e));
                }
            }
        }

        resolution
    }
}

fn normalize(path: &str) -> String {
    path.trim_start_matches("./").replace('\\', "/")
}
