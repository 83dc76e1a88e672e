//! Structured edits of a kustomization `resources` list.
//!
//! Both edits are idempotent and leave the file untouched when the list does
//! not change, which is what makes re-applying them during conflict
//! resolution converge.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::error::IndexError;

/// Conventional index file name inside an overlay directory.
pub const INDEX_FILE_NAME: &str = "kustomization.yaml";

const API_VERSION: &str = "kustomize.config.k8s.io/v1beta1";
const KIND: &str = "Kustomization";
const RESOURCES_KEY: &str = "resources";

/// A parsed kustomization file.
#[derive(Debug, Clone)]
pub struct KustomizeIndex {
    path: PathBuf,
    document: Mapping,
}

impl KustomizeIndex {
    /// Loads the index at `path`; a missing or empty file yields a fresh document.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(IndexError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, IndexError> {
        if content.trim().is_empty() {
            return Ok(Self {
                path: path.to_path_buf(),
                document: new_document(),
            });
        }

        let value: Value = serde_yaml::from_str(content).map_err(|e| IndexError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let document = match value {
            Value::Mapping(map) => map,
            Value::Null => new_document(),
            _ => {
                return Err(IndexError::Malformed {
                    path: path.to_path_buf(),
                    message: "top level must be a mapping".to_string(),
                })
            }
        };

        let index = Self {
            path: path.to_path_buf(),
            document,
        };
        // Validate shape up front so later edits cannot fail half way.
        index.resources()?;
        Ok(index)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resource entries in file order.
    pub fn resources(&self) -> Result<Vec<String>, IndexError> {
        match self.document.get(RESOURCES_KEY) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Sequence(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| IndexError::Malformed {
                        path: self.path.clone(),
                        message: format!("resource entry {:?} is not a string", item),
                    })
                })
                .collect(),
            Some(_) => Err(IndexError::Malformed {
                path: self.path.clone(),
                message: "'resources' must be a list".to_string(),
            }),
        }
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.resources()
            .map(|items| items.iter().any(|r| r == resource))
            .unwrap_or(false)
    }

    /// Appends `resource` unless present. Returns whether the list changed.
    pub fn insert(&mut self, resource: &str) -> Result<bool, IndexError> {
        if self.resources()?.iter().any(|r| r == resource) {
            return Ok(false);
        }

        if let Some(Value::Sequence(items)) = self.document.get_mut(RESOURCES_KEY) {
            items.push(Value::String(resource.to_string()));
            return Ok(true);
        }

        // Absent or null list.
        self.document.insert(
            Value::String(RESOURCES_KEY.to_string()),
            Value::Sequence(vec![Value::String(resource.to_string())]),
        );
        Ok(true)
    }

    /// Drops every occurrence of `resource`. Returns whether the list changed.
    pub fn remove(&mut self, resource: &str) -> Result<bool, IndexError> {
        if !self.resources()?.iter().any(|r| r == resource) {
            return Ok(false);
        }

        if let Some(Value::Sequence(items)) = self.document.get_mut(RESOURCES_KEY) {
            items.retain(|item| item.as_str() != Some(resource));
        }
        Ok(true)
    }

    pub fn render(&self) -> Result<String, IndexError> {
        serde_yaml::to_string(&self.document).map_err(|e| IndexError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    /// Writes the document through a temp file in the same directory.
    pub fn save(&self) -> Result<(), IndexError> {
        let rendered = self.render()?;
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        std::fs::create_dir_all(parent).map_err(|e| self.write_error(e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| self.write_error(e))?;
        tmp.write_all(rendered.as_bytes())
            .map_err(|e| self.write_error(e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.write_error(e.error))?;
        Ok(())
    }

    fn write_error(&self, source: std::io::Error) -> IndexError {
        IndexError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

fn new_document() -> Mapping {
    let mut doc = Mapping::new();
    doc.insert(
        Value::String("apiVersion".to_string()),
        Value::String(API_VERSION.to_string()),
    );
    doc.insert(
        Value::String("kind".to_string()),
        Value::String(KIND.to_string()),
    );
    doc.insert(
        Value::String(RESOURCES_KEY.to_string()),
        Value::Sequence(Vec::new()),
    );
    doc
}

/// Adds `resource` to the index at `index_file`, creating the file if needed.
pub fn add_resource(index_file: &Path, resource: &str) -> Result<bool, IndexError> {
    let mut index = KustomizeIndex::load(index_file)?;
    let changed = index.insert(resource)?;
    if changed {
        index.save()?;
        log::debug!("Added '{}' to {}", resource, index_file.display());
    }
    Ok(changed)
}

/// Removes `resource` from the index at `index_file`. A missing file is a no-op.
pub fn remove_resource(index_file: &Path, resource: &str) -> Result<bool, IndexError> {
    if !index_file.exists() {
        return Ok(false);
    }
    let mut index = KustomizeIndex::load(index_file)?;
    let changed = index.remove(resource)?;
    if changed {
        index.save()?;
        log::debug!("Removed '{}' from {}", resource, index_file.display());
    }
    Ok(changed)
}
