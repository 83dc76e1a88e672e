use std::path::PathBuf;
use thiserror::Error;

use crate::git::GitError;
use crate::progress::Stage;

#[derive(Error, Debug)]
pub enum PropagateError {
    #[error("Invalid layer '{0}', expected one of: infrastructure, services, applications")]
    InvalidLayer(String),

    #[error("Invalid change request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    #[error("Failed to prepare checkout directory under '{path}': {source}")]
    Checkout {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Hosting provider error: {0}")]
    Hosting(#[from] HostingError),

    #[error("Kustomization error: {0}")]
    Index(#[from] IndexError),

    #[error("Failed to render manifest: {0}")]
    Render(#[from] serde_yaml::Error),

    #[error("Unresolved merge conflicts in pull request #{pull_number}: {}", .files.join(", "))]
    UnresolvedConflict { pull_number: u64, files: Vec<String> },

    #[error("Pull request #{pull_number} is still blocked after {attempts} attempts")]
    MergeBlocked { pull_number: u64, attempts: u32 },

    #[error("Cancelled before {stage}")]
    Cancelled { stage: Stage },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("No repository configuration for layer '{layer}' ({role})")]
    MissingLayer { layer: String, role: String },

    #[error("Unknown repository '{0}'")]
    UnknownRepository(String),

    #[error("Failed to resolve credentials for repository '{repository}': {source}")]
    Credentials {
        repository: String,
        #[source]
        source: crate::secrets::SecretError,
    },
}

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("Content directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("Failed to copy '{from}' to '{to}': {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk content directory '{path}': {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to fetch archive '{url}': {message}")]
    Fetch { url: String, message: String },

    #[error("Invalid archive '{url}': {message}")]
    Archive { url: String, message: String },

    #[error("Archive entry escapes target directory: {0}")]
    PathTraversal(String),

    #[error("Invalid Helm chart reference: {0}")]
    InvalidChart(String),

    #[error("Failed to read values file '{path}': {message}")]
    ValuesFile { path: PathBuf, message: String },

    #[error("File operation failed on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Malformed kustomization '{path}': {message}")]
    Malformed { path: PathBuf, message: String },
}

#[derive(Error, Debug)]
pub enum HostingError {
    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Unexpected response {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Cannot derive owner/repository from URL '{0}'")]
    InvalidRepositoryUrl(String),

    #[error("Pull request #{0} not found")]
    NotFound(u64),
}

impl PropagateError {
    /// Returns true for failures raised before any git operation took place.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            PropagateError::InvalidLayer(_)
                | PropagateError::InvalidRequest(_)
                | PropagateError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PropagateError>;
