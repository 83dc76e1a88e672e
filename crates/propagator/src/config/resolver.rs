//! Read-only lookup of layer locations, credentials and merge defaults.

use std::time::Duration;

use crate::config::schema::{AuthType, Config, RepoLocation};
use crate::error::ConfigError;
use crate::git::{Credentials, GitIdentity, RemoteRepo};
use crate::hosting::MergeMethod;
use crate::merge::WaitPolicy;
use crate::request::Layer;
use crate::secrets::resolve_secret;
use crate::throttle::DEFAULT_PAUSE;

/// Resolved location of one side (payload or control) of a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayerConfig {
    /// Configured repository name.
    pub repository: String,
    pub url: String,
    /// Directory inside the repository all paths are relative to; may be empty.
    pub base_path: String,
    pub base_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerConfig {
    pub payload: RepoLayerConfig,
    pub control: RepoLayerConfig,
}

/// Settings applied when a request asks for rate limiting or blocked-merge waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeDefaults {
    pub method: MergeMethod,
    pub rate_limit: Duration,
    pub wait: WaitPolicy,
}

impl Default for MergeDefaults {
    fn default() -> Self {
        Self {
            method: MergeMethod::default(),
            rate_limit: DEFAULT_PAUSE,
            wait: WaitPolicy::default(),
        }
    }
}

pub trait ConfigResolver: Send + Sync {
    fn layer(&self, layer: Layer) -> Result<LayerConfig, ConfigError>;

    fn credentials(&self, repository: &str) -> Result<Credentials, ConfigError>;

    fn merge_defaults(&self) -> MergeDefaults {
        MergeDefaults::default()
    }

    /// Remote handle for one side of a layer, credentials included.
    fn remote(&self, location: &RepoLayerConfig) -> Result<RemoteRepo, ConfigError> {
        Ok(RemoteRepo {
            name: location.repository.clone(),
            url: location.url.clone(),
            credentials: self.credentials(&location.repository)?,
        })
    }
}

/// Resolver backed by a loaded [`Config`].
#[derive(Debug, Clone)]
pub struct StaticConfigResolver {
    config: Config,
}

impl StaticConfigResolver {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn git_identity(&self) -> GitIdentity {
        GitIdentity {
            name: self.config.git.user_name.clone(),
            email: self.config.git.user_email.clone(),
        }
    }

    fn locate(&self, location: &RepoLocation) -> Result<RepoLayerConfig, ConfigError> {
        let repo = self
            .config
            .repositories
            .get(&location.repository)
            .ok_or_else(|| ConfigError::UnknownRepository(location.repository.clone()))?;

        Ok(RepoLayerConfig {
            repository: location.repository.clone(),
            url: repo.url.clone(),
            base_path: location.base_path.trim_matches('/').to_string(),
            base_branch: repo.base_branch.clone(),
        })
    }
}

impl ConfigResolver for StaticConfigResolver {
    fn layer(&self, layer: Layer) -> Result<LayerConfig, ConfigError> {
        let mapping = self
            .config
            .layers
            .get(&layer)
            .ok_or_else(|| ConfigError::MissingLayer {
                layer: layer.to_string(),
                role: "payload and control".to_string(),
            })?;

        Ok(LayerConfig {
            payload: self.locate(&mapping.payload)?,
            control: self.locate(&mapping.control)?,
        })
    }

    fn credentials(&self, repository: &str) -> Result<Credentials, ConfigError> {
        let repo = self
            .config
            .repositories
            .get(repository)
            .ok_or_else(|| ConfigError::UnknownRepository(repository.to_string()))?;

        match repo.auth.auth_type {
            AuthType::None => Ok(Credentials::anonymous()),
            AuthType::Token => {
                let token = resolve_secret(
                    repo.auth.token.as_deref(),
                    repo.auth.token_file.as_deref(),
                    repo.auth.token_env_var.as_deref(),
                )
                .map_err(|e| ConfigError::Credentials {
                    repository: repository.to_string(),
                    source: e,
                })?;
                Ok(Credentials::token(repo.auth.username.clone(), token))
            }
        }
    }

    fn merge_defaults(&self) -> MergeDefaults {
        let merge = &self.config.merge;
        MergeDefaults {
            method: self.config.hosting.merge_method,
            rate_limit: Duration::from_millis(merge.rate_limit_ms),
            wait: WaitPolicy {
                max_attempts: merge.wait_for_blocked.max_attempts,
                interval: Duration::from_secs(merge.wait_for_blocked.interval_secs),
            },
        }
    }
}
