use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::hosting::MergeMethod;
use crate::request::Layer;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub hosting: HostingConfig,
    /// Base directory for temporary checkouts.
    #[serde(default)]
    pub workdir: Option<String>,
    pub repositories: HashMap<String, RepositoryConfig>,
    pub layers: HashMap<Layer, LayerMapping>,
    #[serde(default)]
    pub merge: MergeConfig,
}

impl Config {
    /// Checkout base directory, defaulting to `<tmp>/propagator`.
    pub fn workdir(&self) -> PathBuf {
        match self.workdir.as_deref().filter(|w| !w.is_empty()) {
            Some(dir) => crate::secrets::expand_home(dir),
            None => std::env::temp_dir().join("propagator"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    #[serde(default = "default_user_name")]
    pub user_name: String,
    #[serde(default = "default_user_email")]
    pub user_email: String,
}

fn default_user_name() -> String {
    "Propagator".to_string()
}

fn default_user_email() -> String {
    "propagator@localhost".to_string()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            user_name: default_user_name(),
            user_email: default_user_email(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostingProvider {
    #[default]
    Github,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostingConfig {
    #[serde(default)]
    pub provider: HostingProvider,
    /// API base URL; empty uses the provider's public endpoint.
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub merge_method: MergeMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    pub url: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default)]
    pub auth: RepoAuth,
}

fn default_base_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    None,
    Token,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoAuth {
    #[serde(rename = "type", default)]
    pub auth_type: AuthType,
    #[serde(default)]
    pub username: String,
    /// Direct token value; prefer `tokenFile` or `tokenEnvVar` outside local testing.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<String>,
    #[serde(default)]
    pub token_env_var: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerMapping {
    pub payload: RepoLocation,
    pub control: RepoLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoLocation {
    pub repository: String,
    #[serde(default)]
    pub base_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConfig {
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    #[serde(default)]
    pub wait_for_blocked: WaitForBlockedConfig,
}

fn default_rate_limit_ms() -> u64 {
    1000
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: default_rate_limit_ms(),
            wait_for_blocked: WaitForBlockedConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitForBlockedConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_max_attempts() -> u32 {
    30
}

fn default_interval_secs() -> u64 {
    10
}

impl Default for WaitForBlockedConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_secs: default_interval_secs(),
        }
    }
}
