use std::path::{Component, Path};

use crate::config::schema::{AuthType, Config};
use crate::error::ConfigError;
use crate::secrets::has_secret_source;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    for (name, repo) in &config.repositories {
        if repo.url.trim().is_empty() {
            return Err(validation(format!("Repository '{}' has an empty url", name)));
        }
        if repo.base_branch.trim().is_empty() {
            return Err(validation(format!(
                "Repository '{}' has an empty baseBranch",
                name
            )));
        }
        if repo.auth.auth_type == AuthType::Token
            && !has_secret_source(
                repo.auth.token.as_deref(),
                repo.auth.token_file.as_deref(),
                repo.auth.token_env_var.as_deref(),
            )
        {
            return Err(validation(format!(
                "Repository '{}' uses token auth but sets none of token, tokenFile, tokenEnvVar",
                name
            )));
        }
    }

    for (layer, mapping) in &config.layers {
        for (role, location) in [("payload", &mapping.payload), ("control", &mapping.control)] {
            if !config.repositories.contains_key(&location.repository) {
                return Err(ConfigError::UnknownRepository(location.repository.clone()));
            }
            if !is_relative_path(&location.base_path) {
                return Err(validation(format!(
                    "Layer '{}' {} basePath '{}' must be a relative path inside the repository",
                    layer, role, location.base_path
                )));
            }
        }
    }

    if config.merge.wait_for_blocked.max_attempts == 0 {
        return Err(validation(
            "merge.waitForBlocked.maxAttempts must be at least 1".to_string(),
        ));
    }

    Ok(())
}

fn is_relative_path(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn validation(message: String) -> ConfigError {
    ConfigError::Validation { message }
}
