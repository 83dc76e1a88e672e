//! Token authentication for git over HTTPS.
//!
//! Tokens never appear in URLs or argv: git asks a throwaway `GIT_ASKPASS`
//! script that lives only as long as the command it serves.

use std::path::PathBuf;

use secrecy::ExposeSecret;

use super::error::GitError;
use super::types::Credentials;

/// Fallback username when a token is configured without one.
const TOKEN_USERNAME: &str = "x-access-token";

/// Escapes a value for safe use in single-quoted shell strings.
pub fn shell_escape(value: &str) -> String {
    value.replace('\'', "'\\''")
}

#[cfg(windows)]
fn escape_for_windows_batch(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() * 2);
    for ch in value.chars() {
        match ch {
            '%' => escaped.push_str("%%"),
            '^' | '&' | '|' | '<' | '>' | '(' | ')' | '"' => {
                escaped.push('^');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Deletes the askpass script when dropped.
#[derive(Debug)]
pub struct AskpassCleanup {
    path: Option<PathBuf>,
}

impl AskpassCleanup {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn empty() -> Self {
        Self { path: None }
    }
}

impl Drop for AskpassCleanup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to clean up askpass script: {}", e);
            }
        }
    }
}

/// Environment for one git invocation. Keep it alive until the command exits.
#[derive(Debug)]
pub struct AuthEnv {
    pub env_vars: Vec<(String, String)>,
    _cleanup: AskpassCleanup,
}

impl AuthEnv {
    fn anonymous() -> Self {
        Self {
            env_vars: vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())],
            _cleanup: AskpassCleanup::empty(),
        }
    }
}

/// Builds the environment git needs to authenticate with `credentials`.
pub fn build_auth_env(credentials: &Credentials) -> Result<AuthEnv, GitError> {
    let Some(token) = credentials.token.as_ref() else {
        return Ok(AuthEnv::anonymous());
    };

    let username = if credentials.username.is_empty() {
        TOKEN_USERNAME
    } else {
        credentials.username.as_str()
    };

    let random_suffix = uuid::Uuid::new_v4().to_string();
    let temp_dir = std::env::temp_dir();

    // git passes the prompt as $1: "Username for ..." or "Password for ...".
    #[cfg(unix)]
    let (askpass_path, script) = {
        let path = temp_dir.join(format!(".git-askpass-{}.sh", random_suffix));
        let script = format!(
            "#!/bin/sh\ncase \"$1\" in\n  Username*) echo '{}' ;;\n  *) echo '{}' ;;\nesac\n",
            shell_escape(username),
            shell_escape(token.expose_secret())
        );
        (path, script)
    };

    #[cfg(windows)]
    let (askpass_path, script) = {
        let path = temp_dir.join(format!(".git-askpass-{}.bat", random_suffix));
        let _ = username;
        let script = format!(
            "@echo off\r\necho {}\r\n",
            escape_for_windows_batch(token.expose_secret())
        );
        (path, script)
    };

    write_script(&askpass_path, &script)?;
    let cleanup = AskpassCleanup::new(askpass_path.clone());

    let askpass = askpass_path
        .to_str()
        .ok_or_else(|| {
            GitError::AuthSetup("Temp directory path contains non-UTF8 characters".to_string())
        })?
        .to_string();

    Ok(AuthEnv {
        env_vars: vec![
            ("GIT_ASKPASS".to_string(), askpass),
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
        ],
        _cleanup: cleanup,
    })
}

fn write_script(path: &std::path::Path, script: &str) -> Result<(), GitError> {
    let setup_err = |e: std::io::Error| GitError::AuthSetup(e.to_string());

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o700)
            .open(path)
            .map_err(setup_err)?;
        std::io::Write::write_all(&mut file, script.as_bytes()).map_err(setup_err)?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(path, script).map_err(setup_err)?;
    }

    Ok(())
}
