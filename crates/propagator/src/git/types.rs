//! Plain data passed to and returned from the git client.

use std::fmt;
use std::sync::Arc;

use secrecy::SecretString;

/// Credentials for one remote repository.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub token: Option<Arc<SecretString>>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn token(username: impl Into<String>, token: SecretString) -> Self {
        Self {
            username: username.into(),
            token: Some(Arc::new(token)),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &self.token.as_ref().map(|_| "****"))
            .finish()
    }
}

/// Author identity used for every commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self {
            name: "Propagator".to_string(),
            email: "propagator@localhost".to_string(),
        }
    }
}

/// A remote repository together with what is needed to talk to it.
#[derive(Debug, Clone)]
pub struct RemoteRepo {
    /// Configured repository name, used in logs and directory names.
    pub name: String,
    pub url: String,
    pub credentials: Credentials,
}

/// Result of merging one branch into another locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub clean: bool,
    /// Paths (relative to the repository root) left in conflict.
    pub conflicts: Vec<String>,
}

impl MergeOutcome {
    pub fn clean() -> Self {
        Self {
            clean: true,
            conflicts: Vec::new(),
        }
    }
}
