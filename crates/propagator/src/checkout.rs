//! Transient working-copy directories owned by a single publisher run.

use std::path::{Path, PathBuf};

use crate::naming::{random_suffix, sanitize_label};

/// A directory reserved for one clone, removed when the run ends.
///
/// [`LocalCheckout::remove`] is the normal exit path; `Drop` covers early
/// returns, panics and dropped futures. Removal failures are logged and never
/// surface as errors.
#[derive(Debug)]
pub struct LocalCheckout {
    path: PathBuf,
    removed: bool,
}

impl LocalCheckout {
    /// Reserves `<base>/<repo>-<suffix>`. The directory itself is left for
    /// `git clone` to create.
    pub fn reserve(base: &Path, repository: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(base)?;
        let mut name = sanitize_label(repository);
        if name.is_empty() {
            name = "checkout".to_string();
        }
        let path = base.join(format!("{}-{}", name, random_suffix()));
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the directory now, logging instead of failing.
    pub fn remove(mut self) {
        self.remove_now();
    }

    fn remove_now(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        if !self.path.exists() {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => log::debug!("Removed checkout {}", self.path.display()),
            Err(e) => log::warn!(
                "Failed to remove checkout {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

impl Drop for LocalCheckout {
    fn drop(&mut self) {
        self.remove_now();
    }
}
