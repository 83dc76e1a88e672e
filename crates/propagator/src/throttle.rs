//! Fixed pause between remote mutations.

use std::time::Duration;

/// Pause applied before each merge-related call when rate limiting is on.
pub const DEFAULT_PAUSE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    pause: Option<Duration>,
}

impl Throttle {
    pub fn new(pause: Duration) -> Self {
        Self { pause: Some(pause) }
    }

    pub fn disabled() -> Self {
        Self { pause: None }
    }

    /// Enabled with `pause` when `enabled`, otherwise a no-op.
    pub fn when(enabled: bool, pause: Duration) -> Self {
        if enabled {
            Self::new(pause)
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.pause.is_some()
    }

    pub async fn pause(&self) {
        if let Some(pause) = self.pause {
            log::trace!("Rate limit: sleeping {:?}", pause);
            tokio::time::sleep(pause).await;
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::disabled()
    }
}
