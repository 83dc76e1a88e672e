//! Tracing initialisation for binaries embedding the propagator.
//!
//! Library code logs through the `log` facade and opens `tracing` spans per
//! run stage; [`init_tracing`] routes both into one subscriber.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber and the `log` bridge.
///
/// `RUST_LOG` takes precedence over `level`. Only the first call in a
/// process has any effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let installed = if json {
        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json());
        tracing::subscriber::set_global_default(subscriber).is_ok()
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false));
        tracing::subscriber::set_global_default(subscriber).is_ok()
    };

    if installed {
        tracing_log::LogTracer::init().ok();
    }
}
