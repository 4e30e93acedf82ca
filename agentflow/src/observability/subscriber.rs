//! `tracing-subscriber` installation.

use crate::config::LoggingConfig;
use crate::errors::ConfigurationError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used for crates other than agentflow when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn";

/// Installs a global fmt subscriber.
///
/// `RUST_LOG` takes precedence over the configured level when set. Returns
/// `Ok(false)` if a global subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool, ConfigurationError> {
    let level = config.tracing_level()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{DEFAULT_FILTER},agentflow={}",
            level.as_str().to_ascii_lowercase()
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    Ok(installed.is_ok())
}
