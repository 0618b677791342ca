//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured level. Installing twice is a
//! no-op so tests may call it freely.

use crate::hypervisor_config::LoggingSettings;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber; returns false if one was already set
pub fn init_tracing(settings: &LoggingSettings) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if settings.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(level = %settings.level, json = settings.json, "Tracing initialized");
    }
    installed
}
