//! Logging bootstrap.
//!
//! Installs a global `tracing` subscriber. `RUST_LOG` takes precedence over
//! the configured default filter.

use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogFormat};

/// Install the global subscriber. Returns false if one was already
/// installed, which leaves the existing subscriber in place.
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = match config.format {
        LogFormat::Text => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };
    if installed {
        tracing::debug!(format = ?config.format, "tracing initialised");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_initialisation_is_refused() {
        let config = LogConfig::default();
        init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
