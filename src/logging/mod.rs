//! Logging setup
//!
//! Installs a `tracing` subscriber driven by [`LoggingConfig`]. `RUST_LOG`,
//! when set, takes precedence over the configured level.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Build the filter from `RUST_LOG` or, failing that, the config
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| Error::Config(format!("Invalid log level {:?}: {}", config.level, e)))?;

    for directive in &config.directives {
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| Error::Config(format!("Invalid log directive {:?}: {}", directive, e)))?,
        );
    }

    Ok(filter)
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` if one was already installed, which happens when
/// several tests initialize logging in the same process.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    let filter = build_filter(config)?;

    let installed = Registry::default()
        .with(filter)
        .with(fmt::layer().with_target(config.with_target))
        .try_init()
        .is_ok();

    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_directive_is_rejected() {
        let config = LoggingConfig {
            directives: vec!["matchroom=loudest".to_string()],
            ..LoggingConfig::default()
        };
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(build_filter(&config), Err(Error::Config(_))));
        }
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        let config = LoggingConfig::default();
        init_logging(&config).unwrap();
        assert!(!init_logging(&config).unwrap());
    }
}
