//! Logging system setup.
//!
//! Installs a tracing-subscriber registry for hosts that do not bring their
//! own. Output is either human-readable or JSON lines.

use crate::config::LoggingConfig;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Returns an error instead
/// of panicking when a global subscriber is already installed, so hosts and
/// tests can call it more than once.
///
/// # Arguments
///
/// * `config` - Log level and whether to emit JSON lines
///
/// # Returns
///
/// `Ok(())` once the subscriber is installed, or the initialization error.
pub fn setup_logging(
    config: &LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    info!("🔧 Proximity logging initialized with level: {}", log_level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_setup_fails_gracefully() {
        let config = LoggingConfig::default();
        let first = setup_logging(&config);
        let second = setup_logging(&config);
        // Other tests may have installed a subscriber first; either way the
        // repeated call must not panic and must report an error.
        assert!(first.is_ok() || second.is_err());
        assert!(second.is_err());
    }
}
