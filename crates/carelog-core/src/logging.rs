//! Logging setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::CareLogConfig;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Calling this more than
/// once is harmless; only the first call installs a subscriber.
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

/// [`init_logging`] with the config's `log_filter` as the default.
pub fn init_logging_from(config: &CareLogConfig) -> bool {
    init_logging(&config.log_filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test: the subscriber is process-global.
    #[test]
    fn test_init_is_idempotent() {
        let config = CareLogConfig::new().with_log_filter("carelog_core=debug");
        init_logging_from(&config);
        assert!(!init_logging("carelog_core=trace"));
        assert!(!init_logging_from(&config));
    }
}
