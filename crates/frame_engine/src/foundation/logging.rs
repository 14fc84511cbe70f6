//! Logging utilities and structured logging support

pub use log::{debug, info, warn, error, trace};

use crate::core::config::LoggingConfig;

/// Initialize the logging system
///
/// `RUST_LOG` wins over the configured default level. Calling this more than once is
/// harmless; later calls leave the first logger in place.
pub fn init(config: &LoggingConfig) {
    let env = env_logger::Env::default().default_filter_or(config.default_level.as_str());
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init(&config);
        init(&config);
        info!("logging initialized twice without panicking");
    }
}
