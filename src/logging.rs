//! Optional tracing setup for programs embedding oidcauth.
//!
//! The library itself only emits `tracing` events. Host programs that do not
//! install their own subscriber can call [`init_tracing`].

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Build the filter: `RUST_LOG` takes precedence over the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.level;
        // oidcauth at the configured level, dependencies at warn
        EnvFilter::new(format!("oidcauth={level},warn"))
    })
}

/// Install a global fmt subscriber.
///
/// Returns `false` if another subscriber was already installed, in which case
/// that one stays in effect.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let result = if config.json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    result.is_ok()
}
