//! Logging utilities and structured logging support

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system
///
/// Honors `RUST_LOG`; calling it twice is harmless.
pub fn init() {
    if env_logger::try_init().is_err() {
        log::debug!("logger already initialized");
    }
}

/// Initialize the logging system with a default filter such as `"info"`
///
/// `RUST_LOG` still takes precedence when it is set.
pub fn init_with_filter(filter: &str) {
    let env = env_logger::Env::default().default_filter_or(filter);
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("logger already initialized");
    }
}

/// Initialize logging for unit tests, capturing output per test
#[cfg(test)]
pub fn init_for_tests() {
    let _ = env_logger::builder().is_test(true).try_init();
}
