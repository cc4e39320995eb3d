//! Test logging configuration utilities
//!
//! Routes `tracing` output through the test harness writer so it only shows
//! for failing tests. `RUST_LOG` wins over the level passed in.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install a test subscriber at `level` (first call wins)
///
/// # Example
///
/// ```rust
/// use chat_test_helpers::logging::init_test_logging;
///
/// init_test_logging("chat_sync=debug");
/// tracing::debug!("visible with --nocapture");
/// ```
pub fn init_test_logging(level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Only errors, e.g. for tests that deliberately feed malformed payloads
pub fn suppress_logs() {
    init_test_logging("error");
}
