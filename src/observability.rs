//! Tracing setup.
//!
//! One call at process start wires `tracing-subscriber` with an env
//! filter (`RUST_LOG` wins over the passed default). The JSON format is
//! for machine-scraped deployments; tests use [`init_for_tests`] which
//! tolerates repeated initialization.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Initialize the global subscriber. Later calls are no-ops.
pub fn init(default_directive: &str, format: LogFormat) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));

        match format {
            LogFormat::Text => {
                fmt()
                    .with_env_filter(filter)
                    .with_target(true)
                    .init();
            }
            LogFormat::Json => {
                fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_current_span(true)
                    .init();
            }
        }
    });
}

/// Subscriber for unit and integration tests. Safe to call repeatedly.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tracecap_engine=debug"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
