//! Copyright 2024 Cosmian Tech SAS
//!
//! Tracing setup shared by the workspace crates and their tests.

use std::sync::Once;

pub use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor a default is given
pub const DEFAULT_FILTER: &str = "info";

static LOG_INIT: Once = Once::new();

/// Install the global tracing subscriber once per process.
///
/// The filter is read from `RUST_LOG`, falling back to `default_filter`, then
/// to [`DEFAULT_FILTER`]. Later calls are no-ops. If another subscriber was
/// installed first, it is left in place.
pub fn log_init(default_filter: Option<&str>) {
    LOG_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(default_filter.unwrap_or(DEFAULT_FILTER))
        });
        tracing_setup(filter);
    });
}

fn tracing_setup(filter: EnvFilter) {
    let format = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true)
        .compact();

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .try_init()
    {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::{info, log_init};

    #[test]
    fn test_log_init_is_idempotent() {
        log_init(Some("debug"));
        log_init(None);
        info!("logger initialized");
    }
}
