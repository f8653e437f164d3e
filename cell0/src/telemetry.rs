//! Logging/tracing bootstrap, invoked once at binary entrypoint.
//!
//! `log` macros are used at call sites throughout the crate (matching the
//! teacher's mix of `log`+`tracing`); `tracing-subscriber` bridges both onto
//! one `EnvFilter`-driven formatter so a single `CELL0_LOG_LEVEL` controls
//! everything.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize logging. Safe to call more than once (subsequent calls are
/// no-ops) so tests can call it freely.
pub fn init() {
    let filter = EnvFilter::try_from_env("CELL0_LOG_LEVEL")
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(fmt::format().with_target(true))
        .try_init();

    let _ = tracing_log::LogTracer::init();
}
