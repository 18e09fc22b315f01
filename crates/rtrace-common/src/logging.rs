use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "RTRACE_LOG";

/// Initialize structured logging with environment filter.
/// Set RTRACE_LOG=debug (or trace, info, warn, error, or per-target
/// directives such as `rtrace_replay::mutate=trace`) for verbosity control.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // try_init so repeated calls (tests, embedding) don't panic.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}
