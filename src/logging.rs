//! Logging configuration for db-tally.
//!
//! Logs go to stderr so stdout carries only query output.

use tracing_subscriber::EnvFilter;

/// Returns the default filter directive for a `-v` count.
pub fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Initializes stderr logging.
///
/// `RUST_LOG` wins over the verbosity flag when set.
pub fn init_stderr_logging(verbose: u8) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose))),
        )
        .with_writer(std::io::stderr)
        .init();
}
