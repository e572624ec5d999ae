//! Logging setup
//!
//! Installs a `tracing-subscriber` formatter on stderr so that stdout carries
//! only the program's results. `RUST_LOG` takes precedence over the verbosity
//! flag.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "spotlists=debug"
    } else {
        "warn"
    }
}

/// Initializes the global subscriber; later calls are no-ops
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
