//! CLI command implementations for loglife.
//!
//! - [`run`] - Register the configured targets and rotate until interrupted
//! - [`rotate`] - One-shot copy-truncate of a single file
//! - [`check`] - Load and validate a configuration file

pub mod check;
pub mod rotate;
pub mod run;

/// Install the default stdout subscriber. `RUST_LOG` overrides `info`.
pub fn init_stdout_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
