//! Diagnostic logging setup.
//!
//! Logs go to stderr so they never interleave with the conversation on
//! stdout. `RUST_LOG` wins over the command-line verbosity when set.

use crate::error::{Result, VoxError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter directive for a `-q`/`-v` combination.
pub fn default_directive(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbosity {
        0 => "warn",
        1 => "voxchat=info,warn",
        2 => "voxchat=debug,info",
        _ => "voxchat=trace,debug",
    }
}

/// Install the global subscriber. Call once, early in `main`.
pub fn init(verbosity: u8, quiet: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directive(verbosity, quiet).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity >= 2),
        )
        .try_init()
        .map_err(|e| VoxError::Other(format!("Failed to initialise logging: {}", e)))
}
