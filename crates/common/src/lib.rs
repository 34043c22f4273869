//! Shared building blocks for the depth feed workspace.
//!
//! - [`BinanceEnvironment`]: production/testnet endpoint selection
//! - [`FixedBackoff`]: bounded, fixed-delay retry schedule
//! - [`init_logging`]: `tracing` subscriber setup

mod backoff;
mod environment;

pub use backoff::FixedBackoff;
pub use environment::{BinanceEnvironment, ParseEnvironmentError};

use tracing_subscriber::EnvFilter;

/// Default log directive when `RUST_LOG` is not set.
const DEFAULT_LOG_DIRECTIVE: &str = "info";

/// Install the global `tracing` subscriber.
///
/// Honors `RUST_LOG`; falls back to `info`. Calling it twice is harmless.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
