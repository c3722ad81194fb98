//! Process-wide log sink.
//!
//! Every delivered message ends up here as one `INFO` line. The filter comes
//! from `RUST_LOG` and defaults to `info`. Records emitted through the `log`
//! crate, such as those of the Kafka client, are forwarded to the same sink.

use std::error::Error;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber. Fails if one is already installed.
pub fn init() -> Result<(), Box<dyn Error + Send + Sync + 'static>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .try_init()
}
