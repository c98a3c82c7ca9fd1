//! Tracing subscriber setup for the harness binaries.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
#[error("invalid verbosity policy {0:?}: {1}")]
pub struct InvalidLogPolicy(String, String);

/// Install the global subscriber. `policy` is an `EnvFilter` directive string
/// such as "info" or "warn,kvprobe=debug"; `RUST_LOG` takes precedence when
/// set.
pub fn init(policy: &str) -> Result<(), InvalidLogPolicy> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(policy)
            .map_err(|e| InvalidLogPolicy(policy.to_string(), e.to_string()))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}
