//! Logging setup.
//!
//! Every component logs through `tracing` with `tenant` / `task` / `event_id`
//! / `job_id` fields. Hosts that already install a subscriber can skip this.

use tracing_subscriber::{EnvFilter, fmt};

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Calling it twice, or after another subscriber was installed, is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        tracing::info!(tenant = "A", "logging initialised");
    }
}
