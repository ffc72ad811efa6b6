//! Logging initialisation
//!
//! Console logging through `tracing-subscriber`:
//! - `RUST_LOG` filter (default: info)
//! - Safe to call more than once; later calls are no-ops

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the fmt subscriber.
///
/// Returns `false` when a global subscriber was already set (by an earlier call
/// or by the embedding application).
pub fn init_tracing() -> bool {
    init_tracing_with_default("info")
}

/// Same as [`init_tracing`] with an explicit fallback filter for when
/// `RUST_LOG` is unset or invalid
pub fn init_tracing_with_default(default_filter: &str) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(version = env!("CARGO_PKG_VERSION"), "Tracing initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_init_twice_no_panic() {
        let _ = init_tracing();
        assert!(!init_tracing());
    }
}
