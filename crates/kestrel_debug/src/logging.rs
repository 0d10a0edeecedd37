//! Log subscriber setup for binaries, benchmarks, and tests.
//!
//! The engine crates only emit `tracing` events; nothing is printed until a
//! subscriber is installed. `RUST_LOG` overrides the default directive.

use tracing_subscriber::EnvFilter;

/// Default directive when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn,kestrel_engine=info";

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Installs a fmt subscriber with [`DEFAULT_FILTER`].
///
/// Returns false if a global subscriber was already installed.
pub fn init() -> bool {
    init_with(DEFAULT_FILTER)
}

/// Installs a fmt subscriber using `default` when `RUST_LOG` is unset.
///
/// Returns false if a global subscriber was already installed.
pub fn init_with(default: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default))
        .try_init()
        .is_ok()
}

/// Installs a subscriber that writes through the test harness's capture.
///
/// Safe to call from every test; only the first call installs.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("debug"))
        .with_test_writer()
        .try_init();
}
