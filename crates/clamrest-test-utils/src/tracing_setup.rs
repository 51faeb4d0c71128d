//! Tracing initialisation helpers for tests.
//!
//! Call [`init_test_tracing`] at the top of any test that emits tracing events
//! and wants them captured by the test harness. The subscriber is installed
//! at most once per process.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset: client and server internals at
/// debug, everything else at warn.
const DEFAULT_TEST_FILTER: &str = "warn,clamrest_clamd=debug,clamrest_server=debug";

/// Initialise a tracing subscriber that writes to the test-harness writer
/// and respects the `RUST_LOG` environment variable.
///
/// # Example
///
/// ```ignore
/// #[tokio::test]
/// async fn scan_logs() {
///     clamrest_test_utils::tracing_setup::init_test_tracing();
///     tracing::debug!("captured by the harness");
/// }
/// ```
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER)),
        )
        .with_test_writer()
        .try_init();
}
