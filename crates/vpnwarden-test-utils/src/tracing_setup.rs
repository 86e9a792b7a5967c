//! Tracing initialisation helpers for tests.
//!
//! The subscriber is initialised at most once per process, so
//! [`init_test_tracing`] is safe to call from every test function.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset: management traffic from the
/// workspace crates at debug, everything else at warn.
pub const DEFAULT_TEST_FILTER: &str =
    "warn,vpnwarden_core=debug,vpnwarden_config=debug,vpnwarden_test_utils=debug";

/// Initialise a tracing subscriber that writes to the test-harness writer
/// and respects the `RUST_LOG` environment variable, falling back to
/// [`DEFAULT_TEST_FILTER`].
///
/// # Example
///
/// ```ignore
/// #[tokio::test]
/// async fn my_test() {
///     vpnwarden_test_utils::init_test_tracing();
///     tracing::debug!(target: "vpnwarden_core", "visible by default");
/// }
/// ```
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER)),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_TEST_FILTER).is_ok());
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        init_test_tracing();
        init_test_tracing();
        tracing::debug!(target: "vpnwarden_test_utils", "still alive");
    }
}
