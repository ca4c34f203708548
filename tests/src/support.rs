//! Shared helpers for the integration suite.

use std::sync::Once;
use std::time::Duration;

static TRACING: Once = Once::new();

/// Install a test-friendly tracing subscriber once per process. Honors
/// `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Poll `condition` until it holds, panicking after two seconds. The flows
/// under test converge via background tasks, so assertions on their results
/// must wait rather than race.
pub async fn eventually(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
