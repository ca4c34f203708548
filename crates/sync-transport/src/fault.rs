//! Fault-injecting transport wrapper for tests.

use crate::status::ConnectionStatus;
use crate::transport::{Subscription, Transport, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Delegating [`Transport`] that drops a controlled number of publishes.
///
/// Used by tests to simulate the at-most-once nature of the real bus: a
/// subscriber misses an update and must recover through advertisement
/// reconciliation and fetching.
pub struct FaultInjector {
    inner: Arc<dyn Transport>,
    drop_budget: AtomicU64,
    dropped: AtomicU64,
}

impl FaultInjector {
    /// Wrap `inner`. No messages are dropped until [`Self::drop_next`].
    #[must_use]
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self {
            inner,
            drop_budget: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Silently discard the next `count` published messages.
    pub fn drop_next(&self, count: u64) {
        self.drop_budget.fetch_add(count, Ordering::SeqCst);
    }

    /// Total messages discarded so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    fn should_drop(&self) -> bool {
        self.drop_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |budget| {
                budget.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl Transport for FaultInjector {
    fn publish(&self, subject: &str, payload: Vec<u8>) {
        if self.should_drop() {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            debug!(subject = %subject, "Fault injector dropped publish");
            return;
        }
        self.inner.publish(subject, payload);
    }

    fn subscribe(&self, subject: &str) -> Subscription {
        self.inner.subscribe(subject)
    }

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        // Requests bypass injection; loss is modelled on the broadcast path.
        self.inner.request(subject, payload, timeout).await
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status()
    }
}
