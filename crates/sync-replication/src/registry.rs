//! Subscription registry: reference-counted shared state per subject.
//!
//! Ensures exactly one underlying transport subscription and timer set
//! exists per subject and kind, no matter how many handles are requested
//! for it. Teardown happens only when the instance count reaches zero, and
//! is deferred by a grace window so a dispose-then-recreate cycle (a UI
//! re-render) reuses the live state instead of rebuilding it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Shared per-subject state managed by a [`Registry`].
pub trait SharedEntry: Send + Sync + 'static {
    /// Tear down the entry: abort background tasks, release buffers. Must
    /// be idempotent; called at most once by the registry, but defensive
    /// implementations keep a `destroyed` flag.
    fn destroy(&self);
}

struct Slot<T> {
    shared: Arc<T>,
    instances: usize,
    /// Bumped on every acquire/release; a pending teardown aborts when the
    /// epoch moved under it.
    epoch: u64,
}

/// Subject-keyed registry of shared sink state.
pub struct Registry<T: SharedEntry> {
    kind: &'static str,
    entries: Mutex<HashMap<String, Slot<T>>>,
}

impl<T: SharedEntry> Registry<T> {
    /// Create an empty registry. `kind` names the entry type in logs.
    #[must_use]
    pub fn new(kind: &'static str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Look up the shared state for `subject`, creating it on miss, and
    /// count one more handle against it.
    pub fn acquire(&self, subject: &str, create: impl FnOnce() -> Arc<T>) -> Arc<T> {
        let mut entries = self.entries.lock();
        let slot = entries.entry(subject.to_string()).or_insert_with(|| {
            debug!(kind = self.kind, subject = %subject, "Creating shared subscription state");
            Slot {
                shared: create(),
                instances: 0,
                epoch: 0,
            }
        });
        slot.instances += 1;
        slot.epoch += 1;
        slot.shared.clone()
    }

    /// Release one handle for `subject`. When the count reaches zero the
    /// entry is destroyed after `grace`, unless re-acquired first.
    pub fn release(self: &Arc<Self>, subject: &str, grace: Duration) {
        let epoch = {
            let mut entries = self.entries.lock();
            let Some(slot) = entries.get_mut(subject) else {
                warn!(kind = self.kind, subject = %subject, "Release for unknown subject");
                return;
            };
            slot.instances = slot.instances.saturating_sub(1);
            slot.epoch += 1;
            if slot.instances > 0 {
                return;
            }
            slot.epoch
        };

        let registry = self.clone();
        let subject = subject.to_string();
        let teardown = move || registry.try_teardown(&subject, epoch);

        // Outside a runtime (a handle dropped during shutdown) the grace
        // window cannot be awaited; tear down immediately instead.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    teardown();
                });
            }
            Err(_) => teardown(),
        }
    }

    fn try_teardown(&self, subject: &str, epoch: u64) {
        let shared = {
            let mut entries = self.entries.lock();
            let Some(slot) = entries.get(subject) else {
                return;
            };
            if slot.instances > 0 || slot.epoch != epoch {
                // Re-acquired during the grace window; keep the state.
                return;
            }
            entries.remove(subject).map(|slot| slot.shared)
        };
        if let Some(shared) = shared {
            debug!(kind = self.kind, subject = %subject, "Tearing down shared subscription state");
            shared.destroy();
        }
    }

    /// Current handle count for `subject` (0 when absent).
    #[must_use]
    pub fn instances(&self, subject: &str) -> usize {
        self.entries
            .lock()
            .get(subject)
            .map_or(0, |slot| slot.instances)
    }

    /// Whether shared state for `subject` currently exists.
    #[must_use]
    pub fn contains(&self, subject: &str) -> bool {
        self.entries.lock().contains_key(subject)
    }
}
