//! Publisher side of blob replication.

use crate::blob::content_hash;
use crate::config::BlobSourceOptions;
use crate::error::ConfigError;
use crate::wire::{self, BLOB_TAG_FULL};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use sync_transport::Transport;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct SourceState {
    value: Vec<u8>,
    /// Cached `[0x00] ++ value` encoding, reused across updates.
    full_update: Vec<u8>,
    hash: [u8; 32],
    last_publish: Instant,
}

struct BlobSourceInner {
    subject: String,
    update_subject: String,
    transport: Arc<dyn Transport>,
    options: BlobSourceOptions,
    state: Mutex<SourceState>,
    destroyed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BlobSourceInner {
    /// Publish the current full update and note the publish time.
    fn republish(&self) {
        let payload = {
            let mut st = self.state.lock();
            st.last_publish = Instant::now();
            st.full_update.clone()
        };
        self.transport.publish(&self.update_subject, payload);
    }

    fn dispose(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        debug!(subject = %self.subject, "Blob source disposed");
    }
}

/// Publishes an opaque byte buffer and keeps it available for fetch.
///
/// Created via [`crate::SyncClient::blob_source`]. Dropping the handle
/// without [`BlobSource::dispose`] logs a leak warning and then tears down
/// anyway.
pub struct BlobSource {
    inner: Arc<BlobSourceInner>,
    disposed: bool,
}

impl BlobSource {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        subject: &str,
        initial: &[u8],
        options: BlobSourceOptions,
    ) -> Result<Self, ConfigError> {
        options.validate(subject)?;

        let inner = Arc::new(BlobSourceInner {
            subject: subject.to_string(),
            update_subject: wire::blob_update_subject(subject),
            transport,
            options,
            state: Mutex::new(SourceState {
                value: Vec::new(),
                full_update: vec![BLOB_TAG_FULL],
                hash: content_hash(&[]),
                last_publish: Instant::now(),
            }),
            destroyed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        let mut tasks = Vec::new();
        if inner.options.enable_fetching {
            tasks.push(tokio::spawn(fetch_responder(Arc::downgrade(&inner))));
        }
        if let Some(interval) = inner.options.periodic_update {
            tasks.push(tokio::spawn(periodic_update(Arc::downgrade(&inner), interval)));
        }
        if let Some(interval) = inner.options.periodic_advertise {
            tasks.push(tokio::spawn(periodic_advertise(
                Arc::downgrade(&inner),
                interval,
            )));
        }
        tasks.push(tokio::spawn(reconnect_watcher(Arc::downgrade(&inner))));
        *inner.tasks.lock() = tasks;

        let source = Self {
            inner,
            disposed: false,
        };
        source.update(initial);
        Ok(source)
    }

    /// Replace the authoritative value and broadcast a full update.
    pub fn update(&self, data: &[u8]) {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            debug!(subject = %self.inner.subject, "update() after dispose ignored");
            return;
        }

        {
            let mut st = self.inner.state.lock();
            st.value.clear();
            st.value.extend_from_slice(data);

            // Amortized allocation: grow when too small, shrink only when the
            // buffer is more than 1.5x + 20 bytes larger than needed.
            let needed = data.len() + 1;
            let cap = st.full_update.capacity();
            if needed > cap || cap > needed + needed / 2 + 20 {
                st.full_update = Vec::with_capacity(needed);
            }
            st.full_update.clear();
            st.full_update.push(BLOB_TAG_FULL);
            st.full_update.extend_from_slice(data);

            if self.inner.options.periodic_advertise.is_some() {
                st.hash = content_hash(data);
            }
        }

        self.inner.republish();
    }

    /// Current authoritative value.
    #[must_use]
    pub fn value(&self) -> Vec<u8> {
        self.inner.state.lock().value.clone()
    }

    /// Subject this source publishes under.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.inner.subject
    }

    /// Tear down the fetch responder and timers. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.inner.dispose();
    }
}

impl Drop for BlobSource {
    fn drop(&mut self) {
        if !self.disposed {
            warn!(
                subject = %self.inner.subject,
                "BlobSource was not disposed correctly. This leads to resource leaks."
            );
            self.inner.dispose();
        }
    }
}

/// Answers point-to-point fetch requests with the current value.
async fn fetch_responder(inner: Weak<BlobSourceInner>) {
    let Some(strong) = inner.upgrade() else {
        return;
    };
    let mut sub = strong
        .transport
        .subscribe(&wire::blob_fetch_subject(&strong.subject));
    drop(strong);

    while let Some(msg) = sub.recv().await {
        let Some(strong) = inner.upgrade() else {
            return;
        };
        msg.respond(strong.state.lock().value.clone());
    }
}

/// Republishes the full update unconditionally after each quiet interval.
async fn periodic_update(inner: Weak<BlobSourceInner>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(strong) = inner.upgrade() else {
            return;
        };
        let stale = strong.state.lock().last_publish.elapsed() >= interval;
        if stale {
            strong.republish();
        }
    }
}

/// Publishes a content-hash advertisement every interval.
async fn periodic_advertise(inner: Weak<BlobSourceInner>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(strong) = inner.upgrade() else {
            return;
        };
        let payload = wire::encode_blob_advertise(&strong.state.lock().hash);
        strong.transport.publish(&strong.update_subject, payload);
    }
}

/// Republishes the last full update when the transport reconnects, to
/// resynchronize subscribers that joined or reconnected during the outage.
async fn reconnect_watcher(inner: Weak<BlobSourceInner>) {
    let Some(strong) = inner.upgrade() else {
        return;
    };
    let mut status_rx = strong.transport.status();
    let mut was_connected = status_rx.borrow().is_connected();
    drop(strong);

    while status_rx.changed().await.is_ok() {
        let connected = status_rx.borrow().is_connected();
        if connected && !was_connected {
            let Some(strong) = inner.upgrade() else {
                return;
            };
            debug!(subject = %strong.subject, "Reconnected, republishing blob");
            strong.republish();
        }
        was_connected = connected;
    }
}
