//! Subscriber side of blob replication.

use crate::blob::content_hash;
use crate::config::{BlobSinkOptions, DEFAULT_REQUEST_TIMEOUT};
use crate::registry::{Registry, SharedEntry};
use crate::retry::{RetryManager, RetryPolicy};
use crate::wire::{self, BlobMessage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync_transport::Transport;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Shared replica state, one per subject, multiplexed across handles.
pub(crate) struct BlobSinkShared {
    subject: String,
    transport: Arc<dyn Transport>,
    options: BlobSinkOptions,
    retry_policy: RetryPolicy,
    value_tx: watch::Sender<Arc<[u8]>>,
    valid_tx: watch::Sender<bool>,
    /// Hash of the currently cached value, compared against advertisements.
    hash: Mutex<[u8; 32]>,
    destroyed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BlobSinkShared {
    pub(crate) fn spawn(
        transport: Arc<dyn Transport>,
        subject: &str,
        options: BlobSinkOptions,
        default_retry: RetryPolicy,
    ) -> Arc<Self> {
        let (value_tx, _) = watch::channel::<Arc<[u8]>>(Vec::new().into());
        let (valid_tx, _) = watch::channel(false);
        let retry_policy = options.retry_policy.unwrap_or(default_retry);

        let shared = Arc::new(Self {
            subject: subject.to_string(),
            transport,
            options,
            retry_policy,
            value_tx,
            valid_tx,
            hash: Mutex::new(content_hash(&[])),
            destroyed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        let mut tasks = vec![
            tokio::spawn(run_subscription(shared.clone())),
            tokio::spawn(watch_status(shared.clone())),
        ];
        if shared.options.enable_fetching {
            tasks.push(tokio::spawn(fetch_loop(shared.clone())));
        }
        *shared.tasks.lock() = tasks;
        shared
    }

    fn install(&self, data: Vec<u8>) {
        *self.hash.lock() = content_hash(&data);
        self.value_tx.send_replace(data.into());
        self.valid_tx.send_replace(true);
    }

    fn handle_message(&self, payload: &[u8]) {
        match wire::decode_blob_message(payload) {
            Ok(BlobMessage::Full(data)) => self.install(data),
            Ok(BlobMessage::Advertise(hash)) => {
                if hash[..] != self.hash.lock()[..] {
                    debug!(subject = %self.subject, "Advertised hash differs, replica is stale");
                    self.valid_tx.send_replace(false);
                }
            }
            Err(err) => {
                warn!(subject = %self.subject, error = %err, "Dropping malformed blob message");
                self.value_tx.send_replace(Vec::new().into());
                self.valid_tx.send_replace(false);
            }
        }
    }
}

impl SharedEntry for BlobSinkShared {
    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        // Release the buffer; handles that survive teardown read empty.
        self.value_tx.send_replace(Vec::new().into());
        self.valid_tx.send_replace(false);
        debug!(subject = %self.subject, "Blob sink destroyed");
    }
}

/// Applies update messages in delivery order; the optional source-timeout
/// watchdog declares the replica stale when the subject goes quiet.
async fn run_subscription(shared: Arc<BlobSinkShared>) {
    let mut sub = shared
        .transport
        .subscribe(&wire::blob_update_subject(&shared.subject));

    loop {
        let msg = match shared.options.source_timeout {
            Some(window) => match tokio::time::timeout(window, sub.recv()).await {
                Ok(msg) => msg,
                Err(_) => {
                    debug!(subject = %shared.subject, "Source timeout, marking replica invalid");
                    shared.valid_tx.send_replace(false);
                    continue;
                }
            },
            None => sub.recv().await,
        };
        let Some(msg) = msg else {
            break;
        };
        shared.handle_message(&msg.payload);
    }
}

/// Flags the replica invalid the moment the transport leaves `Connected`.
async fn watch_status(shared: Arc<BlobSinkShared>) {
    let mut status_rx = shared.transport.status();
    while status_rx.changed().await.is_ok() {
        if !status_rx.borrow().is_connected() {
            shared.valid_tx.send_replace(false);
        }
    }
}

/// Requests full state whenever the replica is invalid and the transport is
/// connected, backing off on failure. Runs until the shared state is
/// destroyed (task abort cancels any in-flight wait).
async fn fetch_loop(shared: Arc<BlobSinkShared>) {
    let fetch_subject = wire::blob_fetch_subject(&shared.subject);
    let request_timeout = shared.options.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
    let mut retry = RetryManager::new(shared.retry_policy);
    let mut valid_rx = shared.valid_tx.subscribe();
    let mut status_rx = shared.transport.status();

    loop {
        if shared.destroyed.load(Ordering::SeqCst) {
            break;
        }
        if *valid_rx.borrow_and_update() {
            if valid_rx.changed().await.is_err() {
                break;
            }
            continue;
        }
        if !status_rx.borrow_and_update().is_connected() {
            if status_rx.changed().await.is_err() {
                break;
            }
            continue;
        }

        match shared
            .transport
            .request(&fetch_subject, Vec::new(), request_timeout)
            .await
        {
            Ok(data) => {
                if shared.destroyed.load(Ordering::SeqCst) {
                    break;
                }
                debug!(subject = %shared.subject, bytes = data.len(), "Fetched blob state");
                shared.install(data);
                retry.reset();
            }
            Err(err) => {
                let delay = retry.next_delay();
                warn!(
                    subject = %shared.subject,
                    error = %err,
                    backoff = ?delay,
                    "Blob fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Handle to a locally cached blob replica.
///
/// Multiple handles for the same subject share one underlying subscription;
/// see [`crate::SyncClient::blob_sink`].
pub struct BlobSink {
    shared: Arc<BlobSinkShared>,
    registry: Arc<Registry<BlobSinkShared>>,
    grace: Duration,
    disposed: bool,
}

impl BlobSink {
    pub(crate) fn new(
        shared: Arc<BlobSinkShared>,
        registry: Arc<Registry<BlobSinkShared>>,
        grace: Duration,
    ) -> Self {
        Self {
            shared,
            registry,
            grace,
            disposed: false,
        }
    }

    /// The cached replica bytes. May be stale; check [`BlobSink::valid`].
    #[must_use]
    pub fn value(&self) -> Arc<[u8]> {
        self.shared.value_tx.borrow().clone()
    }

    /// Whether the replica reflects a transmission from the source.
    #[must_use]
    pub fn valid(&self) -> bool {
        *self.shared.valid_tx.borrow()
    }

    /// Watch the replica value.
    #[must_use]
    pub fn value_watch(&self) -> watch::Receiver<Arc<[u8]>> {
        self.shared.value_tx.subscribe()
    }

    /// Watch the validity flag.
    #[must_use]
    pub fn valid_watch(&self) -> watch::Receiver<bool> {
        self.shared.valid_tx.subscribe()
    }

    /// Subject this sink replicates.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.shared.subject
    }

    /// Release this handle. The underlying subscription is torn down after
    /// a grace window once the last handle is gone. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.registry.release(&self.shared.subject, self.grace);
    }
}

impl Drop for BlobSink {
    fn drop(&mut self) {
        if !self.disposed {
            warn!(
                subject = %self.shared.subject,
                "BlobSink was not disposed correctly. This leads to resource leaks."
            );
            self.disposed = true;
            self.registry.release(&self.shared.subject, self.grace);
        }
    }
}
