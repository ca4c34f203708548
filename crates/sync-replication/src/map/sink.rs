//! Subscriber side of map replication.

use crate::config::{MapSinkOptions, DEFAULT_REQUEST_TIMEOUT};
use crate::map::projection::{
    Projection, ProjectionCell, ProjectionKey, ProjectionSlot, TypedProjection,
};
use crate::registry::{Registry, SharedEntry};
use crate::retry::{RetryManager, RetryPolicy};
use crate::schema::Schema;
use crate::wire::{self, ChangeId, MapMessage, WireError, WireValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync_transport::Transport;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

struct MapSinkState {
    raw: HashMap<String, WireValue>,
    /// Change id of the last applied update; `None` until the first one.
    change_id: Option<ChangeId>,
    projections: HashMap<ProjectionKey, ProjectionSlot>,
}

/// Shared replica state, one per subject, multiplexed across handles.
pub(crate) struct MapSinkShared {
    subject: String,
    transport: Arc<dyn Transport>,
    options: MapSinkOptions,
    retry_policy: RetryPolicy,
    state: Mutex<MapSinkState>,
    valid_tx: watch::Sender<bool>,
    /// Bumped on every applied update, for change notification.
    version_tx: watch::Sender<u64>,
    destroyed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MapSinkShared {
    pub(crate) fn spawn(
        transport: Arc<dyn Transport>,
        subject: &str,
        options: MapSinkOptions,
        default_retry: RetryPolicy,
    ) -> Arc<Self> {
        let (valid_tx, _) = watch::channel(false);
        let (version_tx, _) = watch::channel(0u64);
        let retry_policy = options.retry_policy.unwrap_or(default_retry);

        let shared = Arc::new(Self {
            subject: subject.to_string(),
            transport,
            options,
            retry_policy,
            state: Mutex::new(MapSinkState {
                raw: HashMap::new(),
                change_id: None,
                projections: HashMap::new(),
            }),
            valid_tx,
            version_tx,
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

    pub(crate) fn subject(&self) -> &str {
        &self.subject
    }

    fn apply_entries(subject: &str, st: &mut MapSinkState, entries: HashMap<String, WireValue>) {
        for (key, value) in entries {
            if value.is_null() {
                st.raw.remove(&key);
                for slot in st.projections.values() {
                    slot.cell.remove(&key);
                }
            } else {
                for slot in st.projections.values() {
                    slot.cell.apply(subject, &key, &value);
                }
                st.raw.insert(key, value);
            }
        }
    }

    fn apply(&self, msg: MapMessage) {
        match msg {
            MapMessage::Full { change_id, entries } => {
                {
                    let mut st = self.state.lock();
                    // Unused projections are freed here; in-use ones are
                    // cleared and repopulated below.
                    st.projections.retain(|_, slot| {
                        if slot.instances == 0 {
                            false
                        } else {
                            slot.cell.clear();
                            true
                        }
                    });
                    st.raw.clear();
                    Self::apply_entries(&self.subject, &mut st, entries);
                    st.change_id = Some(change_id);
                }
                self.valid_tx.send_replace(true);
                self.version_tx.send_modify(|v| *v += 1);
            }
            MapMessage::Partial { change_id, entries } => {
                {
                    let mut st = self.state.lock();
                    Self::apply_entries(&self.subject, &mut st, entries);
                    st.change_id = Some(change_id);
                }
                self.valid_tx.send_replace(true);
                self.version_tx.send_modify(|v| *v += 1);
            }
            MapMessage::Advertise { change_id } => {
                let stale = self.state.lock().change_id != Some(change_id);
                if stale {
                    debug!(subject = %self.subject, "Advertised change id differs, replica is stale");
                    self.valid_tx.send_replace(false);
                }
            }
        }
    }

    fn handle_payload(&self, payload: &[u8]) {
        match wire::decode_map_message(payload) {
            Ok(msg) => self.apply(msg),
            Err(err @ WireError::TooShort { .. }) => {
                // Malformed frame: dropped without touching the replica.
                error!(subject = %self.subject, error = %err, "Dropping malformed map message");
            }
            Err(err) => {
                warn!(subject = %self.subject, error = %err, "Dropping undecodable map message");
                self.valid_tx.send_replace(false);
            }
        }
    }

    pub(crate) fn attach_projection<S: Schema>(self: &Arc<Self>, schema: S) -> Projection<S> {
        let mut st = self.state.lock();
        let key = ProjectionKey::for_schema(&schema);

        if matches!(key, ProjectionKey::Structural(_)) {
            if let Some(slot) = st.projections.get_mut(&key) {
                if let Ok(cell) = slot
                    .cell
                    .clone()
                    .as_any()
                    .downcast::<TypedProjection<S>>()
                {
                    slot.instances += 1;
                    return Projection::new(key, cell, self.clone());
                }
                // Same structural key but a different output type; cannot
                // happen with the built-in schemas. Fall through to a
                // private entry.
            }
        }

        let key = if st.projections.contains_key(&key) {
            ProjectionKey::unique()
        } else {
            key
        };
        let cell = Arc::new(TypedProjection::new(schema));
        for (raw_key, raw_value) in &st.raw {
            cell.apply(&self.subject, raw_key, raw_value);
        }
        st.projections.insert(
            key.clone(),
            ProjectionSlot {
                instances: 1,
                cell: cell.clone(),
            },
        );
        Projection::new(key, cell, self.clone())
    }

    pub(crate) fn detach_projection(&self, key: &ProjectionKey) {
        let mut st = self.state.lock();
        if let Some(slot) = st.projections.get_mut(key) {
            // Entries are kept (stale) so a quick re-attach skips the
            // rebuild; the next full update frees unused slots.
            slot.instances = slot.instances.saturating_sub(1);
        }
    }
}

impl SharedEntry for MapSinkShared {
    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        {
            let mut st = self.state.lock();
            st.raw.clear();
            st.projections.clear();
            st.change_id = None;
        }
        self.valid_tx.send_replace(false);
        debug!(subject = %self.subject, "Map sink destroyed");
    }
}

/// Applies update messages in delivery order; the optional source-timeout
/// watchdog declares the replica stale when the subject goes quiet.
async fn run_subscription(shared: Arc<MapSinkShared>) {
    let mut sub = shared
        .transport
        .subscribe(&wire::map_update_subject(&shared.subject));

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
        shared.handle_payload(&msg.payload);
    }
}

/// Flags the replica invalid the moment the transport leaves `Connected`.
async fn watch_status(shared: Arc<MapSinkShared>) {
    let mut status_rx = shared.transport.status();
    while status_rx.changed().await.is_ok() {
        if !status_rx.borrow().is_connected() {
            shared.valid_tx.send_replace(false);
        }
    }
}

/// Requests full state whenever the replica is invalid and the transport is
/// connected, backing off on failure.
async fn fetch_loop(shared: Arc<MapSinkShared>) {
    let fetch_subject = wire::map_fetch_subject(&shared.subject);
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
            Ok(reply) => {
                if shared.destroyed.load(Ordering::SeqCst) {
                    break;
                }
                match wire::decode_map_message(&reply) {
                    Ok(msg) => {
                        debug!(subject = %shared.subject, "Fetched map state");
                        shared.apply(msg);
                        retry.reset();
                    }
                    Err(err) => {
                        let delay = retry.next_delay();
                        warn!(
                            subject = %shared.subject,
                            error = %err,
                            backoff = ?delay,
                            "Fetched map state is undecodable, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
            Err(err) => {
                let delay = retry.next_delay();
                warn!(
                    subject = %shared.subject,
                    error = %err,
                    backoff = ?delay,
                    "Map fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Handle to a locally cached map replica.
///
/// Multiple handles for the same subject share one underlying subscription;
/// see [`crate::SyncClient::map_sink`].
pub struct MapSink {
    shared: Arc<MapSinkShared>,
    registry: Arc<Registry<MapSinkShared>>,
    grace: Duration,
    disposed: bool,
}

impl MapSink {
    pub(crate) fn new(
        shared: Arc<MapSinkShared>,
        registry: Arc<Registry<MapSinkShared>>,
        grace: Duration,
    ) -> Self {
        Self {
            shared,
            registry,
            grace,
            disposed: false,
        }
    }

    /// Raw (unvalidated) value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<WireValue> {
        self.shared.state.lock().raw.get(key).cloned()
    }

    /// Whether `key` is present in the raw replica.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.shared.state.lock().raw.contains_key(key)
    }

    /// Snapshot of the raw replica.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, WireValue> {
        self.shared.state.lock().raw.clone()
    }

    /// Number of raw entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().raw.len()
    }

    /// Whether the raw replica is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the replica reflects a transmission from the source.
    #[must_use]
    pub fn valid(&self) -> bool {
        *self.shared.valid_tx.borrow()
    }

    /// Watch the validity flag.
    #[must_use]
    pub fn valid_watch(&self) -> watch::Receiver<bool> {
        self.shared.valid_tx.subscribe()
    }

    /// Watch the update counter; bumped once per applied update.
    #[must_use]
    pub fn version_watch(&self) -> watch::Receiver<u64> {
        self.shared.version_tx.subscribe()
    }

    /// Attach a schema-validated projection.
    ///
    /// Structurally identical primitive schemas share one derived map and
    /// one validation pass per update; composite schemas always get their
    /// own.
    #[must_use]
    pub fn attach<S: Schema>(&self, schema: S) -> Projection<S> {
        self.shared.attach_projection(schema)
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

impl Drop for MapSink {
    fn drop(&mut self) {
        if !self.disposed {
            warn!(
                subject = %self.shared.subject,
                "MapSink was not disposed correctly. This leads to resource leaks."
            );
            self.disposed = true;
            self.registry.release(&self.shared.subject, self.grace);
        }
    }
}
