//! Publisher side of map replication.

use crate::config::MapSourceOptions;
use crate::error::ConfigError;
use crate::wire::{self, ChangeId, WireValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use sync_transport::Transport;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

struct MapEntry {
    value: WireValue,
    last_update: Instant,
}

struct MapSourceState {
    entries: HashMap<String, MapEntry>,
    change_id: ChangeId,
    /// Cached tag-0x01 full encoding; cleared on every modification.
    full_update: Option<Vec<u8>>,
}

struct MapSourceInner {
    subject: String,
    update_subject: String,
    transport: Arc<dyn Transport>,
    options: MapSourceOptions,
    state: Mutex<MapSourceState>,
    /// Serializes batched `update`/`replace` calls, FIFO-fair.
    batch_lock: tokio::sync::Mutex<()>,
    destroyed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MapSourceInner {
    /// Regenerate the change id and drop the cached full encoding. Call on
    /// every content-modifying write.
    fn modified(st: &mut MapSourceState) {
        st.change_id = ChangeId::random();
        st.full_update = None;
    }

    fn build_full_update(&self, st: &mut MapSourceState) -> Option<Vec<u8>> {
        if st.full_update.is_none() {
            let entries: HashMap<String, WireValue> = st
                .entries
                .iter()
                .map(|(key, entry)| (key.clone(), entry.value.clone()))
                .collect();
            match wire::encode_map_update(true, &st.change_id, &entries) {
                Ok(msg) => st.full_update = Some(msg),
                Err(err) => {
                    error!(subject = %self.subject, error = %err, "Failed to encode full update");
                    return None;
                }
            }
        }
        st.full_update.clone()
    }

    fn publish_full(&self) {
        let payload = self.build_full_update(&mut self.state.lock());
        if let Some(payload) = payload {
            self.transport.publish(&self.update_subject, payload);
        }
    }

    fn publish_partial(&self, change_id: &ChangeId, entries: &HashMap<String, WireValue>) {
        match wire::encode_map_update(false, change_id, entries) {
            Ok(payload) => self.transport.publish(&self.update_subject, payload),
            Err(err) => {
                error!(subject = %self.subject, error = %err, "Failed to encode partial update");
            }
        }
    }

    fn dispose(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        debug!(subject = %self.subject, "Map source disposed");
    }
}

/// Publishes and serves a mutable key-value map.
///
/// Created via [`crate::SyncClient::map_source`]. In partial updates a
/// [`WireValue::Null`] entry means deletion, so a live `Null` cannot be
/// stored: `set(key, WireValue::Null)` removes the key.
pub struct MapSource {
    inner: Arc<MapSourceInner>,
    disposed: bool,
}

impl MapSource {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        subject: &str,
        options: MapSourceOptions,
    ) -> Result<Self, ConfigError> {
        options.validate(subject)?;

        let inner = Arc::new(MapSourceInner {
            subject: subject.to_string(),
            update_subject: wire::map_update_subject(subject),
            transport,
            options,
            state: Mutex::new(MapSourceState {
                entries: HashMap::new(),
                change_id: ChangeId::random(),
                full_update: None,
            }),
            batch_lock: tokio::sync::Mutex::new(()),
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

        Ok(Self {
            inner,
            disposed: false,
        })
    }

    /// Set one key. A no-op when the value is unchanged; `Null` deletes.
    pub fn set(&self, key: &str, value: impl Into<WireValue>) {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            debug!(subject = %self.inner.subject, "set() after dispose ignored");
            return;
        }
        let value = value.into();

        let change_id = {
            let mut st = self.inner.state.lock();
            let changed = match st.entries.get(key) {
                Some(entry) => entry.value != value,
                None => !value.is_null(),
            };
            if !changed {
                return;
            }
            if value.is_null() {
                st.entries.remove(key);
            } else {
                st.entries.insert(
                    key.to_string(),
                    MapEntry {
                        value: value.clone(),
                        last_update: Instant::now(),
                    },
                );
            }
            MapSourceInner::modified(&mut st);
            st.change_id
        };

        let mut entries = HashMap::with_capacity(1);
        entries.insert(key.to_string(), value);
        self.inner.publish_partial(&change_id, &entries);
    }

    /// Current value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<WireValue> {
        self.inner
            .state
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.state.lock().entries.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Update multiple values at once; keys absent from `data` are deleted.
    ///
    /// Publishes one partial update containing only the changed keys, or
    /// nothing when there is no diff. Concurrent batched calls on the same
    /// source are serialized FIFO.
    pub async fn update(&self, data: HashMap<String, WireValue>) {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            debug!(subject = %self.inner.subject, "update() after dispose ignored");
            return;
        }
        let _guard = self.inner.batch_lock.lock().await;

        let published = {
            let mut st = self.inner.state.lock();
            let now = Instant::now();

            // Symmetric difference against current state.
            let mut diff: HashMap<String, WireValue> = HashMap::new();
            for key in st.entries.keys() {
                if !data.contains_key(key) {
                    diff.insert(key.clone(), WireValue::Null);
                }
            }
            for (key, value) in &data {
                if value.is_null() {
                    if st.entries.contains_key(key) {
                        diff.insert(key.clone(), WireValue::Null);
                    }
                    continue;
                }
                let changed = st.entries.get(key).is_none_or(|entry| entry.value != *value);
                if changed {
                    diff.insert(key.clone(), value.clone());
                }
            }
            if diff.is_empty() {
                None
            } else {
                for (key, value) in &diff {
                    if value.is_null() {
                        st.entries.remove(key);
                    } else {
                        st.entries.insert(
                            key.clone(),
                            MapEntry {
                                value: value.clone(),
                                last_update: now,
                            },
                        );
                    }
                }
                MapSourceInner::modified(&mut st);
                Some((st.change_id, diff))
            }
        };

        if let Some((change_id, diff)) = published {
            self.inner.publish_partial(&change_id, &diff);
        }
    }

    /// Overwrite all values with `data`. Always publishes a full update,
    /// even without a diff.
    pub async fn replace(&self, data: HashMap<String, WireValue>) {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            debug!(subject = %self.inner.subject, "replace() after dispose ignored");
            return;
        }
        let _guard = self.inner.batch_lock.lock().await;

        {
            let mut st = self.inner.state.lock();
            let now = Instant::now();
            st.entries.clear();
            for (key, value) in data {
                if !value.is_null() {
                    st.entries.insert(
                        key,
                        MapEntry {
                            value,
                            last_update: now,
                        },
                    );
                }
            }
            MapSourceInner::modified(&mut st);
        }

        self.inner.publish_full();
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

impl Drop for MapSource {
    fn drop(&mut self) {
        if !self.disposed {
            warn!(
                subject = %self.inner.subject,
                "MapSource was not disposed correctly. This leads to resource leaks."
            );
            self.inner.dispose();
        }
    }
}

/// Answers fetch requests with the full-map encoding.
async fn fetch_responder(inner: Weak<MapSourceInner>) {
    let Some(strong) = inner.upgrade() else {
        return;
    };
    let mut sub = strong
        .transport
        .subscribe(&wire::map_fetch_subject(&strong.subject));
    drop(strong);

    while let Some(msg) = sub.recv().await {
        let Some(strong) = inner.upgrade() else {
            return;
        };
        let payload = strong.build_full_update(&mut strong.state.lock());
        if let Some(payload) = payload {
            msg.respond(payload);
        }
    }
}

/// Re-sends entries whose last write is older than the interval. Keeps slow
/// subscribers eventually consistent without re-sending everything on every
/// tick.
async fn periodic_update(inner: Weak<MapSourceInner>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(strong) = inner.upgrade() else {
            return;
        };
        let stale = {
            let mut st = strong.state.lock();
            let now = Instant::now();
            let mut stale: HashMap<String, WireValue> = HashMap::new();
            for (key, entry) in &mut st.entries {
                if now.duration_since(entry.last_update) >= interval {
                    entry.last_update = now;
                    stale.insert(key.clone(), entry.value.clone());
                }
            }
            if stale.is_empty() {
                None
            } else {
                Some((st.change_id, stale))
            }
        };
        if let Some((change_id, entries)) = stale {
            strong.publish_partial(&change_id, &entries);
        }
    }
}

/// Publishes the current change id so sinks can cheaply verify freshness.
async fn periodic_advertise(inner: Weak<MapSourceInner>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(strong) = inner.upgrade() else {
            return;
        };
        let change_id = strong.state.lock().change_id;
        strong
            .transport
            .publish(&strong.update_subject, wire::encode_map_advertise(&change_id));
    }
}

/// Republishes the full state when the transport reconnects.
async fn reconnect_watcher(inner: Weak<MapSourceInner>) {
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
            debug!(subject = %strong.subject, "Reconnected, republishing map");
            strong.publish_full();
        }
        was_connected = connected;
    }
}
