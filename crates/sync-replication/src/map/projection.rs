//! Validated projections: typed, shared derived views of a map replica.
//!
//! A projection applies a [`Schema`] to every raw value and memoizes the
//! result. Projections are re-validated incrementally as updates arrive, so
//! N logical subscribers sharing one schema cost one validation pass per
//! update, not N.

use crate::map::sink::MapSinkShared;
use crate::schema::Schema;
use crate::wire::WireValue;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

static NEXT_PROJECTION_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a projection within one sink.
///
/// Primitive schemas share by structural key; everything else gets a unique
/// id, so structurally identical composite validators never share (an
/// intentional approximation).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ProjectionKey {
    Structural(String),
    Unique(u64),
}

impl ProjectionKey {
    pub(crate) fn for_schema<S: Schema>(schema: &S) -> Self {
        match schema.structural_key() {
            Some(key) => Self::Structural(key),
            None => Self::Unique(NEXT_PROJECTION_ID.fetch_add(1, Ordering::Relaxed)),
        }
    }

    pub(crate) fn unique() -> Self {
        Self::Unique(NEXT_PROJECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Type-erased projection storage, driven by the sink's update path.
pub(crate) trait ProjectionCell: Send + Sync {
    /// Validate and store one entry. Failures store `None` and log.
    fn apply(&self, subject: &str, key: &str, value: &WireValue);

    /// Remove one entry (key deleted upstream).
    fn remove(&self, key: &str);

    /// Drop all entries (full update incoming).
    fn clear(&self);

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// One projection slot in a sink: the cell plus its handle count.
pub(crate) struct ProjectionSlot {
    pub(crate) instances: usize,
    pub(crate) cell: Arc<dyn ProjectionCell>,
}

pub(crate) struct TypedProjection<S: Schema> {
    schema: S,
    entries: RwLock<HashMap<String, Option<S::Output>>>,
}

impl<S: Schema> TypedProjection<S> {
    pub(crate) fn new(schema: S) -> Self {
        Self {
            schema,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<S: Schema> ProjectionCell for TypedProjection<S> {
    fn apply(&self, subject: &str, key: &str, value: &WireValue) {
        let validated = match self.schema.validate(value) {
            Ok(output) => Some(output),
            Err(err) => {
                warn!(subject = %subject, key = %key, error = %err, "Value failed projection validation");
                None
            }
        };
        self.entries.write().insert(key.to_string(), validated);
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    fn clear(&self) {
        self.entries.write().clear();
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Handle to a shared, schema-validated derived map.
///
/// Obtained from [`crate::MapSink::attach`]. Entries that failed validation
/// read as `Some(None)`; absent keys read as `None`.
pub struct Projection<S: Schema> {
    key: ProjectionKey,
    cell: Arc<TypedProjection<S>>,
    shared: Arc<MapSinkShared>,
    detached: bool,
}

impl<S: Schema> Projection<S> {
    pub(crate) fn new(
        key: ProjectionKey,
        cell: Arc<TypedProjection<S>>,
        shared: Arc<MapSinkShared>,
    ) -> Self {
        Self {
            key,
            cell,
            shared,
            detached: false,
        }
    }

    /// Validated value for `key`: `None` when absent, `Some(None)` when the
    /// raw value failed validation.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Option<S::Output>> {
        self.cell.entries.read().get(key).cloned()
    }

    /// Snapshot of all validated entries.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Option<S::Output>> {
        self.cell.entries.read().clone()
    }

    /// Number of entries (including failed validations).
    #[must_use]
    pub fn len(&self) -> usize {
        self.cell.entries.read().len()
    }

    /// Whether the projection has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` when two handles share the same underlying derived map.
    #[must_use]
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Release this handle. The derived map is kept (stale) until the next
    /// full update finds it unused, so a quick re-attach skips the rebuild
    /// cost. Idempotent.
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        self.shared.detach_projection(&self.key);
    }
}

impl<S: Schema> Drop for Projection<S> {
    fn drop(&mut self) {
        if !self.detached {
            warn!(
                subject = %self.shared.subject(),
                "Projection was not detached correctly. This leads to resource leaks."
            );
            self.detached = true;
            self.shared.detach_projection(&self.key);
        }
    }
}
