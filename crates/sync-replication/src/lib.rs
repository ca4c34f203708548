//! # Sync Replication - State Replication over Pub/Sub
//!
//! Replicates a single byte blob ([`BlobSource`]/[`BlobSink`]) or a
//! key-value map ([`MapSource`]/[`MapSink`]) from one publisher to many
//! subscribers over an unordered, at-most-once transport, adding the
//! guarantees the transport does not provide:
//!
//! - **Consistency recovery** - sinks detect missed updates via change-id
//!   advertisements and re-fetch full state from the source, with
//!   exponential backoff ([`RetryManager`]).
//! - **Reconnect awareness** - sinks flag their replica invalid the moment
//!   the connection status leaves `Connected`; sources republish on
//!   reconnect.
//! - **Reference-counted lifecycle** - any number of sink handles for the
//!   same subject share one underlying subscription; teardown is deferred
//!   by a grace window to absorb immediate re-subscription.
//!
//! ## Consistency model
//!
//! A sink's `valid` flag means its value reflects *some past* transmission
//! from the source, not that it momentarily equals the authoritative value.
//! Eventual convergence holds while the transport stays connected.
//!
//! Non-goals: exactly-once delivery, cross-subject ordering, publisher
//! authentication, persistence beyond process lifetime.

pub mod blob;
pub mod client;
pub mod config;
pub mod error;
pub mod map;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod wire;

// Re-export main types
pub use blob::{BlobSink, BlobSource};
pub use client::SyncClient;
pub use config::{BlobSinkOptions, BlobSourceOptions, MapSinkOptions, MapSourceOptions};
pub use error::{ConfigError, ValidationError};
pub use map::{MapSink, MapSource, Projection};
pub use retry::{RetryManager, RetryPolicy};
pub use schema::{
    validator_fn, AnySchema, BoolSchema, BytesSchema, FloatSchema, IntSchema, Schema, StringSchema,
};
pub use wire::{ChangeId, WireError, WireValue};

/// Grace window between the last handle release and actual teardown of a
/// shared subscription. Absorbs the dispose-then-recreate pattern of a UI
/// re-render.
pub const DEFAULT_TEARDOWN_GRACE: std::time::Duration = std::time::Duration::from_millis(100);
