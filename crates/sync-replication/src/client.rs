//! Entry point tying a transport to source and sink factories.

use crate::blob::sink::BlobSinkShared;
use crate::blob::{BlobSink, BlobSource};
use crate::config::{BlobSinkOptions, BlobSourceOptions, MapSinkOptions, MapSourceOptions};
use crate::error::ConfigError;
use crate::map::sink::MapSinkShared;
use crate::map::{MapSink, MapSource};
use crate::registry::Registry;
use crate::retry::RetryPolicy;
use crate::DEFAULT_TEARDOWN_GRACE;
use std::sync::Arc;
use std::time::Duration;
use sync_transport::{ConnectionStatus, Transport};
use tokio::sync::watch;

/// Replication client for one transport connection.
///
/// Sinks created through the same client share per-subject state: asking
/// twice for the same subject returns two handles over one subscription.
/// Cloning the client is cheap and preserves that sharing.
#[derive(Clone)]
pub struct SyncClient {
    transport: Arc<dyn Transport>,
    blob_sinks: Arc<Registry<BlobSinkShared>>,
    map_sinks: Arc<Registry<MapSinkShared>>,
    default_retry: RetryPolicy,
    grace: Duration,
}

impl SyncClient {
    /// Create a client with the default retry policy and teardown grace.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            blob_sinks: Registry::new("blob-sink"),
            map_sinks: Registry::new("map-sink"),
            default_retry: RetryPolicy::default(),
            grace: DEFAULT_TEARDOWN_GRACE,
        }
    }

    /// Create a client with a custom default fetch backoff policy.
    /// Per-sink options can still override it.
    pub fn with_retry_policy(
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        policy.validate()?;
        let mut client = Self::new(transport);
        client.default_retry = policy;
        Ok(client)
    }

    /// Override the grace window between the last handle release and the
    /// teardown of the shared subscription.
    #[must_use]
    pub fn with_teardown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Connection status of the underlying transport.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.transport.status()
    }

    /// Publish a blob under `subject`, starting from `initial`.
    pub fn blob_source(
        &self,
        subject: &str,
        initial: &[u8],
        options: BlobSourceOptions,
    ) -> Result<BlobSource, ConfigError> {
        BlobSource::new(self.transport.clone(), subject, initial, options)
    }

    /// Subscribe to the blob published under `subject`.
    ///
    /// Handles for the same subject share one underlying subscription; the
    /// first handle's options win for the lifetime of the shared state.
    #[must_use]
    pub fn blob_sink(&self, subject: &str, options: BlobSinkOptions) -> BlobSink {
        let shared = self.blob_sinks.acquire(subject, || {
            BlobSinkShared::spawn(
                self.transport.clone(),
                subject,
                options,
                self.default_retry,
            )
        });
        BlobSink::new(shared, self.blob_sinks.clone(), self.grace)
    }

    /// Publish a map under `subject`, starting empty.
    pub fn map_source(
        &self,
        subject: &str,
        options: MapSourceOptions,
    ) -> Result<MapSource, ConfigError> {
        MapSource::new(self.transport.clone(), subject, options)
    }

    /// Subscribe to the map published under `subject`.
    ///
    /// Same sharing rule as [`SyncClient::blob_sink`].
    #[must_use]
    pub fn map_sink(&self, subject: &str, options: MapSinkOptions) -> MapSink {
        let shared = self.map_sinks.acquire(subject, || {
            MapSinkShared::spawn(
                self.transport.clone(),
                subject,
                options,
                self.default_retry,
            )
        });
        MapSink::new(shared, self.map_sinks.clone(), self.grace)
    }
}
