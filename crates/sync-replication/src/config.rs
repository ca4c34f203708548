//! Per-entity options for sources and sinks.

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use std::time::Duration;

/// Default timeout for fetch request/reply round trips.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Options for publishing a blob.
#[derive(Debug, Clone, Default)]
pub struct BlobSourceOptions {
    /// Republish the full value unconditionally every interval. Guards
    /// against subscribers that joined between updates or missed a message.
    pub periodic_update: Option<Duration>,

    /// Publish a content-hash advertisement every interval so sinks can
    /// cheaply verify they are current.
    pub periodic_advertise: Option<Duration>,

    /// Answer point-to-point fetch requests. Recommended for values that
    /// do not change on a regular basis.
    pub enable_fetching: bool,
}

impl BlobSourceOptions {
    pub(crate) fn validate(&self, subject: &str) -> Result<(), ConfigError> {
        if self.periodic_advertise.is_some() && !self.enable_fetching {
            return Err(ConfigError::AdvertiseWithoutFetching {
                subject: subject.to_string(),
            });
        }
        Ok(())
    }
}

/// Options for subscribing to a blob.
#[derive(Debug, Clone, Default)]
pub struct BlobSinkOptions {
    /// Run the fetch loop: request full state whenever the replica is
    /// invalid and the transport is connected.
    pub enable_fetching: bool,

    /// Declare the replica invalid when no message (update or
    /// advertisement) arrives within this window.
    pub source_timeout: Option<Duration>,

    /// Timeout per fetch round trip.
    pub request_timeout: Option<Duration>,

    /// Backoff policy override for the fetch loop.
    pub retry_policy: Option<RetryPolicy>,
}

/// Options for publishing a map.
#[derive(Debug, Clone)]
pub struct MapSourceOptions {
    /// Re-send entries whose last write is older than this interval.
    /// Keeps slow subscribers eventually consistent without re-sending
    /// everything on every tick.
    pub periodic_update: Option<Duration>,

    /// Publish a change-id advertisement every interval.
    pub periodic_advertise: Option<Duration>,

    /// Answer point-to-point fetch requests.
    pub enable_fetching: bool,
}

impl Default for MapSourceOptions {
    fn default() -> Self {
        Self {
            periodic_update: None,
            periodic_advertise: None,
            enable_fetching: true,
        }
    }
}

impl MapSourceOptions {
    pub(crate) fn validate(&self, subject: &str) -> Result<(), ConfigError> {
        if self.periodic_advertise.is_some() && !self.enable_fetching {
            return Err(ConfigError::AdvertiseWithoutFetching {
                subject: subject.to_string(),
            });
        }
        Ok(())
    }
}

/// Options for subscribing to a map.
#[derive(Debug, Clone, Default)]
pub struct MapSinkOptions {
    /// Run the fetch loop (see [`BlobSinkOptions::enable_fetching`]).
    pub enable_fetching: bool,

    /// Declare the replica invalid when no traffic arrives in this window.
    pub source_timeout: Option<Duration>,

    /// Timeout per fetch round trip.
    pub request_timeout: Option<Duration>,

    /// Backoff policy override for the fetch loop.
    pub retry_policy: Option<RetryPolicy>,
}
