//! Connection status of the underlying transport.

/// Connection state reported by a transport.
///
/// Consumers (replication sinks) watch this signal and flag their cached
/// state invalid whenever the status leaves [`ConnectionStatus::Connected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionStatus {
    /// No transport has been configured yet.
    NotConfigured,
    /// Initial connection attempt in progress.
    Connecting,
    /// Connected and operational.
    Connected,
    /// Connection lost, no reconnect attempt running yet.
    Disconnected,
    /// Connection lost, reconnect attempt in progress.
    Reconnecting,
    /// Unrecoverable transport error.
    Error,
}

impl ConnectionStatus {
    /// `true` only when the transport is fully operational.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}
