//! In-memory transport implementation.

use crate::message::{Message, ReplyHandle};
use crate::status::ConnectionStatus;
use crate::transport::{Subscription, Transport, TransportError};
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

/// In-memory implementation of the transport.
///
/// Uses one `tokio::sync::broadcast` channel per subject for multi-producer,
/// multi-consumer fan-out. Suitable for single-process operation and tests;
/// a networked deployment would wrap a real message bus client behind the
/// same [`Transport`] trait.
///
/// The status signal starts at [`ConnectionStatus::Connected`] - an
/// in-process bus has no handshake. Tests drive disconnect/reconnect
/// transitions via [`MemoryTransport::set_status`].
pub struct MemoryTransport {
    /// Broadcast sender per subject, created lazily.
    subjects: Arc<RwLock<HashMap<String, broadcast::Sender<Message>>>>,

    /// Connection status signal.
    status_tx: watch::Sender<ConnectionStatus>,

    /// Channel capacity for new subjects.
    capacity: usize,
}

impl MemoryTransport {
    /// Create a new in-memory transport with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new in-memory transport with specified per-subject capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Connected);
        Self {
            subjects: Arc::new(RwLock::new(HashMap::new())),
            status_tx,
            capacity,
        }
    }

    /// Override the connection status, waking all watchers.
    pub fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
    }

    /// Number of live subscribers on `subject`.
    #[must_use]
    pub fn subscriber_count(&self, subject: &str) -> usize {
        let Ok(subjects) = self.subjects.read() else {
            return 0;
        };
        subjects
            .get(subject)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Channel capacity used for new subjects.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn sender_for(&self, subject: &str) -> broadcast::Sender<Message> {
        let mut subjects = self.subjects.write().unwrap_or_else(|e| e.into_inner());
        subjects
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    fn live_sender(&self, subject: &str) -> Option<broadcast::Sender<Message>> {
        let subjects = self.subjects.read().ok()?;
        subjects
            .get(subject)
            .filter(|tx| tx.receiver_count() > 0)
            .cloned()
    }

    fn deliver(&self, msg: Message) -> usize {
        let subject = msg.subject.clone();
        match self.live_sender(&subject) {
            Some(tx) => match tx.send(msg) {
                Ok(receivers) => {
                    debug!(subject = %subject, receivers, "Message published");
                    receivers
                }
                Err(_) => {
                    debug!(subject = %subject, "Message dropped (no receivers)");
                    0
                }
            },
            None => {
                debug!(subject = %subject, "Message dropped (no receivers)");
                0
            }
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn publish(&self, subject: &str, payload: Vec<u8>) {
        self.deliver(Message::new(subject, payload));
    }

    fn subscribe(&self, subject: &str) -> Subscription {
        let receiver = self.sender_for(subject).subscribe();
        debug!(subject = %subject, "New subscription created");
        Subscription::new(subject.to_string(), receiver)
    }

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        if self.live_sender(subject).is_none() {
            warn!(subject = %subject, "Request failed: no responders");
            return Err(TransportError::NoResponders(subject.to_string()));
        }

        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        let msg = Message {
            subject: subject.to_string(),
            payload: payload.into(),
            reply: Some(ReplyHandle::new(reply_tx)),
        };
        if self.deliver(msg) == 0 {
            return Err(TransportError::NoResponders(subject.to_string()));
        }

        match tokio::time::timeout(timeout, reply_rx.recv()).await {
            Ok(Some(reply)) => Ok(reply),
            // All reply handles dropped without answering.
            Ok(None) => Err(TransportError::NoResponders(subject.to_string())),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }
}
