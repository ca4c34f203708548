//! The transport trait and subscription handle.

use crate::message::Message;
use crate::status::ConnectionStatus;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

/// Errors from transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport was shut down.
    #[error("Transport closed")]
    Closed,

    /// A request was published to a subject nobody is subscribed to.
    #[error("No responders for subject {0}")]
    NoResponders(String),

    /// No reply arrived within the request timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// A pub/sub transport with request/reply and a connection-status signal.
///
/// The contract is deliberately weak: at-most-once delivery, per-subject
/// ordering only, no durability. Everything stronger is built above.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish `payload` to `subject`. Fire-and-forget; publishing to a
    /// subject with no subscribers drops the message.
    fn publish(&self, subject: &str, payload: Vec<u8>);

    /// Subscribe to `subject`. Dropping the returned handle unsubscribes.
    fn subscribe(&self, subject: &str) -> Subscription;

    /// Publish a request and await the first reply.
    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Reactive connection-status signal.
    fn status(&self) -> watch::Receiver<ConnectionStatus>;
}

/// A subscription handle for receiving messages on one subject.
///
/// When dropped, the subscription is automatically cleaned up.
pub struct Subscription {
    subject: String,
    receiver: broadcast::Receiver<Message>,
}

impl Subscription {
    pub(crate) fn new(subject: String, receiver: broadcast::Receiver<Message>) -> Self {
        Self { subject, receiver }
    }

    /// Receive the next message.
    ///
    /// Returns `None` when the transport side of the channel is gone. A
    /// lagged subscriber skips the overwritten messages and keeps going;
    /// the replication layer recovers missed state via fetching.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(subject = %self.subject, lagged = count, "Subscriber lagged, messages dropped");
                    continue;
                }
            }
        }
    }

    /// Subject this subscription listens on.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Convert into a `Stream` of messages for use with stream combinators.
    /// Lagged gaps are skipped, like [`Subscription::recv`].
    pub fn into_stream(self) -> impl Stream<Item = Message> + Send {
        BroadcastStream::new(self.receiver).filter_map(|res| res.ok())
    }
}
