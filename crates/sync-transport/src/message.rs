//! Messages delivered to subscribers.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// A message received from a subscription.
///
/// Messages are fanned out to every subscriber of a subject, so the payload
/// is cheaply cloneable. Request messages carry a [`ReplyHandle`]; plain
/// publishes do not.
#[derive(Debug, Clone)]
pub struct Message {
    /// Subject the message was published to.
    pub subject: String,

    /// Opaque payload bytes.
    pub payload: Arc<[u8]>,

    /// Reply channel, present only for request messages.
    pub reply: Option<ReplyHandle>,
}

impl Message {
    /// Create a plain (non-request) message.
    #[must_use]
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            reply: None,
        }
    }

    /// Respond to a request message.
    ///
    /// A no-op (logged at debug) when the message is not a request or the
    /// requester already went away.
    pub fn respond(&self, payload: Vec<u8>) {
        match &self.reply {
            Some(handle) => handle.send(payload),
            None => debug!(subject = %self.subject, "respond() on non-request message"),
        }
    }
}

/// Handle used to answer a request message.
///
/// Cloneable because messages are fanned out over a broadcast channel; only
/// the first reply is observed by the requester.
#[derive(Debug, Clone)]
pub struct ReplyHandle {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ReplyHandle {
    pub(crate) fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx }
    }

    /// Deliver a reply. Late or duplicate replies are dropped silently.
    pub fn send(&self, payload: Vec<u8>) {
        if self.tx.try_send(payload).is_err() {
            debug!("reply dropped (requester gone or already answered)");
        }
    }
}
