//! # Sync Transport - Pub/Sub Transport Abstraction
//!
//! Thin transport layer the replication protocol is built on. The transport
//! provides *only*:
//!
//! - `publish` - fire-and-forget broadcast to a subject
//! - `subscribe` - an async sequence of messages for a subject
//! - `request` - point-to-point request/reply with a timeout
//! - `status` - a reactive connection-status signal
//!
//! It deliberately provides **no** delivery, ordering or durability
//! guarantees across subjects; the replication layer on top is responsible
//! for consistency recovery.
//!
//! ## Implementations
//!
//! - [`MemoryTransport`] - broadcast-channel backed in-process bus
//! - [`FaultInjector`] - delegating wrapper that drops messages, for tests

pub mod fault;
pub mod memory;
pub mod message;
pub mod status;
pub mod transport;

// Re-export main types
pub use fault::FaultInjector;
pub use memory::MemoryTransport;
pub use message::{Message, ReplyHandle};
pub use status::ConnectionStatus;
pub use transport::{Subscription, Transport, TransportError};

/// Maximum messages to buffer per subscriber before old messages are dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;
