//! Cross-crate integration flows over the in-memory transport.

pub mod blob_replication;
pub mod lifecycle;
pub mod map_replication;
pub mod recovery;
