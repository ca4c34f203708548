//! Blob replication: one opaque byte buffer, one publisher, many replicas.

pub mod sink;
pub mod source;

pub use sink::BlobSink;
pub use source::BlobSource;

use sha2::{Digest, Sha256};

/// SHA-256 content hash used in blob advertisements.
#[must_use]
pub(crate) fn content_hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
