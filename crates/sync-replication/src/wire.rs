//! Wire format for replication messages.
//!
//! Blob update payload: `[tag] ++ body`, where tag `0x00` is a full update
//! (body = raw bytes) and `0x01` an advertisement (body = 32-byte SHA-256
//! content hash).
//!
//! Map update payload: `[tag] ++ change_id (16 bytes) ++ body`, where tag
//! `0x01` is a full update, `0x02` a partial update (body = encoded
//! key/value entries) and `0x03` an advertisement (no body). Anything
//! shorter than 17 bytes is malformed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Blob full-update tag.
pub const BLOB_TAG_FULL: u8 = 0x00;
/// Blob advertisement tag.
pub const BLOB_TAG_ADVERTISE: u8 = 0x01;

/// Map full-update tag.
pub const MAP_TAG_FULL: u8 = 0x01;
/// Map partial-update tag.
pub const MAP_TAG_PARTIAL: u8 = 0x02;
/// Map advertisement tag.
pub const MAP_TAG_ADVERTISE: u8 = 0x03;

/// Length of a [`ChangeId`] in bytes.
pub const CHANGE_ID_LEN: usize = 16;

/// Minimum valid map message: tag + change id.
pub const MAP_MIN_LEN: usize = 1 + CHANGE_ID_LEN;

/// Subject prefix for blob update broadcasts.
pub const BLOB_UPDATE_PREFIX: &str = "blob.sink.v1";
/// Subject prefix for blob fetch requests.
pub const BLOB_FETCH_PREFIX: &str = "blob.source.v1";
/// Subject prefix for map update broadcasts.
pub const MAP_UPDATE_PREFIX: &str = "map.sink.v2";
/// Subject prefix for map fetch requests.
pub const MAP_FETCH_PREFIX: &str = "map.source.v2";

/// Update-broadcast subject for a blob entity.
#[must_use]
pub fn blob_update_subject(subject: &str) -> String {
    format!("{BLOB_UPDATE_PREFIX}.{subject}")
}

/// Fetch-request subject for a blob entity.
#[must_use]
pub fn blob_fetch_subject(subject: &str) -> String {
    format!("{BLOB_FETCH_PREFIX}.{subject}")
}

/// Update-broadcast subject for a map entity.
#[must_use]
pub fn map_update_subject(subject: &str) -> String {
    format!("{MAP_UPDATE_PREFIX}.{subject}")
}

/// Fetch-request subject for a map entity.
#[must_use]
pub fn map_fetch_subject(subject: &str) -> String {
    format!("{MAP_FETCH_PREFIX}.{subject}")
}

/// Errors from wire decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Message shorter than the mandatory header.
    #[error("Message too short: {len} bytes, need at least {min}")]
    TooShort {
        /// Actual length.
        len: usize,
        /// Required minimum.
        min: usize,
    },

    /// Tag byte not known to this protocol version.
    #[error("Unknown message tag {0:#04x}")]
    UnknownTag(u8),

    /// Entry payload failed to decode.
    #[error("Failed to decode entries: {0}")]
    Decode(String),
}

/// Random token identifying a specific state revision.
///
/// Regenerated on every content-modifying write; sinks compare advertised
/// ids against the last applied one to detect missed updates without
/// transferring payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeId([u8; CHANGE_ID_LEN]);

impl ChangeId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// The raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; CHANGE_ID_LEN] {
        &self.0
    }

    fn from_slice(bytes: &[u8]) -> Self {
        let mut id = [0u8; CHANGE_ID_LEN];
        id.copy_from_slice(&bytes[..CHANGE_ID_LEN]);
        Self(id)
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Dynamic value domain for replicated maps.
///
/// In partial updates, [`WireValue::Null`] doubles as the deletion marker:
/// a sink removes the key instead of storing a null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    /// Absent / deletion marker.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    List(Vec<WireValue>),
    /// Nested string-keyed map.
    Map(HashMap<String, WireValue>),
}

impl WireValue {
    /// Short type name for diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// `true` for the deletion marker.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for WireValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for WireValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for WireValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for WireValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for WireValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for WireValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

/// A decoded map update message.
#[derive(Debug, Clone, PartialEq)]
pub enum MapMessage {
    /// Full state: clear the replica, then apply entries.
    Full {
        /// Revision of this state.
        change_id: ChangeId,
        /// Complete key/value content.
        entries: HashMap<String, WireValue>,
    },
    /// Incremental state: merge entries (null values delete).
    Partial {
        /// Revision after this update.
        change_id: ChangeId,
        /// Changed key/value pairs.
        entries: HashMap<String, WireValue>,
    },
    /// Revision announcement without payload.
    Advertise {
        /// Currently authoritative revision.
        change_id: ChangeId,
    },
}

/// Encode a map update message (`full` selects tag `0x01` vs `0x02`).
pub fn encode_map_update(
    full: bool,
    change_id: &ChangeId,
    entries: &HashMap<String, WireValue>,
) -> Result<Vec<u8>, WireError> {
    let body = bincode::serialize(entries).map_err(|e| WireError::Decode(e.to_string()))?;
    let mut msg = Vec::with_capacity(MAP_MIN_LEN + body.len());
    msg.push(if full { MAP_TAG_FULL } else { MAP_TAG_PARTIAL });
    msg.extend_from_slice(change_id.as_bytes());
    msg.extend_from_slice(&body);
    Ok(msg)
}

/// Encode a map advertisement message.
#[must_use]
pub fn encode_map_advertise(change_id: &ChangeId) -> Vec<u8> {
    let mut msg = Vec::with_capacity(MAP_MIN_LEN);
    msg.push(MAP_TAG_ADVERTISE);
    msg.extend_from_slice(change_id.as_bytes());
    msg
}

/// Decode a map update message.
pub fn decode_map_message(payload: &[u8]) -> Result<MapMessage, WireError> {
    if payload.len() < MAP_MIN_LEN {
        return Err(WireError::TooShort {
            len: payload.len(),
            min: MAP_MIN_LEN,
        });
    }
    let tag = payload[0];
    let change_id = ChangeId::from_slice(&payload[1..]);
    let body = &payload[MAP_MIN_LEN..];
    match tag {
        MAP_TAG_FULL | MAP_TAG_PARTIAL => {
            let entries: HashMap<String, WireValue> =
                bincode::deserialize(body).map_err(|e| WireError::Decode(e.to_string()))?;
            if tag == MAP_TAG_FULL {
                Ok(MapMessage::Full { change_id, entries })
            } else {
                Ok(MapMessage::Partial { change_id, entries })
            }
        }
        MAP_TAG_ADVERTISE => Ok(MapMessage::Advertise { change_id }),
        other => Err(WireError::UnknownTag(other)),
    }
}

/// A decoded blob update message.
#[derive(Debug, Clone, PartialEq)]
pub enum BlobMessage {
    /// Full value replacement.
    Full(Vec<u8>),
    /// SHA-256 content hash announcement.
    Advertise(Vec<u8>),
}

/// Encode a blob advertisement from a content hash.
#[must_use]
pub fn encode_blob_advertise(hash: &[u8; 32]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(1 + hash.len());
    msg.push(BLOB_TAG_ADVERTISE);
    msg.extend_from_slice(hash);
    msg
}

/// Decode a blob update message.
pub fn decode_blob_message(payload: &[u8]) -> Result<BlobMessage, WireError> {
    if payload.is_empty() {
        return Err(WireError::TooShort {
            len: 0,
            min: 1,
        });
    }
    match payload[0] {
        BLOB_TAG_FULL => Ok(BlobMessage::Full(payload[1..].to_vec())),
        BLOB_TAG_ADVERTISE => Ok(BlobMessage::Advertise(payload[1..].to_vec())),
        other => Err(WireError::UnknownTag(other)),
    }
}
