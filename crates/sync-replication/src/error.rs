//! Error types shared across the replication layer.

use thiserror::Error;

/// Errors from option/policy validation at construction time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Retry policy fields are out of range.
    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    /// Periodic advertisement requires fetching so sinks can recover.
    #[error("periodic_advertise requires enable_fetching on subject {subject}")]
    AdvertiseWithoutFetching {
        /// Subject the source was created for.
        subject: String,
    },
}

/// A value failed schema validation in a map projection.
///
/// Per-key and non-fatal: the projection entry resolves to `None`, the raw
/// value is kept untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Validation failed: expected {expected}, got {actual}")]
pub struct ValidationError {
    /// What the schema expected, e.g. `"string"`.
    pub expected: &'static str,
    /// Short description of the rejected value.
    pub actual: String,
}

impl ValidationError {
    /// Build an error describing a type mismatch.
    #[must_use]
    pub fn type_mismatch(expected: &'static str, actual: &crate::wire::WireValue) -> Self {
        Self {
            expected,
            actual: actual.kind_name().to_string(),
        }
    }
}
