//! Typed validators for map projections.
//!
//! A [`Schema`] turns untyped [`WireValue`]s into a typed output, and
//! optionally exposes a *structural key* so identical primitive schemas can
//! share one projection. Only leaf schemas are structurally comparable;
//! composite validators always form a fresh projection entry. That is an
//! intentional approximation, not a bug: de-duplicating arbitrary
//! validators would require deep structural equality over opaque code.

use crate::error::ValidationError;
use crate::wire::WireValue;
use serde::Serialize;

/// Primitive type descriptor, JSON-serialized to build structural keys.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum PrimitiveKind {
    Any,
    String,
    Int,
    Float,
    Bool,
    Bytes,
}

fn structural_key_for(kind: PrimitiveKind) -> Option<String> {
    serde_json::to_string(&kind).ok()
}

/// A typed validator applied to every value of a map projection.
pub trait Schema: Send + Sync + 'static {
    /// The validated output type.
    type Output: Clone + Send + Sync + 'static;

    /// Validate a single wire value.
    fn validate(&self, value: &WireValue) -> Result<Self::Output, ValidationError>;

    /// Structural identity for de-duplication.
    ///
    /// `Some(key)` only for leaf schemas where equal keys imply identical
    /// validation behavior; composite schemas return `None` and never
    /// share projections.
    fn structural_key(&self) -> Option<String> {
        None
    }
}

/// Accepts every value unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnySchema;

impl Schema for AnySchema {
    type Output = WireValue;

    fn validate(&self, value: &WireValue) -> Result<Self::Output, ValidationError> {
        Ok(value.clone())
    }

    fn structural_key(&self) -> Option<String> {
        structural_key_for(PrimitiveKind::Any)
    }
}

/// Validates strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSchema;

impl Schema for StringSchema {
    type Output = String;

    fn validate(&self, value: &WireValue) -> Result<Self::Output, ValidationError> {
        match value {
            WireValue::String(s) => Ok(s.clone()),
            other => Err(ValidationError::type_mismatch("string", other)),
        }
    }

    fn structural_key(&self) -> Option<String> {
        structural_key_for(PrimitiveKind::String)
    }
}

/// Validates signed integers.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntSchema;

impl Schema for IntSchema {
    type Output = i64;

    fn validate(&self, value: &WireValue) -> Result<Self::Output, ValidationError> {
        match value {
            WireValue::Int(v) => Ok(*v),
            other => Err(ValidationError::type_mismatch("int", other)),
        }
    }

    fn structural_key(&self) -> Option<String> {
        structural_key_for(PrimitiveKind::Int)
    }
}

/// Validates floats, accepting integers by widening.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatSchema;

impl Schema for FloatSchema {
    type Output = f64;

    fn validate(&self, value: &WireValue) -> Result<Self::Output, ValidationError> {
        match value {
            WireValue::Float(v) => Ok(*v),
            #[allow(clippy::cast_precision_loss)]
            WireValue::Int(v) => Ok(*v as f64),
            other => Err(ValidationError::type_mismatch("float", other)),
        }
    }

    fn structural_key(&self) -> Option<String> {
        structural_key_for(PrimitiveKind::Float)
    }
}

/// Validates booleans.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolSchema;

impl Schema for BoolSchema {
    type Output = bool;

    fn validate(&self, value: &WireValue) -> Result<Self::Output, ValidationError> {
        match value {
            WireValue::Bool(v) => Ok(*v),
            other => Err(ValidationError::type_mismatch("bool", other)),
        }
    }

    fn structural_key(&self) -> Option<String> {
        structural_key_for(PrimitiveKind::Bool)
    }
}

/// Validates byte buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSchema;

impl Schema for BytesSchema {
    type Output = Vec<u8>;

    fn validate(&self, value: &WireValue) -> Result<Self::Output, ValidationError> {
        match value {
            WireValue::Bytes(b) => Ok(b.clone()),
            other => Err(ValidationError::type_mismatch("bytes", other)),
        }
    }

    fn structural_key(&self) -> Option<String> {
        structural_key_for(PrimitiveKind::Bytes)
    }
}

/// A composite schema built from a validation closure.
///
/// Never structurally comparable; each attachment gets its own projection.
pub struct FnSchema<F, T> {
    validate: F,
    _marker: std::marker::PhantomData<fn() -> T>,
}

/// Build a [`Schema`] from a validation closure.
pub fn validator_fn<F, T>(validate: F) -> FnSchema<F, T>
where
    F: Fn(&WireValue) -> Result<T, ValidationError> + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    FnSchema {
        validate,
        _marker: std::marker::PhantomData,
    }
}

impl<F, T> Schema for FnSchema<F, T>
where
    F: Fn(&WireValue) -> Result<T, ValidationError> + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn validate(&self, value: &WireValue) -> Result<Self::Output, ValidationError> {
        (self.validate)(value)
    }
}
