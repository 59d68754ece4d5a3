//! Instrumentation failures.
//!
//! Every variant aborts the whole unit being rewritten; there is no
//! partial output.

use std::fmt;
use std::sync::Arc;
use warden_bytecode::{DecodeError, VerifyError};

/// Why a unit could not be instrumented.
#[derive(Debug)]
pub enum InstrumentError {
    /// A guard tag failed to parse as `"this"` or `<Type>.<field>`.
    BadGuardTag {
        /// The unit declaring the tagged field.
        unit: Arc<str>,
        /// The tagged field.
        field: Arc<str>,
        /// The offending tag text.
        tag: Arc<str>,
    },
    /// A guard tag names a type no loaded unit declares.
    UnresolvedGuardType {
        /// The offending tag text.
        tag: Arc<str>,
        /// The type the tag names.
        ty: Arc<str>,
    },
    /// A guard tag names a field its type does not declare, or an
    /// instance guard declared on a foreign type.
    UnresolvedGuardField {
        /// The offending tag text.
        tag: Arc<str>,
        /// The type the tag names.
        ty: Arc<str>,
        /// The field the tag names.
        field: Arc<str>,
    },
    /// A completed constructor invocation has no following instruction
    /// to anchor the check, or its receiver could not be traced to an
    /// allocation.
    DanglingConstruction {
        /// The method containing the invocation.
        method: Arc<str>,
    },
    /// The unit failed to decode.
    Decode(DecodeError),
    /// A rewritten method failed post-rewrite structural verification.
    Verify {
        /// The method that failed.
        method: Arc<str>,
        /// The underlying failure.
        source: VerifyError,
    },
}

impl fmt::Display for InstrumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentError::BadGuardTag { unit, field, tag } => {
                write!(f, "bad guard tag {:?} on {}.{}", tag, unit, field)
            }
            InstrumentError::UnresolvedGuardType { tag, ty } => {
                write!(f, "guard tag {:?} names unknown type {}", tag, ty)
            }
            InstrumentError::UnresolvedGuardField { tag, ty, field } => {
                write!(f, "guard tag {:?}: type {} has no usable field {}", tag, ty, field)
            }
            InstrumentError::DanglingConstruction { method } => {
                write!(f, "dangling constructor invocation in {}", method)
            }
            InstrumentError::Decode(e) => write!(f, "decode: {}", e),
            InstrumentError::Verify { method, source } => {
                write!(f, "verification of {} failed: {}", method, source)
            }
        }
    }
}

impl std::error::Error for InstrumentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InstrumentError::Decode(e) => Some(e),
            InstrumentError::Verify { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<DecodeError> for InstrumentError {
    fn from(e: DecodeError) -> Self {
        InstrumentError::Decode(e)
    }
}
