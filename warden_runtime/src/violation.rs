//! The fatal error raised on a protocol violation.
//!
//! An [`AccessViolation`] is raised synchronously at the violating call
//! site and is never recovered internally; the wire methods deliver it by
//! unwinding with `panic_any`, so an uninstrumented caller dies on the
//! spot while a test can catch and downcast it.

use std::fmt;

/// Why an access was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// The object is owned by a different live thread.
    ForeignOwner,
    /// A registered guard lock is not held by the calling thread.
    GuardNotHeld,
    /// A different guard is already registered for the object.
    ConflictingGuard,
    /// `release` on an object nobody owns.
    ReleaseUnowned,
    /// `release` by a thread that is not the owner.
    ReleaseForeign,
    /// A guard binding could not produce a lock for the checked object.
    UnresolvedGuard,
}

/// A runtime protocol violation: unauthorized access, double release, or
/// conflicting guard registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessViolation {
    kind: ViolationKind,
    message: String,
}

impl AccessViolation {
    pub(crate) fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        AccessViolation {
            kind,
            message: message.into(),
        }
    }

    /// The violation category.
    #[inline]
    pub fn kind(&self) -> ViolationKind {
        self.kind
    }

    /// Raise this violation to the caller as an unrecoverable unwind.
    pub fn raise(self) -> ! {
        std::panic::panic_any(self)
    }
}

impl fmt::Display for AccessViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "access violation: {}", self.message)
    }
}

impl std::error::Error for AccessViolation {}
