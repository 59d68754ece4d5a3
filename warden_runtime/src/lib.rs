//! Runtime side of the thread-safety retrofit.
//!
//! Rewritten program units call into [`Checker`] at every injected site.
//! The checker tracks which thread owns which object, which lock guards
//! which object, and raises [`AccessViolation`] the moment a thread
//! touches state it has no right to.
//!
//! Identity is physical on both axes: objects are keyed by their shared
//! allocation address (kept honest by a weak probe) and threads by a
//! per-thread token that dies with its thread.

mod checker;
mod guard_lock;
mod identity_map;
mod thread_token;
mod violation;

pub use checker::{Checker, GuardBinding};
pub use guard_lock::{GuardLock, GuardLockGuard, Monitored};
pub use thread_token::ThreadToken;
pub use violation::{AccessViolation, ViolationKind};
