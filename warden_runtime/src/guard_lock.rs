//! Inspectable reentrant locks used as guards.
//!
//! Guard verification is inspection-only: `is_held` answers "does the
//! calling thread hold this lock right now" without ever blocking. The
//! lock itself is reentrant so guarded code can nest critical sections
//! on the same lock.

use crate::thread_token::{current_token, token_addr};
use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A reentrant lock whose holder can be queried.
///
/// The raw mutex is held from the first acquisition until the last guard
/// drops, whatever order the guards drop in; no guard carries the lock
/// itself.
pub struct GuardLock {
    raw: RawMutex,
    /// Token address of the holding thread, 0 when free.
    owner: AtomicUsize,
    /// Reentrancy depth; only the holder mutates it.
    depth: AtomicUsize,
}

impl GuardLock {
    /// Create an unheld lock.
    pub const fn new() -> Self {
        GuardLock {
            raw: RawMutex::INIT,
            owner: AtomicUsize::new(0),
            depth: AtomicUsize::new(0),
        }
    }

    /// Acquire the lock, blocking unless the calling thread already
    /// holds it.
    pub fn lock(&self) -> GuardLockGuard<'_> {
        let me = token_addr(&current_token());
        if self.owner.load(Ordering::Acquire) == me {
            self.depth.fetch_add(1, Ordering::Relaxed);
        } else {
            self.raw.lock();
            self.owner.store(me, Ordering::Release);
            self.depth.store(1, Ordering::Relaxed);
        }
        GuardLockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// True iff the calling thread currently holds this lock.
    /// Never blocks.
    #[inline]
    pub fn is_held(&self) -> bool {
        self.owner.load(Ordering::Acquire) == token_addr(&current_token())
    }
}

impl Default for GuardLock {
    fn default() -> Self {
        GuardLock::new()
    }
}

impl std::fmt::Debug for GuardLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardLock")
            .field("held", &(self.owner.load(Ordering::Acquire) != 0))
            .finish()
    }
}

/// RAII guard; the lock is freed when the last live guard drops.
pub struct GuardLockGuard<'a> {
    lock: &'a GuardLock,
    _not_send: PhantomData<*mut ()>,
}

impl Drop for GuardLockGuard<'_> {
    fn drop(&mut self) {
        if self.lock.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            // Clear ownership before the raw mutex unlocks.
            self.lock.owner.store(0, Ordering::Release);
            // Safety: every guard is !Send and proves its thread holds
            // the raw mutex; the depth just reached zero, so this is
            // the last one.
            unsafe { self.lock.raw.unlock() };
        }
    }
}

/// An object that can serve as its own guard.
///
/// Instrumented `guard_by_this` calls verify the calling thread holds
/// the checked object's own monitor.
pub trait Monitored: Send + Sync + 'static {
    /// The object's intrinsic lock.
    fn monitor(&self) -> &GuardLock;
}
