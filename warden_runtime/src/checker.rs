//! The runtime ownership/guard checker.
//!
//! Instrumented code funnels every protected access through one of the
//! wire calls here: [`Checker::check`], [`Checker::guard_by_this`],
//! [`Checker::guard_by_field`], [`Checker::release`],
//! [`Checker::guard_by`], and [`Checker::release_and_spawn`]. Each wire
//! call has a `try_` twin returning `Result` for tests and embedders;
//! the wire form raises [`AccessViolation`] by unwinding.
//!
//! The checker is a plain service object so test cases can construct
//! isolated instances; [`Checker::global`] provides the process-wide one
//! that injected call sites use.

use crate::guard_lock::{GuardLock, Monitored};
use crate::identity_map::IdentityMap;
use crate::thread_token::{adopt_token, current_token, ThreadToken};
use crate::violation::{AccessViolation, ViolationKind};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::JoinHandle;

/// A guard descriptor resolved at rewrite time.
///
/// The instrumentation engine resolves a field metadata tag to one of
/// these once, while rewriting; nothing is looked up by name at run time.
#[derive(Clone, Copy)]
pub enum GuardBinding {
    /// The lock is a static location.
    Static(&'static GuardLock),
    /// The lock is reached from the checked object itself.
    Instance(fn(&(dyn Any + Send + Sync)) -> Option<&GuardLock>),
}

impl std::fmt::Debug for GuardBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardBinding::Static(_) => write!(f, "GuardBinding::Static"),
            GuardBinding::Instance(_) => write!(f, "GuardBinding::Instance"),
        }
    }
}

/// Concurrent registry implementing the ownership-transfer and
/// lock-guard protocols.
pub struct Checker {
    /// Object identity -> weakly-held owning thread.
    owners: IdentityMap<Weak<ThreadToken>>,
    /// Object identity -> registered guard lock. Never auto-removed
    /// while the object lives.
    guards: IdentityMap<Arc<GuardLock>>,
    /// Process-wide kill switch for all checks.
    enabled: AtomicBool,
}

impl Checker {
    /// Create an enabled checker with empty registries.
    pub fn new() -> Self {
        Checker {
            owners: IdentityMap::new(),
            guards: IdentityMap::new(),
            enabled: AtomicBool::new(true),
        }
    }

    /// The process-wide checker used by instrumented call sites.
    pub fn global() -> &'static Checker {
        static GLOBAL: OnceLock<Checker> = OnceLock::new();
        GLOBAL.get_or_init(Checker::new)
    }

    /// Disable or re-enable all checks process-wide.
    ///
    /// Intended for programs that intentionally exercise unsynchronized
    /// code; disabled calls are silent no-ops that record nothing.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Current state of the enable switch.
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    // =========================================================================
    // check
    // =========================================================================

    /// Verify the calling thread may mutate `obj`.
    ///
    /// A registered guard subsumes ownership: when a guard exists the
    /// call succeeds iff its lock is held, and the ownership record is
    /// not consulted. Otherwise an unclaimed object is claimed for the
    /// calling thread; re-checks by the owner succeed; a check from any
    /// other live thread fails. An owner whose thread has died is
    /// treated as unclaimed and the object is re-claimed by the caller.
    pub fn try_check<T>(&self, obj: Option<&Arc<T>>) -> Result<(), AccessViolation>
    where
        T: Send + Sync + 'static,
    {
        let obj = match obj {
            Some(obj) => obj,
            None => return Ok(()),
        };
        if !self.enabled() {
            return Ok(());
        }

        if let Some(guard) = self.guards.with_slot(obj, |slot| slot.get().cloned()) {
            return if guard.is_held() {
                Ok(())
            } else {
                Err(AccessViolation::new(
                    ViolationKind::GuardNotHeld,
                    format!(
                        "object {:p} is guarded, and the guard lock is not held by {:?}",
                        Arc::as_ptr(obj),
                        current_token(),
                    ),
                ))
            };
        }

        let me = current_token();
        self.owners.with_slot(obj, |slot| {
            match slot.get().and_then(Weak::upgrade) {
                // Unclaimed, or the recorded owner's thread has died.
                None => {
                    slot.set(Arc::downgrade(&me));
                    Ok(())
                }
                Some(owner) if Arc::ptr_eq(&owner, &me) => Ok(()),
                Some(owner) => Err(AccessViolation::new(
                    ViolationKind::ForeignOwner,
                    format!(
                        "object {:p} is owned by {:?}, accessed from {:?}",
                        Arc::as_ptr(obj),
                        owner,
                        me,
                    ),
                )),
            }
        })
    }

    /// Wire form of [`Checker::try_check`]; raises on violation.
    pub fn check<T>(&self, obj: Option<&Arc<T>>)
    where
        T: Send + Sync + 'static,
    {
        self.try_check(obj).unwrap_or_else(|v| v.raise())
    }

    // =========================================================================
    // guard_by_this
    // =========================================================================

    /// Verify the calling thread holds `obj`'s own monitor.
    ///
    /// Independent of the ownership record.
    pub fn try_guard_by_this<T>(&self, obj: Option<&Arc<T>>) -> Result<(), AccessViolation>
    where
        T: Monitored,
    {
        let obj = match obj {
            Some(obj) => obj,
            None => return Ok(()),
        };
        if !self.enabled() {
            return Ok(());
        }
        if obj.monitor().is_held() {
            Ok(())
        } else {
            Err(AccessViolation::new(
                ViolationKind::GuardNotHeld,
                format!(
                    "object {:p} requires its own monitor, not held by {:?}",
                    Arc::as_ptr(obj),
                    current_token(),
                ),
            ))
        }
    }

    /// Wire form of [`Checker::try_guard_by_this`]; raises on violation.
    pub fn guard_by_this<T>(&self, obj: Option<&Arc<T>>)
    where
        T: Monitored,
    {
        self.try_guard_by_this(obj).unwrap_or_else(|v| v.raise())
    }

    // =========================================================================
    // guard_by_field
    // =========================================================================

    /// Verify the calling thread holds the lock a rewrite-time guard
    /// binding resolves to for `obj`.
    pub fn try_guard_by_field<T>(
        &self,
        obj: Option<&Arc<T>>,
        binding: &GuardBinding,
    ) -> Result<(), AccessViolation>
    where
        T: Send + Sync + 'static,
    {
        let obj = match obj {
            Some(obj) => obj,
            None => return Ok(()),
        };
        if !self.enabled() {
            return Ok(());
        }
        let lock = match binding {
            GuardBinding::Static(lock) => *lock,
            GuardBinding::Instance(accessor) => {
                let erased: &(dyn Any + Send + Sync) = &**obj;
                accessor(erased).ok_or_else(|| {
                    AccessViolation::new(
                        ViolationKind::UnresolvedGuard,
                        format!(
                            "guard binding does not apply to object {:p}",
                            Arc::as_ptr(obj)
                        ),
                    )
                })?
            }
        };
        if lock.is_held() {
            Ok(())
        } else {
            Err(AccessViolation::new(
                ViolationKind::GuardNotHeld,
                format!(
                    "field guard for object {:p} is not held by {:?}",
                    Arc::as_ptr(obj),
                    current_token(),
                ),
            ))
        }
    }

    /// Wire form of [`Checker::try_guard_by_field`]; raises on violation.
    pub fn guard_by_field<T>(&self, obj: Option<&Arc<T>>, binding: &GuardBinding)
    where
        T: Send + Sync + 'static,
    {
        self.try_guard_by_field(obj, binding)
            .unwrap_or_else(|v| v.raise())
    }

    // =========================================================================
    // release
    // =========================================================================

    /// Give up ownership of `obj` so another thread may claim it.
    ///
    /// The calling thread must currently own the object; releasing an
    /// unclaimed object (including one whose owner died) or another
    /// thread's object is a violation.
    pub fn try_release<T>(&self, obj: Option<&Arc<T>>) -> Result<(), AccessViolation>
    where
        T: Send + Sync + 'static,
    {
        let obj = match obj {
            Some(obj) => obj,
            None => return Ok(()),
        };
        if !self.enabled() {
            return Ok(());
        }
        let me = current_token();
        self.owners.with_slot(obj, |slot| {
            match slot.get().and_then(Weak::upgrade) {
                None => Err(AccessViolation::new(
                    ViolationKind::ReleaseUnowned,
                    format!("release of unowned object {:p}", Arc::as_ptr(obj)),
                )),
                Some(owner) if Arc::ptr_eq(&owner, &me) => {
                    slot.remove();
                    Ok(())
                }
                Some(owner) => Err(AccessViolation::new(
                    ViolationKind::ReleaseForeign,
                    format!(
                        "object {:p} released by {:?} but owned by {:?}",
                        Arc::as_ptr(obj),
                        me,
                        owner,
                    ),
                )),
            }
        })
    }

    /// Wire form of [`Checker::try_release`]; raises on violation.
    pub fn release<T>(&self, obj: Option<&Arc<T>>)
    where
        T: Send + Sync + 'static,
    {
        self.try_release(obj).unwrap_or_else(|v| v.raise())
    }

    // =========================================================================
    // guard_by
    // =========================================================================

    /// Register `lock` as the permanent guard for `obj`.
    ///
    /// Re-registering the same lock is a no-op; registering a different
    /// lock is a violation. Concurrent first registrations race
    /// linearizably: one wins, and a loser with a different lock fails.
    pub fn try_guard_by<T>(
        &self,
        obj: Option<&Arc<T>>,
        lock: &Arc<GuardLock>,
    ) -> Result<(), AccessViolation>
    where
        T: Send + Sync + 'static,
    {
        let obj = match obj {
            Some(obj) => obj,
            None => return Ok(()),
        };
        if !self.enabled() {
            return Ok(());
        }
        self.guards.with_slot(obj, |slot| match slot.get() {
            None => {
                slot.set(lock.clone());
                Ok(())
            }
            Some(existing) if Arc::ptr_eq(existing, lock) => Ok(()),
            Some(_) => Err(AccessViolation::new(
                ViolationKind::ConflictingGuard,
                format!(
                    "object {:p} already has a different guard registered",
                    Arc::as_ptr(obj)
                ),
            )),
        })
    }

    /// Wire form of [`Checker::try_guard_by`]; raises on violation.
    pub fn guard_by<T>(&self, obj: Option<&Arc<T>>, lock: &Arc<GuardLock>)
    where
        T: Send + Sync + 'static,
    {
        self.try_guard_by(obj, lock).unwrap_or_else(|v| v.raise())
    }

    // =========================================================================
    // release_and_spawn
    // =========================================================================

    /// Atomically transfer ownership of `obj` to a thread that does not
    /// exist yet, then start that thread running `f(obj)`.
    ///
    /// The new thread's identity token is created first and installed as
    /// `obj`'s owner before the spawn, so there is no window in which a
    /// third thread can claim the object, and the spawned thread's first
    /// access cannot race the handoff. The calling thread must own the
    /// object or the object must be unclaimed.
    pub fn release_and_spawn<T, F>(
        &self,
        obj: Arc<T>,
        f: F,
    ) -> std::io::Result<JoinHandle<()>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Arc<T>) + Send + 'static,
    {
        let token = Arc::new(ThreadToken::unbound());
        if self.enabled() {
            self.try_transfer_to(&obj, &token)
                .unwrap_or_else(|v| v.raise());
        }
        std::thread::Builder::new().spawn(move || {
            adopt_token(token);
            f(obj)
        })
    }

    /// Install `token` as the owner of `obj`, requiring the caller to be
    /// the current owner (or the object to be unclaimed).
    fn try_transfer_to<T>(
        &self,
        obj: &Arc<T>,
        token: &Arc<ThreadToken>,
    ) -> Result<(), AccessViolation>
    where
        T: Send + Sync + 'static,
    {
        let me = current_token();
        self.owners.with_slot(obj, |slot| {
            match slot.get().and_then(Weak::upgrade) {
                None => {
                    slot.set(Arc::downgrade(token));
                    Ok(())
                }
                Some(owner) if Arc::ptr_eq(&owner, &me) => {
                    slot.set(Arc::downgrade(token));
                    Ok(())
                }
                Some(owner) => Err(AccessViolation::new(
                    ViolationKind::ForeignOwner,
                    format!(
                        "cannot hand off object {:p} owned by {:?}",
                        Arc::as_ptr(obj),
                        owner,
                    ),
                )),
            }
        })
    }
}

impl Default for Checker {
    fn default() -> Self {
        Checker::new()
    }
}
