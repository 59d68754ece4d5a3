//! Per-thread identity tokens.
//!
//! Ownership records do not store OS thread handles; each thread carries
//! an `Arc<ThreadToken>` in a thread-local, and the checker records a
//! `Weak` to it. The token dies with its thread, so a dead owner is
//! observable as a failed upgrade without keeping anything alive.
//!
//! A token can also be created *before* its thread exists and adopted by
//! the spawned thread; `release_and_spawn` uses this to transfer
//! ownership with no handoff window.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Identity of one thread, from the checker's point of view.
///
/// Identity is the `Arc` allocation itself; the label is only for
/// violation messages.
pub struct ThreadToken {
    label: OnceLock<String>,
}

impl ThreadToken {
    pub(crate) fn unbound() -> Self {
        ThreadToken {
            label: OnceLock::new(),
        }
    }

    pub(crate) fn bind_to_current(&self) {
        let name = std::thread::current()
            .name()
            .unwrap_or("<unnamed>")
            .to_string();
        let _ = self.label.set(name);
    }
}

impl fmt::Debug for ThreadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label.get() {
            Some(name) => write!(f, "thread {:?}", name),
            None => write!(f, "thread <not yet started>"),
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<ThreadToken>>> = const { RefCell::new(None) };
}

/// The calling thread's token, created and bound on first use.
pub(crate) fn current_token() -> Arc<ThreadToken> {
    CURRENT.with(|cell| {
        let mut slot = cell.borrow_mut();
        match &*slot {
            Some(token) => token.clone(),
            None => {
                let token = Arc::new(ThreadToken::unbound());
                token.bind_to_current();
                *slot = Some(token.clone());
                token
            }
        }
    })
}

/// Install a pre-created token as the calling thread's identity.
///
/// Must run before the thread's first checker call; `release_and_spawn`
/// makes it the first thing the spawned closure does.
pub(crate) fn adopt_token(token: Arc<ThreadToken>) {
    token.bind_to_current();
    CURRENT.with(|cell| *cell.borrow_mut() = Some(token));
}

/// Address used for cheap identity comparison of the current holder.
#[inline]
pub(crate) fn token_addr(token: &Arc<ThreadToken>) -> usize {
    Arc::as_ptr(token) as usize
}
