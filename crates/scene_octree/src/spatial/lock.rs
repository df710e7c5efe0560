//! Coarse traversal lock
//!
//! A consumer that needs a stable view of the index for a whole pass (a
//! snapshot or sort) opens a *window*, which is exclusive. Code that
//! restructures the index from elsewhere takes a shared *mutation* guard.
//! Individual insert/erase calls do not lock anything themselves.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Exclusive guard held for the duration of a traversal window
pub type WindowGuard<'a> = RwLockWriteGuard<'a, ()>;

/// Shared guard held while structurally mutating
pub type MutationGuard<'a> = RwLockReadGuard<'a, ()>;

/// Lock separating traversal windows from structural mutation
#[derive(Debug, Default)]
pub struct TraversalLock {
    inner: RwLock<()>,
}

impl TraversalLock {
    /// Create an unlocked lock
    pub fn new() -> Self {
        Self { inner: RwLock::new(()) }
    }

    /// Open a traversal window, blocking until no mutation guard is held
    pub fn window(&self) -> WindowGuard<'_> {
        log::trace!("Opening traversal window");
        self.inner.write()
    }

    /// Open a traversal window if it can be done without blocking
    pub fn try_window(&self) -> Option<WindowGuard<'_>> {
        self.inner.try_write()
    }

    /// Take a mutation guard, blocking while a window is open
    pub fn mutation(&self) -> MutationGuard<'_> {
        self.inner.read()
    }

    /// Take a mutation guard if no window is open
    pub fn try_mutation(&self) -> Option<MutationGuard<'_>> {
        self.inner.try_read()
    }

    /// Whether a window or any mutation guard is currently held
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}
