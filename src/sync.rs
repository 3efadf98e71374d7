//! # Synchronization Primitives
//!
//! Two levels of protection guard the scheduler's bookkeeping.
//!
//! - [`critical_section`] is the short one: local interrupts masked through
//!   the port plus a spin lock shared by every core. Every scheduler
//!   operation runs inside one, and nothing inside ever waits on anything
//!   but the spin lock itself.
//! - [`TaskLock`] is the long one behind `suspend_all`: a core takes it for
//!   the whole suspended section, with interrupts enabled, so that no other
//!   core can open a suspended section of its own (or block its task)
//!   until the section ends.
//!
//! [`CriticalLock`] is separate from both and belongs to application code:
//! it serializes user critical sections across cores, nests on the core
//! that holds it, and never covers the scheduler's own lock, so kernel
//! calls made inside a user section take that lock as usual.

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::arch::Port;
use crate::task::CoreId;

/// Run `f` with interrupts masked on the executing core and `lock` held.
///
/// # Usage
/// ```ignore
/// sync::critical_section(&port, &scheduler, |s| s.tick());
/// ```
///
/// Keep the closure short; other cores spin on `lock` for its duration.
#[inline]
pub fn critical_section<P, T, R, F>(port: &P, lock: &Mutex<T>, f: F) -> R
where
    P: Port + ?Sized,
    F: FnOnce(&mut T) -> R,
{
    let was_enabled = port.disable_interrupts();
    let result = {
        let mut guard = lock.lock();
        f(&mut guard)
    };
    port.restore_interrupts(was_enabled);
    result
}

/// Cross-core ownership token for the suspended-scheduler window.
///
/// Unlike a guard-based mutex it is acquired and released by separate
/// calls, since a suspended section spans many kernel calls.
pub struct TaskLock {
    inner: Mutex<()>,
}

impl TaskLock {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(()),
        }
    }

    /// Spin until the lock is free, then hold it.
    pub fn acquire(&self) {
        core::mem::forget(self.inner.lock());
    }

    /// Take the lock if it is free.
    pub fn try_acquire(&self) -> bool {
        match self.inner.try_lock() {
            Some(guard) => {
                core::mem::forget(guard);
                true
            }
            None => false,
        }
    }

    /// # Safety
    /// The caller must hold the lock, taken by `acquire` or `try_acquire`
    /// on its own behalf.
    pub unsafe fn release(&self) {
        self.inner.force_unlock();
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl Default for TaskLock {
    fn default() -> Self {
        Self::new()
    }
}

const NO_OWNER: usize = usize::MAX;

/// Cross-core lock for user critical sections, re-entrant on its owner.
///
/// The owner and depth are only written by the owning core, with its
/// interrupts masked, so a core reading its own id back from `owner` knows
/// it already holds the lock.
pub struct CriticalLock {
    inner: Mutex<()>,
    owner: AtomicUsize,
    depth: AtomicUsize,
}

impl CriticalLock {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(()),
            owner: AtomicUsize::new(NO_OWNER),
            depth: AtomicUsize::new(0),
        }
    }

    /// Run `f` with interrupts masked on the executing core and the lock
    /// held on its behalf. Nested calls from the owning core only count.
    pub fn run<P, R, F>(&self, port: &P, f: F) -> R
    where
        P: Port + ?Sized,
        F: FnOnce() -> R,
    {
        let was_enabled = port.disable_interrupts();
        let core = port.core_id();
        self.enter(core);
        let result = f();
        self.exit(core);
        port.restore_interrupts(was_enabled);
        result
    }

    fn enter(&self, core: CoreId) {
        if self.owner.load(Ordering::Acquire) == core {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return;
        }
        core::mem::forget(self.inner.lock());
        self.depth.store(1, Ordering::Relaxed);
        self.owner.store(core, Ordering::Release);
    }

    fn exit(&self, core: CoreId) {
        if self.owner.load(Ordering::Acquire) != core {
            return;
        }
        if self.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.owner.store(NO_OWNER, Ordering::Release);
            // SAFETY: this core took the guard in `enter` and forgot it.
            unsafe { self.inner.force_unlock() };
        }
    }

    /// Core holding the lock, if any.
    pub fn owner(&self) -> Option<CoreId> {
        match self.owner.load(Ordering::Acquire) {
            NO_OWNER => None,
            core => Some(core),
        }
    }

    /// Nesting depth on the owning core.
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

impl Default for CriticalLock {
    fn default() -> Self {
        Self::new()
    }
}
