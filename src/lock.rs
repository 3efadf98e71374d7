//! # Scheduler Lock
//!
//! Bookkeeping for `suspend_all` / `resume_all`: a nesting depth owned by
//! one core, the work that arrived while the depth was non-zero, and the
//! number of ticks that elapsed meanwhile. Nothing is recomputed until the
//! depth returns to zero; then the pending work is replayed task by task in
//! order of first arrival, followed by the pended ticks.
//!
//! Pending work is kept per task slot and merged as it arrives, so a
//! suspended window accepts any number of operations: the backlog never
//! exceeds one entry per task.
//!
//! Cross-core exclusion (only one core may hold the lock) is enforced here
//! as a contract check; the waiting itself lives in [`crate::sync::TaskLock`].

use heapless::Deque;

use crate::config::MAX_TASKS;
use crate::error::{Error, Result};
use crate::task::{CoreId, CoreMask, Priority, TaskHandle};

/// A scheduler mutation postponed until the lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredOp {
    /// A task spawned during the window joins its ready list.
    MakeReady(TaskHandle),
    Suspend(TaskHandle),
    Resume(TaskHandle),
    Delete(TaskHandle),
    SetPriority(TaskHandle, Priority),
    SetAffinity(TaskHandle, CoreMask),
    /// A notification reached a task blocked in a notify wait.
    Wake(TaskHandle),
}

impl DeferredOp {
    /// The task the operation targets.
    pub fn task(&self) -> TaskHandle {
        match *self {
            Self::MakeReady(h)
            | Self::Suspend(h)
            | Self::Resume(h)
            | Self::Delete(h)
            | Self::SetPriority(h, _)
            | Self::SetAffinity(h, _)
            | Self::Wake(h) => h,
        }
    }
}

/// Net effect of the suspend and resume requests a task received.
///
/// ```text
///   S     → Suspend          R,S   → Suspend
///   R     → Resume           S,R,S → Suspend
///   S,R   → SuspendThenResume
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Suspend,
    Resume,
    SuspendThenResume,
}

/// Everything postponed for one task, merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWork {
    pub task: TaskHandle,
    pub make_ready: bool,
    pub priority: Option<Priority>,
    pub affinity: Option<CoreMask>,
    pub wake: bool,
    pub presence: Option<Presence>,
    /// Deletion overrides everything else except `make_ready`.
    pub delete: bool,
}

impl PendingWork {
    const fn new(task: TaskHandle) -> Self {
        Self {
            task,
            make_ready: false,
            priority: None,
            affinity: None,
            wake: false,
            presence: None,
            delete: false,
        }
    }

    fn merge(&mut self, op: DeferredOp) {
        match op {
            DeferredOp::MakeReady(_) => self.make_ready = true,
            DeferredOp::SetPriority(_, p) => self.priority = Some(p),
            DeferredOp::SetAffinity(_, m) => self.affinity = Some(m),
            DeferredOp::Wake(_) => self.wake = true,
            DeferredOp::Delete(_) => self.delete = true,
            DeferredOp::Suspend(_) => self.presence = Some(Presence::Suspend),
            DeferredOp::Resume(_) => {
                self.presence = Some(match self.presence {
                    None | Some(Presence::Resume) => Presence::Resume,
                    Some(Presence::Suspend) | Some(Presence::SuspendThenResume) => {
                        Presence::SuspendThenResume
                    }
                })
            }
        }
    }
}

pub struct SchedulerLock {
    depth: u32,
    owner: Option<CoreId>,
    /// Pending work indexed by task slot.
    work: [Option<PendingWork>; MAX_TASKS],
    /// Slots with pending work, in order of first arrival.
    order: Deque<usize, MAX_TASKS>,
    pended_ticks: u64,
}

impl SchedulerLock {
    pub const fn new() -> Self {
        Self {
            depth: 0,
            owner: None,
            work: [None; MAX_TASKS],
            order: Deque::new(),
            pended_ticks: 0,
        }
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.depth > 0
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub fn owner(&self) -> Option<CoreId> {
        self.owner
    }

    /// Increment the depth on behalf of `core`. Returns the new depth.
    pub fn enter(&mut self, core: CoreId) -> Result<u32> {
        if self.depth > 0 && self.owner != Some(core) {
            return Err(Error::ContractViolation);
        }
        self.depth = self.depth.checked_add(1).ok_or(Error::ContractViolation)?;
        self.owner = Some(core);
        Ok(self.depth)
    }

    /// Decrement the depth. Returns `true` when this released the lock.
    ///
    /// Leaving at depth 0, or from a core that is not the owner, changes
    /// nothing and reports a contract violation.
    pub fn leave(&mut self, core: CoreId) -> Result<bool> {
        if self.depth == 0 || self.owner != Some(core) {
            return Err(Error::ContractViolation);
        }
        self.depth -= 1;
        if self.depth == 0 {
            self.owner = None;
            return Ok(true);
        }
        Ok(false)
    }

    /// Record an operation, merging it into the task's pending work.
    pub fn defer(&mut self, op: DeferredOp) {
        let task = op.task();
        let slot = task.index();
        match self.work[slot] {
            Some(work) if work.task == task => {}
            Some(_) => self.work[slot] = Some(PendingWork::new(task)),
            None => {
                self.work[slot] = Some(PendingWork::new(task));
                // One entry per slot: the queue cannot be full here.
                let _ = self.order.push_back(slot);
            }
        }
        if let Some(work) = self.work[slot].as_mut() {
            work.merge(op);
        }
    }

    /// Count one tick that arrived while suspended.
    #[inline]
    pub fn pend_tick(&mut self) {
        self.pended_ticks += 1;
    }

    /// Ticks counted since the last call.
    #[inline]
    pub fn take_pended_ticks(&mut self) -> u64 {
        core::mem::take(&mut self.pended_ticks)
    }

    /// Next task's pending work, in order of first arrival.
    pub fn next_pending(&mut self) -> Option<PendingWork> {
        while let Some(slot) = self.order.pop_front() {
            if let Some(work) = self.work[slot].take() {
                return Some(work);
            }
        }
        None
    }

    /// Tasks with pending work.
    #[inline]
    pub fn pending(&self) -> usize {
        self.order.len()
    }

    /// Whether `task` has pending work.
    pub fn references(&self, task: TaskHandle) -> bool {
        self.work[task.index()].is_some_and(|w| w.task == task)
    }
}

impl Default for SchedulerLock {
    fn default() -> Self {
        Self::new()
    }
}
