//! # Task Control Block
//!
//! Defines the task model: the TCB record, the handle other code uses to
//! name a task, and the fixed arena ([`TaskTable`]) that owns every TCB.
//!
//! Nothing outside the scheduler holds a TCB. Everything else refers to a
//! task through a [`TaskHandle`], an index into the arena plus a generation
//! counter, so a handle kept past deletion is detected instead of aliasing
//! the slot's next occupant.

use bitflags::bitflags;

use crate::config::{DEFAULT_TIME_SLICE, MAX_CORES, MAX_PRIORITIES, MAX_TASKS};
use crate::error::{Error, Result};

/// Absolute tick count. 64 bits wide so it never wraps in practice.
pub type Tick = u64;

/// Task priority, `0..MAX_PRIORITIES`, higher = more urgent.
pub type Priority = u8;

/// Physical core index, `0..num_cores`.
pub type CoreId = usize;

/// Task entry point. Receives the `arg` given at spawn time and never
/// returns; a finished task deletes itself.
pub type TaskEntry = extern "C" fn(usize) -> !;

/// Timeout value meaning "block until the awaited condition occurs".
pub const WAIT_FOREVER: Tick = Tick::MAX;

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Opaque, copyable task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle {
    index: u16,
    generation: u16,
}

impl TaskHandle {
    pub(crate) const fn new(index: usize, generation: u16) -> Self {
        Self {
            index: index as u16,
            generation,
        }
    }

    /// Slot index in the task arena.
    #[inline]
    pub const fn index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    pub const fn generation(&self) -> u16 {
        self.generation
    }
}

/// Names the target of an operation: either the task running on the calling
/// core, or a specific task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRef {
    Current,
    Task(TaskHandle),
}

impl From<TaskHandle> for TaskRef {
    fn from(handle: TaskHandle) -> Self {
        TaskRef::Task(handle)
    }
}

bitflags! {
    /// Set of cores a task is allowed to run on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CoreMask: u32 {
        const CORE0 = 1 << 0;
        const CORE1 = 1 << 1;
        const CORE2 = 1 << 2;
        const CORE3 = 1 << 3;
        const CORE4 = 1 << 4;
        const CORE5 = 1 << 5;
        const CORE6 = 1 << 6;
        const CORE7 = 1 << 7;
    }
}

impl CoreMask {
    /// Mask containing only `core`; empty for a core past `MAX_CORES`.
    pub const fn core(core: CoreId) -> Self {
        if core >= MAX_CORES {
            return Self::empty();
        }
        Self::from_bits_retain(1 << core)
    }

    #[inline]
    pub const fn allows(&self, core: CoreId) -> bool {
        core < MAX_CORES && (self.bits() & (1 << core)) != 0
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///              assign                    delay / wait
///   ┌───────┐ ───────► ┌─────────┐ ─────────────────► ┌─────────┐
///   │ Ready │          │ Running │                    │ Blocked │
///   └───────┘ ◄─────── └─────────┘                    └─────────┘
///       ▲     preempt / yield                              │
///       └──────────────────────────────────────────────────┘
///                     wake tick / notify
///
///   any non-deleted ──suspend──► Suspended ──resume──► Ready
///   any ──delete──► Deleted (slot reclaimed once no core runs it)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Executing on the core recorded in `assigned_core`.
    Running,
    /// Queued in the ready list of its effective priority.
    Ready,
    /// Waiting for a wake tick or a notification.
    Blocked,
    /// Explicitly suspended; in no schedulable collection.
    Suspended,
    /// Deletion requested; the slot is freed once no core executes it.
    Deleted,
}

/// What a Blocked task is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Delay,
    Notify,
}

/// Single-slot mailbox state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyState {
    /// No notification pending and nobody waiting.
    Idle,
    /// The task is blocked in a notify wait.
    Waiting,
    /// A notification arrived and has not been consumed.
    Received,
}

/// How `notify` combines its value with the target's mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyAction {
    /// Wake the target without touching the value.
    NoAction,
    /// OR the value into the mailbox.
    SetBits,
    /// Increment the mailbox; the value argument is ignored.
    Increment,
    /// Replace the mailbox value.
    SetValueWithOverwrite,
    /// Replace the mailbox value only if no notification is pending.
    SetValueWithoutOverwrite,
}

/// Bits cleared from the mailbox value around a notify wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotifyWaitOptions {
    pub clear_on_entry: u32,
    pub clear_on_exit: u32,
}

/// Outcome of a notify wait. `notified == false` means the wait bound
/// expired (or the task was suspended out of the wait) before a
/// notification arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyWait {
    pub notified: bool,
    pub value: u32,
}

// ---------------------------------------------------------------------------
// Spawn parameters
// ---------------------------------------------------------------------------

/// Parameters supplied when a task is spawned.
#[derive(Debug, Clone, Copy)]
pub struct TaskParams {
    pub name: &'static str,
    pub entry: TaskEntry,
    pub arg: usize,
    pub priority: Priority,
    /// Cores the task may run on. Defaults to every core.
    pub affinity: CoreMask,
    /// Time slice in ticks. If 0, uses `DEFAULT_TIME_SLICE`.
    pub time_slice: u32,
}

impl TaskParams {
    pub const fn new(name: &'static str, entry: TaskEntry, priority: Priority) -> Self {
        Self {
            name,
            entry,
            arg: 0,
            priority,
            affinity: CoreMask::all(),
            time_slice: 0,
        }
    }

    pub const fn with_arg(mut self, arg: usize) -> Self {
        self.arg = arg;
        self
    }

    pub const fn with_affinity(mut self, affinity: CoreMask) -> Self {
        self.affinity = affinity;
        self
    }

    pub const fn with_time_slice(mut self, ticks: u32) -> Self {
        self.time_slice = ticks;
        self
    }

    /// Returns the effective time slice, falling back to the system default.
    #[inline]
    pub const fn effective_time_slice(&self) -> u32 {
        if self.time_slice > 0 {
            self.time_slice
        } else {
            DEFAULT_TIME_SLICE
        }
    }
}

extern "C" fn unset_entry(_arg: usize) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Reclamation progress of a deleted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reclaim {
    /// The task was running on this core when deleted; its stack stays in
    /// use until the port reports the switch away from it.
    AwaitingSwitch(CoreId),
    /// No core executes the task any more; the slot may be freed.
    Reapable,
}

/// Task Control Block (TCB): the scheduler's record for one task.
pub struct TaskControlBlock {
    /// Slot index in the arena.
    pub id: usize,
    /// Bumped every time the slot is freed.
    pub generation: u16,
    /// Whether this slot is allocated.
    pub active: bool,

    pub name: &'static str,
    pub state: TaskState,
    pub entry: TaskEntry,
    pub arg: usize,

    /// Priority requested by the task's owner.
    pub base_priority: Priority,
    /// Priority used for scheduling. Equal to `base_priority` unless a
    /// priority-inheritance layer raised it.
    pub effective_priority: Priority,
    pub affinity: CoreMask,

    /// Core executing the task; `Some` only while Running.
    pub assigned_core: Option<CoreId>,
    /// While set and Running, the task is never involuntarily removed from
    /// its core.
    pub preemption_disabled: bool,

    pub blocked_on: BlockReason,
    /// Absolute tick at which a Blocked task becomes Ready again.
    pub wake_tick: Option<Tick>,

    pub notify_value: u32,
    pub notify_state: NotifyState,

    /// Slice length in ticks and what remains of the current slice.
    pub time_slice: u32,
    pub ticks_remaining: u32,

    /// Number of times the task was switched in.
    pub run_count: u32,
    /// Ticks observed while the task was Running.
    pub total_ticks: u64,

    pub(crate) reclaim: Option<Reclaim>,
}

impl TaskControlBlock {
    /// An unallocated slot. Used to initialize the arena.
    pub const EMPTY: Self = Self {
        id: 0,
        generation: 0,
        active: false,
        name: "",
        state: TaskState::Deleted,
        entry: unset_entry,
        arg: 0,
        base_priority: 0,
        effective_priority: 0,
        affinity: CoreMask::all(),
        assigned_core: None,
        preemption_disabled: false,
        blocked_on: BlockReason::Delay,
        wake_tick: None,
        notify_value: 0,
        notify_state: NotifyState::Idle,
        time_slice: DEFAULT_TIME_SLICE,
        ticks_remaining: DEFAULT_TIME_SLICE,
        run_count: 0,
        total_ticks: 0,
        reclaim: None,
    };

    /// Initialize the slot for a new task. The task starts Ready but is not
    /// yet queued; the caller inserts it into a ready list.
    pub fn init(&mut self, id: usize, params: &TaskParams) {
        let generation = self.generation;
        *self = Self::EMPTY;
        self.id = id;
        self.generation = generation;
        self.active = true;
        self.name = params.name;
        self.state = TaskState::Ready;
        self.entry = params.entry;
        self.arg = params.arg;
        self.base_priority = params.priority;
        self.effective_priority = params.priority;
        self.affinity = params.affinity;
        self.time_slice = params.effective_time_slice();
        self.ticks_remaining = self.time_slice;
    }

    #[inline]
    pub fn handle(&self) -> TaskHandle {
        TaskHandle::new(self.id, self.generation)
    }

    /// Check if this task can run on the given core.
    #[inline]
    pub fn can_run_on_core(&self, core: CoreId) -> bool {
        self.affinity.allows(core)
    }

    /// Starts a fresh time slice.
    #[inline]
    pub fn reset_time_slice(&mut self) {
        self.ticks_remaining = self.time_slice;
    }
}

/// Point-in-time copy of a task's public fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStatus {
    pub handle: TaskHandle,
    pub name: &'static str,
    pub state: TaskState,
    pub base_priority: Priority,
    pub effective_priority: Priority,
    pub core: Option<CoreId>,
    pub preemption_disabled: bool,
    pub run_count: u32,
    pub total_ticks: u64,
}

impl From<&TaskControlBlock> for TaskStatus {
    fn from(tcb: &TaskControlBlock) -> Self {
        Self {
            handle: tcb.handle(),
            name: tcb.name,
            state: tcb.state,
            base_priority: tcb.base_priority,
            effective_priority: tcb.effective_priority,
            core: tcb.assigned_core,
            preemption_disabled: tcb.preemption_disabled,
            run_count: tcb.run_count,
            total_ticks: tcb.total_ticks,
        }
    }
}

// ---------------------------------------------------------------------------
// TCB arena
// ---------------------------------------------------------------------------

/// Fixed-capacity store of every TCB, indexed by handle.
pub struct TaskTable {
    slots: [TaskControlBlock; MAX_TASKS],
    live: usize,
}

impl TaskTable {
    pub const fn new() -> Self {
        Self {
            slots: [TaskControlBlock::EMPTY; MAX_TASKS],
            live: 0,
        }
    }

    /// Number of allocated slots, including tasks awaiting reclamation.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Claim a free slot for a new task.
    pub fn allocate(&mut self, params: &TaskParams) -> Result<TaskHandle> {
        if params.priority as usize >= MAX_PRIORITIES {
            return Err(Error::InvalidPriority);
        }
        let id = self
            .slots
            .iter()
            .position(|tcb| !tcb.active)
            .ok_or(Error::ResourceExhausted)?;
        self.slots[id].init(id, params);
        self.live += 1;
        Ok(self.slots[id].handle())
    }

    /// Return a slot to the free pool. Later lookups with the old handle
    /// fail with `InvalidHandle`.
    pub fn free(&mut self, handle: TaskHandle) -> Result<()> {
        let tcb = self.get_mut(handle)?;
        tcb.active = false;
        tcb.state = TaskState::Deleted;
        tcb.generation = tcb.generation.wrapping_add(1);
        self.live -= 1;
        Ok(())
    }

    /// Any allocated task, including one awaiting reclamation.
    pub fn get(&self, handle: TaskHandle) -> Result<&TaskControlBlock> {
        match self.slots.get(handle.index()) {
            Some(tcb) if tcb.active && tcb.generation == handle.generation() => Ok(tcb),
            _ => Err(Error::InvalidHandle),
        }
    }

    pub fn get_mut(&mut self, handle: TaskHandle) -> Result<&mut TaskControlBlock> {
        match self.slots.get_mut(handle.index()) {
            Some(tcb) if tcb.active && tcb.generation == handle.generation() => Ok(tcb),
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Like [`get`](Self::get) but rejects tasks already marked Deleted.
    pub fn live(&self, handle: TaskHandle) -> Result<&TaskControlBlock> {
        let tcb = self.get(handle)?;
        if tcb.state == TaskState::Deleted {
            return Err(Error::InvalidHandle);
        }
        Ok(tcb)
    }

    pub fn live_mut(&mut self, handle: TaskHandle) -> Result<&mut TaskControlBlock> {
        let tcb = self.get_mut(handle)?;
        if tcb.state == TaskState::Deleted {
            return Err(Error::InvalidHandle);
        }
        Ok(tcb)
    }

    /// Allocated TCBs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskControlBlock> {
        self.slots.iter().filter(|tcb| tcb.active)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TaskControlBlock> {
        self.slots.iter_mut().filter(|tcb| tcb.active)
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
