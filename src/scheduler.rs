//! # Scheduler
//!
//! The [`Scheduler`] aggregate owns every piece of scheduling bookkeeping:
//! the TCB arena, the ready lists, the core-run table, the delayed list and
//! the scheduler lock. It implements the task state machine, the tick
//! driver and the notification mailbox on top of them.
//!
//! The scheduler is a plain single-threaded state machine. Every operation
//! names the calling core explicitly, and every context switch it decides
//! on is queued rather than performed: the owner drains the queue with
//! [`Scheduler::take_switches`] and hands each entry to the hardware.
//! [`crate::kernel::Kernel`] is the thread-safe wrapper that does this.
//!
//! ## Evaluation points
//!
//! The core-assignment engine runs synchronously at the end of every
//! operation that can change readiness (spawn, tick, unblock, suspend,
//! resume, delete, priority or affinity change, yield, `resume_all`), except
//! while the scheduler is suspended. Then the operation is logged and
//! replayed by the matching `resume_all`.

use heapless::Vec;
use log::{debug, error, trace, warn};

use crate::assign::{assign_cores, ContextSwitch, RunTable, Switches};
use crate::config::{KernelConfig, MAX_PRIORITIES, MAX_TASKS};
use crate::error::{Error, Result};
use crate::lock::{DeferredOp, PendingWork, Presence, SchedulerLock};
use crate::ready::ReadyLists;
use crate::task::{
    BlockReason, CoreId, CoreMask, NotifyAction, NotifyState, NotifyWait, NotifyWaitOptions,
    Priority, Reclaim, TaskHandle, TaskParams, TaskRef, TaskState, TaskStatus, TaskTable, Tick,
    WAIT_FOREVER,
};

/// Handles released by one reaping pass.
pub type Reaped = Vec<TaskHandle, MAX_TASKS>;

/// Snapshot of every allocated task.
pub type SystemState = Vec<TaskStatus, MAX_TASKS>;

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

pub struct Scheduler {
    config: KernelConfig,
    tasks: TaskTable,
    ready: ReadyLists,
    run: RunTable,
    /// Blocked tasks with a finite wake tick, earliest first. Equal wake
    /// ticks keep their blocking order.
    delayed: Vec<TaskHandle, MAX_TASKS>,
    lock: SchedulerLock,
    tick_count: Tick,
    started: bool,
    /// Switches decided but not yet taken, at most one per core.
    pending: Switches,
}

impl Scheduler {
    pub const fn new(config: KernelConfig) -> Self {
        Self {
            config,
            tasks: TaskTable::new(),
            ready: ReadyLists::new(),
            run: RunTable::new(),
            delayed: Vec::new(),
            lock: SchedulerLock::new(),
            tick_count: 0,
            started: false,
            pending: Vec::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Begin scheduling. Tasks spawned before this point are placed on
    /// cores by the first evaluation.
    pub fn start(&mut self) -> Result<()> {
        self.config.validate()?;
        if self.started {
            return violation("scheduler started twice");
        }
        self.started = true;
        debug!("scheduler started on {} core(s)", self.config.num_cores);
        self.reschedule();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Task lifecycle
    // -----------------------------------------------------------------------

    /// Create a task. It becomes Ready at once, or at `resume_all` if the
    /// scheduler is suspended.
    pub fn spawn(&mut self, params: &TaskParams) -> Result<TaskHandle> {
        self.check_affinity(params.affinity)?;
        let handle = self.tasks.allocate(params)?;
        if self.lock.is_suspended() {
            self.lock.defer(DeferredOp::MakeReady(handle));
        } else if let Err(e) = self.ready.insert(handle, params.priority) {
            let _ = self.tasks.free(handle);
            return Err(e);
        }
        debug!(
            "spawn {:?} '{}' priority {}",
            handle, params.name, params.priority
        );
        self.reschedule();
        Ok(handle)
    }

    /// Delete a task. A task running on some core keeps its slot until the
    /// switch away from it is confirmed (see [`context_switched`]); any other
    /// task can be reaped right away.
    ///
    /// [`context_switched`]: Self::context_switched
    pub fn delete(&mut self, core: CoreId, task: TaskRef) -> Result<()> {
        let handle = self.resolve(core, task)?;
        if self.lock.is_suspended() {
            if self.current(core) == Some(handle) {
                return violation("task deleted itself with the scheduler suspended");
            }
            self.lock.defer(DeferredOp::Delete(handle));
            return Ok(());
        }
        self.apply_delete(handle)?;
        self.reschedule();
        Ok(())
    }

    /// Remove a task from scheduling until [`resume`](Self::resume).
    pub fn suspend(&mut self, core: CoreId, task: TaskRef) -> Result<()> {
        let handle = self.resolve(core, task)?;
        if self.lock.is_suspended() {
            if self.current(core) == Some(handle) {
                return violation("task suspended itself with the scheduler suspended");
            }
            self.lock.defer(DeferredOp::Suspend(handle));
            return Ok(());
        }
        self.apply_suspend(handle)?;
        self.reschedule();
        Ok(())
    }

    /// Make a suspended task Ready again. Resuming a task that is not
    /// suspended changes nothing.
    pub fn resume(&mut self, task: TaskHandle) -> Result<()> {
        let state = self.tasks.live(task)?.state;
        if self.lock.is_suspended() {
            self.lock.defer(DeferredOp::Resume(task));
            return Ok(());
        }
        if state != TaskState::Suspended {
            return Ok(());
        }
        self.apply_resume(task)?;
        self.reschedule();
        Ok(())
    }

    /// Set both the base and the effective priority of a task. A Ready
    /// task moves to the tail of its new level.
    pub fn set_priority(&mut self, core: CoreId, task: TaskRef, priority: Priority) -> Result<()> {
        if priority as usize >= MAX_PRIORITIES {
            return Err(Error::InvalidPriority);
        }
        let handle = self.resolve(core, task)?;
        if self.lock.is_suspended() {
            self.lock.defer(DeferredOp::SetPriority(handle, priority));
            return Ok(());
        }
        self.apply_set_priority(handle, priority)?;
        self.reschedule();
        Ok(())
    }

    pub fn priority(&self, task: TaskHandle) -> Result<Priority> {
        Ok(self.tasks.live(task)?.effective_priority)
    }

    /// Restrict the cores a task may run on. A running task whose core is
    /// no longer allowed is moved at this evaluation.
    pub fn set_affinity(&mut self, core: CoreId, task: TaskRef, mask: CoreMask) -> Result<()> {
        self.check_affinity(mask)?;
        let handle = self.resolve(core, task)?;
        if self.lock.is_suspended() {
            self.lock.defer(DeferredOp::SetAffinity(handle, mask));
            return Ok(());
        }
        self.apply_set_affinity(handle, mask)?;
        self.reschedule();
        Ok(())
    }

    pub fn affinity(&self, task: TaskHandle) -> Result<CoreMask> {
        Ok(self.tasks.live(task)?.affinity)
    }

    /// Set the preemption-disable flag. It only pins the task while the
    /// task is Running; a Ready task with the flag set is scheduled
    /// normally and becomes pinned once it is placed on a core.
    pub fn disable_preemption(&mut self, core: CoreId, task: TaskRef) -> Result<()> {
        let handle = self.resolve(core, task)?;
        self.tasks.live_mut(handle)?.preemption_disabled = true;
        trace!("preemption disabled for {:?}", handle);
        Ok(())
    }

    /// Clear the preemption-disable flag and re-evaluate at once.
    pub fn enable_preemption(&mut self, core: CoreId, task: TaskRef) -> Result<()> {
        let handle = self.resolve(core, task)?;
        self.tasks.live_mut(handle)?.preemption_disabled = false;
        trace!("preemption enabled for {:?}", handle);
        self.reschedule();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Voluntary blocking
    // -----------------------------------------------------------------------

    /// Give up the core to the next Ready task of the same or higher
    /// priority. With nothing else eligible the caller keeps running.
    pub fn yield_now(&mut self, core: CoreId) -> Result<()> {
        let Some(handle) = self.current(core) else {
            return Ok(());
        };
        if self.lock.is_suspended() {
            return violation("yield with the scheduler suspended");
        }
        let tcb = self.tasks.live_mut(handle)?;
        tcb.state = TaskState::Ready;
        tcb.assigned_core = None;
        let priority = tcb.effective_priority;
        self.enqueue(handle, priority);
        self.reschedule();
        Ok(())
    }

    /// Block the calling task for `ticks` ticks. Zero yields.
    pub fn delay(&mut self, core: CoreId, ticks: Tick) -> Result<()> {
        if ticks == 0 {
            return self.yield_now(core);
        }
        let handle = self.blocking_caller(core)?;
        let wake = self.tick_count.saturating_add(ticks);
        self.block(handle, BlockReason::Delay, Some(wake))?;
        self.reschedule();
        Ok(())
    }

    /// Block until `*previous_wake + period`, then advance `previous_wake`
    /// by `period`. Returns `false` without blocking when that tick has
    /// already passed.
    pub fn delay_until(
        &mut self,
        core: CoreId,
        previous_wake: &mut Tick,
        period: Tick,
    ) -> Result<bool> {
        if period == 0 {
            return violation("delay_until with a zero period");
        }
        let handle = self.blocking_caller(core)?;
        let wake = previous_wake.saturating_add(period);
        *previous_wake = wake;
        if wake <= self.tick_count {
            return Ok(false);
        }
        self.block(handle, BlockReason::Delay, Some(wake))?;
        self.reschedule();
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Notification mailbox
    // -----------------------------------------------------------------------

    /// Deliver a notification. Returns `false` only for
    /// `SetValueWithoutOverwrite` when a notification was already pending.
    /// A task blocked in a notify wait is made Ready.
    pub fn notify(&mut self, task: TaskHandle, value: u32, action: NotifyAction) -> Result<bool> {
        let tcb = self.tasks.live(task)?;
        let previous = tcb.notify_state;
        let wakes = previous == NotifyState::Waiting
            && tcb.state == TaskState::Blocked
            && tcb.blocked_on == BlockReason::Notify;
        if wakes && self.lock.is_suspended() {
            self.lock.defer(DeferredOp::Wake(task));
        }

        let tcb = self.tasks.live_mut(task)?;
        let stored = match action {
            NotifyAction::NoAction => true,
            NotifyAction::SetBits => {
                tcb.notify_value |= value;
                true
            }
            NotifyAction::Increment => {
                tcb.notify_value = tcb.notify_value.wrapping_add(1);
                true
            }
            NotifyAction::SetValueWithOverwrite => {
                tcb.notify_value = value;
                true
            }
            NotifyAction::SetValueWithoutOverwrite => {
                if previous == NotifyState::Received {
                    false
                } else {
                    tcb.notify_value = value;
                    true
                }
            }
        };
        tcb.notify_state = NotifyState::Received;

        if wakes && !self.lock.is_suspended() {
            self.unblock(task)?;
            self.reschedule();
        }
        Ok(stored)
    }

    /// First half of a notify wait.
    ///
    /// Returns the result at once if a notification is pending or
    /// `timeout` is zero. Otherwise the calling task is Blocked and `None`
    /// is returned; once it runs again it collects the outcome with
    /// [`finish_notify_wait`](Self::finish_notify_wait).
    pub fn begin_notify_wait(
        &mut self,
        core: CoreId,
        options: NotifyWaitOptions,
        timeout: Tick,
    ) -> Result<Option<NotifyWait>> {
        let handle = self.blocking_caller(core)?;
        let tcb = self.tasks.live_mut(handle)?;
        if tcb.notify_state != NotifyState::Received {
            tcb.notify_value &= !options.clear_on_entry;
            tcb.notify_state = NotifyState::Waiting;
            if timeout > 0 {
                let wake = if timeout == WAIT_FOREVER {
                    None
                } else {
                    Some(self.tick_count.saturating_add(timeout))
                };
                self.block(handle, BlockReason::Notify, wake)?;
                self.reschedule();
                return Ok(None);
            }
        }
        self.finish_notify_wait(core, options).map(Some)
    }

    /// Second half of a notify wait, called by the task once it runs again.
    /// `notified == false` means the wait bound expired first.
    pub fn finish_notify_wait(
        &mut self,
        core: CoreId,
        options: NotifyWaitOptions,
    ) -> Result<NotifyWait> {
        let handle = self.current(core).ok_or(Error::InvalidHandle)?;
        let tcb = self.tasks.live_mut(handle)?;
        if tcb.state != TaskState::Running {
            return violation("notify wait finished by a task that is not running");
        }
        let value = tcb.notify_value;
        let notified = tcb.notify_state == NotifyState::Received;
        if notified {
            tcb.notify_value &= !options.clear_on_exit;
        }
        tcb.notify_state = NotifyState::Idle;
        Ok(NotifyWait { notified, value })
    }

    // -----------------------------------------------------------------------
    // Scheduler lock
    // -----------------------------------------------------------------------

    /// Enter (or nest) a suspended section on behalf of `core`. Returns the
    /// new depth.
    pub fn suspend_all(&mut self, core: CoreId) -> Result<u32> {
        self.lock.enter(core).map_err(|e| {
            error!("suspend_all from core {} while another core holds the lock", core);
            e
        })
    }

    /// Leave one level of suspension. At depth zero the pending work and
    /// the pended ticks are replayed and the engine runs once.
    ///
    /// Returns `true` when the calling core's task was displaced by the
    /// replay and a switch for `core` is pending.
    pub fn resume_all(&mut self, core: CoreId) -> Result<bool> {
        let caller = self.current(core);
        match self.lock.leave(core) {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(e) => {
                error!("unmatched resume_all on core {}", core);
                return Err(e);
            }
        }
        self.replay();
        self.reschedule();
        Ok(self.current(core) != caller)
    }

    #[inline]
    pub fn suspend_depth(&self) -> u32 {
        self.lock.depth()
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.lock.is_suspended()
    }

    /// Core holding the scheduler suspended, if any.
    #[inline]
    pub fn suspend_owner(&self) -> Option<CoreId> {
        self.lock.owner()
    }

    fn replay(&mut self) {
        while let Some(work) = self.lock.next_pending() {
            if let Err(e) = self.apply_pending(&work) {
                warn!("pending work for {:?} dropped: {}", work.task, e);
            }
        }
        for _ in 0..self.lock.take_pended_ticks() {
            self.advance_tick();
        }
    }

    // -----------------------------------------------------------------------
    // Tick driver
    // -----------------------------------------------------------------------

    /// Process one timer tick. While suspended the tick is only counted.
    pub fn tick(&mut self) {
        if self.lock.is_suspended() {
            self.lock.pend_tick();
            return;
        }
        self.advance_tick();
        self.reschedule();
    }

    #[inline]
    pub fn tick_count(&self) -> Tick {
        self.tick_count
    }

    fn advance_tick(&mut self) {
        self.tick_count += 1;
        let now = self.tick_count;

        while let Some(&first) = self.delayed.first() {
            let due = self
                .tasks
                .get(first)
                .ok()
                .and_then(|tcb| tcb.wake_tick)
                .map_or(true, |at| at <= now);
            if !due {
                break;
            }
            self.delayed.remove(0);
            if let Err(e) = self.unblock(first) {
                warn!("delayed entry {:?} dropped: {}", first, e);
            }
        }

        for core in 0..self.config.num_cores {
            let Some(handle) = self.run.get(core) else { continue };
            let Ok(tcb) = self.tasks.get_mut(handle) else { continue };
            if tcb.state != TaskState::Running {
                continue;
            }
            tcb.total_ticks += 1;
            if !self.config.time_slicing {
                continue;
            }
            tcb.ticks_remaining = tcb.ticks_remaining.saturating_sub(1);
            if tcb.ticks_remaining > 0 {
                continue;
            }
            tcb.reset_time_slice();
            let priority = tcb.effective_priority;
            if tcb.preemption_disabled || !self.config.preemption || self.ready.len(priority) == 0 {
                continue;
            }
            tcb.state = TaskState::Ready;
            tcb.assigned_core = None;
            trace!("slice expired: {:?} leaves core {}", handle, core);
            self.enqueue(handle, priority);
        }
    }

    // -----------------------------------------------------------------------
    // Context switches and reclamation
    // -----------------------------------------------------------------------

    /// Drain the switches decided since the last call.
    pub fn take_switches(&mut self) -> Switches {
        core::mem::take(&mut self.pending)
    }

    /// The port finished switching `core` to its newest occupant. A task
    /// deleted while running there becomes reapable.
    pub fn context_switched(&mut self, core: CoreId) {
        if self.pending.iter().any(|s| s.core == core) {
            return;
        }
        for tcb in self.tasks.iter_mut() {
            if tcb.reclaim == Some(Reclaim::AwaitingSwitch(core)) {
                tcb.reclaim = Some(Reclaim::Reapable);
            }
        }
    }

    /// Free every deleted task no core executes any more. Returns their
    /// handles so the caller can release per-task resources.
    pub fn reap(&mut self) -> Reaped {
        let mut reaped = Reaped::new();
        for tcb in self.tasks.iter() {
            if tcb.reclaim == Some(Reclaim::Reapable) {
                let _ = reaped.push(tcb.handle());
            }
        }
        for &handle in reaped.iter() {
            let _ = self.tasks.free(handle);
            debug!("reaped {:?}", handle);
        }
        reaped
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Task executing on `core`, `None` while it runs the idle task.
    #[inline]
    pub fn current(&self, core: CoreId) -> Option<TaskHandle> {
        self.run.get(core)
    }

    /// State of any allocated task, including one awaiting reclamation.
    pub fn task_state(&self, task: TaskHandle) -> Result<TaskState> {
        Ok(self.tasks.get(task)?.state)
    }

    pub fn task_status(&self, task: TaskHandle) -> Result<TaskStatus> {
        self.tasks.get(task).map(TaskStatus::from)
    }

    pub fn system_state(&self) -> SystemState {
        self.tasks.iter().map(TaskStatus::from).collect()
    }

    /// Allocated tasks, counting deleted ones not reaped yet.
    #[inline]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Verify the bookkeeping invariants: every Ready task is queued exactly
    /// once at its effective priority (or has pending work), every
    /// Running task occupies exactly one core and nothing else does, and the
    /// delayed list holds only Blocked tasks in wake order.
    pub fn check_invariants(&self) -> Result<()> {
        for core in 0..crate::config::MAX_CORES {
            let Some(handle) = self.run.get(core) else { continue };
            let tcb = self.tasks.get(handle).map_err(|_| Error::ContractViolation)?;
            if core >= self.config.num_cores
                || tcb.state != TaskState::Running
                || tcb.assigned_core != Some(core)
            {
                return Err(Error::ContractViolation);
            }
        }

        for tcb in self.tasks.iter() {
            let handle = tcb.handle();
            let queued = self.ready.occurrences(handle);
            let placed = self.run.occurrences(handle);
            let consistent = match tcb.state {
                TaskState::Running => placed == 1 && queued == 0,
                TaskState::Ready => {
                    placed == 0
                        && ((queued == 1 && self.ready.find(handle) == Some(tcb.effective_priority))
                            || (queued == 0 && self.lock.references(handle)))
                }
                TaskState::Blocked | TaskState::Suspended | TaskState::Deleted => {
                    placed == 0 && queued == 0
                }
            };
            if !consistent {
                return Err(Error::ContractViolation);
            }
        }

        let mut last = 0;
        for &handle in self.delayed.iter() {
            let tcb = self.tasks.get(handle).map_err(|_| Error::ContractViolation)?;
            match (tcb.state, tcb.wake_tick) {
                (TaskState::Blocked, Some(at)) if at >= last => last = at,
                _ => return Err(Error::ContractViolation),
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn reschedule(&mut self) {
        if !self.started || self.lock.is_suspended() {
            return;
        }
        let switches = assign_cores(&mut self.tasks, &mut self.ready, &mut self.run, &self.config);
        for switch in switches {
            trace!(
                "core {}: {:?} -> {:?}",
                switch.core,
                switch.outgoing,
                switch.incoming
            );
            self.queue_switch(switch);
        }
        #[cfg(debug_assertions)]
        if let Err(e) = self.check_invariants() {
            panic!("scheduler bookkeeping corrupted: {}", e);
        }
    }

    fn queue_switch(&mut self, switch: ContextSwitch) {
        match self.pending.iter().position(|s| s.core == switch.core) {
            Some(i) => self.pending[i].incoming = switch.incoming,
            None => {
                if self.pending.push(switch).is_err() {
                    panic!("more switches than cores");
                }
            }
        }
        self.pending.retain(|s| s.outgoing != s.incoming);
    }

    fn resolve(&self, core: CoreId, task: TaskRef) -> Result<TaskHandle> {
        let handle = match task {
            TaskRef::Current => self.current(core).ok_or(Error::InvalidHandle)?,
            TaskRef::Task(handle) => handle,
        };
        self.tasks.live(handle)?;
        Ok(handle)
    }

    /// The task on `core`, which is about to block itself.
    fn blocking_caller(&self, core: CoreId) -> Result<TaskHandle> {
        let handle = self.current(core).ok_or(Error::InvalidHandle)?;
        if self.lock.is_suspended() {
            return violation("blocking call with the scheduler suspended");
        }
        Ok(handle)
    }

    fn check_affinity(&self, mask: CoreMask) -> Result<()> {
        if !self.config.core_affinity || (0..self.config.num_cores).any(|c| mask.allows(c)) {
            Ok(())
        } else {
            violation("affinity mask names no configured core")
        }
    }

    fn enqueue(&mut self, handle: TaskHandle, priority: Priority) {
        if self.ready.insert(handle, priority).is_err() {
            panic!("{:?} queued twice", handle);
        }
    }

    fn dequeue(&mut self, handle: TaskHandle, priority: Priority) {
        if self.ready.remove(handle, priority).is_err() {
            panic!("Ready task {:?} missing from level {}", handle, priority);
        }
    }

    fn unlink_delayed(&mut self, handle: TaskHandle) {
        if let Some(pos) = self.delayed.iter().position(|&h| h == handle) {
            self.delayed.remove(pos);
        }
    }

    fn block(&mut self, handle: TaskHandle, reason: BlockReason, wake: Option<Tick>) -> Result<()> {
        let tcb = self.tasks.live_mut(handle)?;
        tcb.state = TaskState::Blocked;
        tcb.blocked_on = reason;
        tcb.assigned_core = None;
        tcb.wake_tick = wake;
        if let Some(at) = wake {
            let tasks = &self.tasks;
            let pos = self
                .delayed
                .iter()
                .position(|&h| {
                    tasks
                        .get(h)
                        .ok()
                        .and_then(|t| t.wake_tick)
                        .is_some_and(|other| other > at)
                })
                .unwrap_or(self.delayed.len());
            if self.delayed.insert(pos, handle).is_err() {
                panic!("delayed list overflow");
            }
        }
        Ok(())
    }

    /// Blocked → Ready. Anything else is left alone.
    fn unblock(&mut self, handle: TaskHandle) -> Result<()> {
        let tcb = self.tasks.live_mut(handle)?;
        if tcb.state != TaskState::Blocked {
            return Ok(());
        }
        tcb.state = TaskState::Ready;
        tcb.wake_tick = None;
        let priority = tcb.effective_priority;
        self.unlink_delayed(handle);
        self.enqueue(handle, priority);
        Ok(())
    }

    /// Take a task out of whatever collection holds it. Returns the core it
    /// was running on.
    fn detach(&mut self, handle: TaskHandle) -> Result<Option<CoreId>> {
        let tcb = self.tasks.live_mut(handle)?;
        let state = tcb.state;
        let priority = tcb.effective_priority;
        let core = tcb.assigned_core.take();
        tcb.wake_tick = None;
        if tcb.notify_state == NotifyState::Waiting {
            tcb.notify_state = NotifyState::Idle;
        }
        match state {
            TaskState::Ready => self.dequeue(handle, priority),
            TaskState::Blocked => self.unlink_delayed(handle),
            TaskState::Running | TaskState::Suspended | TaskState::Deleted => {}
        }
        Ok(core)
    }

    /// Apply one task's merged work: spawn, deletion, attribute changes,
    /// wake, then the net suspend/resume effect.
    fn apply_pending(&mut self, work: &PendingWork) -> Result<()> {
        let task = work.task;
        if work.make_ready {
            self.apply_make_ready(task)?;
        }
        if work.delete {
            return self.apply_delete(task);
        }
        if let Some(priority) = work.priority {
            self.apply_set_priority(task, priority)?;
        }
        if let Some(mask) = work.affinity {
            self.apply_set_affinity(task, mask)?;
        }
        if work.wake {
            self.unblock(task)?;
        }
        match work.presence {
            Some(Presence::Suspend) => self.apply_suspend(task),
            Some(Presence::Resume) => self.apply_resume(task),
            Some(Presence::SuspendThenResume) => {
                self.apply_suspend(task)?;
                self.apply_resume(task)
            }
            None => Ok(()),
        }
    }

    fn apply_make_ready(&mut self, handle: TaskHandle) -> Result<()> {
        let tcb = self.tasks.live(handle)?;
        if tcb.state == TaskState::Ready && self.ready.find(handle).is_none() {
            let priority = tcb.effective_priority;
            self.enqueue(handle, priority);
        }
        Ok(())
    }

    fn apply_delete(&mut self, handle: TaskHandle) -> Result<()> {
        let core = self.detach(handle)?;
        let tcb = self.tasks.get_mut(handle)?;
        tcb.state = TaskState::Deleted;
        tcb.preemption_disabled = false;
        tcb.reclaim = Some(match core {
            Some(core) => Reclaim::AwaitingSwitch(core),
            None => Reclaim::Reapable,
        });
        debug!("delete {:?} '{}'", handle, tcb.name);
        Ok(())
    }

    fn apply_suspend(&mut self, handle: TaskHandle) -> Result<()> {
        self.detach(handle)?;
        self.tasks.live_mut(handle)?.state = TaskState::Suspended;
        Ok(())
    }

    fn apply_resume(&mut self, handle: TaskHandle) -> Result<()> {
        let tcb = self.tasks.live_mut(handle)?;
        if tcb.state != TaskState::Suspended {
            return Ok(());
        }
        tcb.state = TaskState::Ready;
        let priority = tcb.effective_priority;
        self.enqueue(handle, priority);
        Ok(())
    }

    fn apply_set_priority(&mut self, handle: TaskHandle, priority: Priority) -> Result<()> {
        let tcb = self.tasks.live_mut(handle)?;
        let old = tcb.effective_priority;
        tcb.base_priority = priority;
        tcb.effective_priority = priority;
        let requeue = tcb.state == TaskState::Ready && old != priority;
        debug!("priority {:?}: {} -> {}", handle, old, priority);
        if requeue {
            self.dequeue(handle, old);
            self.enqueue(handle, priority);
        }
        Ok(())
    }

    fn apply_set_affinity(&mut self, handle: TaskHandle, mask: CoreMask) -> Result<()> {
        self.tasks.live_mut(handle)?.affinity = mask;
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

fn violation<T>(what: &str) -> Result<T> {
    error!("contract violation: {}", what);
    Err(Error::ContractViolation)
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
