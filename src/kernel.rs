//! # Kernel
//!
//! Thread-safe public API of the scheduler. A [`Kernel`] owns one
//! [`Scheduler`] behind the narrow interrupt-masking spin lock, plus the
//! [`TaskLock`] behind `suspend_all` and the [`CriticalLock`] behind user
//! critical sections, and talks to the hardware through a [`Port`]. Every
//! core calls the same `Kernel`; the calling core is found through
//! [`Port::core_id`].
//!
//! ## Startup Sequence
//!
//! ```text
//! reset handler
//!   └─► main()
//!         ├─► Kernel::new()        ← const, usually a `static`
//!         ├─► Kernel::spawn() ×N   ← register tasks
//!         └─► Kernel::start()      ← first evaluation, switch requests posted
//!
//! timer interrupt  ──► Kernel::tick()
//! switch completed ──► Kernel::context_switched(core)
//! idle loop        ──► Kernel::idle()
//! ```
//!
//! ## Blocking calls
//!
//! Calls that take the calling task off its core (`delay`, `yield_now`,
//! `wait_for_notify`, self-`suspend`, self-`delete`) first wait until no
//! other core holds the scheduler suspended, then update the bookkeeping
//! and finally ask the port to switch. Calling one of them from inside the
//! caller's own suspended section is a `ContractViolation`.

use log::debug;
use spin::Mutex;

use crate::arch::Port;
use crate::config::KernelConfig;
use crate::error::Result;
use crate::scheduler::{Scheduler, SystemState};
use crate::sync::{self, CriticalLock, TaskLock};
use crate::task::{
    CoreId, CoreMask, NotifyAction, NotifyWait, NotifyWaitOptions, Priority, TaskHandle,
    TaskParams, TaskRef, TaskState, TaskStatus, Tick,
};

pub struct Kernel<P: Port> {
    port: P,
    scheduler: Mutex<Scheduler>,
    task_lock: TaskLock,
    critical: CriticalLock,
}

impl<P: Port> Kernel<P> {
    pub const fn new(port: P, config: KernelConfig) -> Self {
        Self {
            port,
            scheduler: Mutex::new(Scheduler::new(config)),
            task_lock: TaskLock::new(),
            critical: CriticalLock::new(),
        }
    }

    #[inline]
    pub fn port(&self) -> &P {
        &self.port
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Create a task. Its context is prepared through the port before any
    /// core can be told to run it.
    pub fn spawn(&self, params: TaskParams) -> Result<TaskHandle> {
        self.locked(|s| {
            let handle = s.spawn(&params)?;
            self.port.init_task(handle, params.entry, params.arg);
            Ok(handle)
        })
    }

    /// Run the first evaluation and post the initial switch for every core.
    pub fn start(&self) -> Result<()> {
        self.locked(|s| s.start())?;
        debug!("kernel started");
        Ok(())
    }

    pub fn delete(&self, task: TaskRef) -> Result<()> {
        if self.targets_caller(task) {
            return self.block_caller(|s, core| s.delete(core, TaskRef::Current));
        }
        let core = self.port.core_id();
        self.locked(|s| {
            s.delete(core, task)?;
            self.release_reaped(s);
            Ok(())
        })
    }

    pub fn suspend(&self, task: TaskRef) -> Result<()> {
        if self.targets_caller(task) {
            return self.block_caller(|s, core| s.suspend(core, TaskRef::Current));
        }
        let core = self.port.core_id();
        self.locked(|s| s.suspend(core, task))
    }

    pub fn resume(&self, task: TaskHandle) -> Result<()> {
        self.locked(|s| s.resume(task))
    }

    pub fn set_priority(&self, task: TaskRef, priority: Priority) -> Result<()> {
        self.with_core(|s, core| s.set_priority(core, task, priority))
    }

    pub fn priority(&self, task: TaskHandle) -> Result<Priority> {
        self.locked(|s| s.priority(task))
    }

    pub fn set_affinity(&self, task: TaskRef, mask: CoreMask) -> Result<()> {
        self.with_core(|s, core| s.set_affinity(core, task, mask))
    }

    pub fn affinity(&self, task: TaskHandle) -> Result<CoreMask> {
        self.locked(|s| s.affinity(task))
    }

    pub fn disable_preemption(&self, task: TaskRef) -> Result<()> {
        self.with_core(|s, core| s.disable_preemption(core, task))
    }

    pub fn enable_preemption(&self, task: TaskRef) -> Result<()> {
        self.with_core(|s, core| s.enable_preemption(core, task))
    }

    // -----------------------------------------------------------------------
    // Blocking
    // -----------------------------------------------------------------------

    pub fn yield_now(&self) -> Result<()> {
        self.block_caller(|s, core| s.yield_now(core))
    }

    pub fn delay(&self, ticks: Tick) -> Result<()> {
        self.block_caller(|s, core| s.delay(core, ticks))
    }

    /// Periodic delay; see [`Scheduler::delay_until`].
    pub fn delay_until(&self, previous_wake: &mut Tick, period: Tick) -> Result<bool> {
        self.block_caller(|s, core| s.delay_until(core, previous_wake, period))
    }

    /// Wait up to `timeout` ticks for a notification.
    pub fn wait_for_notify(&self, options: NotifyWaitOptions, timeout: Tick) -> Result<NotifyWait> {
        let started = self.block_caller(|s, core| s.begin_notify_wait(core, options, timeout))?;
        match started {
            Some(outcome) => Ok(outcome),
            // The port returned from `yield_now`, so the task runs again,
            // possibly on another core.
            None => self.with_core(|s, core| s.finish_notify_wait(core, options)),
        }
    }

    /// Notify a task. Safe to call from interrupt context.
    pub fn notify(&self, task: TaskHandle, value: u32, action: NotifyAction) -> Result<bool> {
        self.locked(|s| s.notify(task, value, action))
    }

    // -----------------------------------------------------------------------
    // Scheduler lock
    // -----------------------------------------------------------------------

    /// Suspend scheduling decisions. The outermost call waits until no
    /// other core holds the scheduler suspended. Returns the new depth.
    pub fn suspend_all(&self) -> Result<u32> {
        let core = self.port.core_id();
        let nested = self.locked(|s| s.suspend_owner() == Some(core));
        if !nested {
            self.task_lock.acquire();
        }
        let depth = self.locked(|s| s.suspend_all(core));
        if depth.is_err() && !nested {
            // SAFETY: taken just above by this core.
            unsafe { self.task_lock.release() };
        }
        depth
    }

    /// Leave one level of suspension. When the outermost level ends and the
    /// replay displaced the caller, the caller is switched out before this
    /// returns `true`.
    pub fn resume_all(&self) -> Result<bool> {
        let core = self.port.core_id();
        let displaced = self.locked(|s| {
            let displaced = s.resume_all(core)?;
            if !s.is_suspended() {
                // SAFETY: this core held the scheduler suspended, which it
                // only does while holding the task lock.
                unsafe { self.task_lock.release() };
            }
            Ok(displaced)
        })?;
        if displaced {
            self.port.yield_now();
        }
        Ok(displaced)
    }

    // -----------------------------------------------------------------------
    // Hardware entry points
    // -----------------------------------------------------------------------

    /// Timer interrupt, once per tick.
    pub fn tick(&self) {
        self.locked(|s| s.tick());
    }

    /// The port finished the switch last posted for `core`.
    pub fn context_switched(&self, core: CoreId) {
        self.locked(|s| s.context_switched(core));
    }

    /// One pass of the idle task: free deleted tasks, then wait for an
    /// interrupt.
    pub fn idle(&self) {
        self.locked(|s| self.release_reaped(s));
        self.port.wait_for_interrupt();
    }

    /// Run `f` with interrupts masked, one core at a time. Sections nest on
    /// the core that holds one, and `f` may make non-blocking kernel calls.
    /// Calls that wait for the scheduler lock (`suspend_all`, `delay`,
    /// self-`suspend` and the like) must stay outside.
    pub fn critical_section<R>(&self, f: impl FnOnce() -> R) -> R {
        self.critical.run(&self.port, f)
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Task running on the calling core.
    pub fn current_task(&self) -> Option<TaskHandle> {
        let core = self.port.core_id();
        self.running_on(core)
    }

    pub fn running_on(&self, core: CoreId) -> Option<TaskHandle> {
        self.locked(|s| s.current(core))
    }

    pub fn task_state(&self, task: TaskHandle) -> Result<TaskState> {
        self.locked(|s| s.task_state(task))
    }

    pub fn task_status(&self, task: TaskHandle) -> Result<TaskStatus> {
        self.locked(|s| s.task_status(task))
    }

    pub fn system_state(&self) -> SystemState {
        self.locked(|s| s.system_state())
    }

    pub fn tick_count(&self) -> Tick {
        self.locked(|s| s.tick_count())
    }

    pub fn task_count(&self) -> usize {
        self.locked(|s| s.task_count())
    }

    pub fn suspend_depth(&self) -> u32 {
        self.locked(|s| s.suspend_depth())
    }

    pub fn check_invariants(&self) -> Result<()> {
        self.locked(|s| s.check_invariants())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Run `f` inside the critical section and post the switches it decided.
    fn locked<R>(&self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        sync::critical_section(&self.port, &self.scheduler, |s| {
            let result = f(s);
            for switch in s.take_switches() {
                self.port.request_switch(switch);
            }
            result
        })
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut Scheduler, CoreId) -> R) -> R {
        let core = self.port.core_id();
        self.locked(|s| f(s, core))
    }

    fn release_reaped(&self, s: &mut Scheduler) {
        for task in s.reap() {
            self.port.release_task(task);
        }
    }

    fn targets_caller(&self, task: TaskRef) -> bool {
        match task {
            TaskRef::Current => true,
            TaskRef::Task(handle) => self.current_task() == Some(handle),
        }
    }

    /// Run an operation that may take the calling task off its core, then
    /// let the port switch if it did.
    fn block_caller<R>(&self, op: impl FnOnce(&mut Scheduler, CoreId) -> Result<R>) -> Result<R> {
        let core = self.port.core_id();
        // Inside its own suspended section the scheduler rejects the call;
        // waiting for the task lock here would never end.
        let owner = self.locked(|s| s.suspend_owner() == Some(core));
        if !owner {
            self.task_lock.acquire();
        }
        let outcome = self.locked(|s| {
            let before = s.current(core);
            op(s, core).map(|value| (value, s.current(core) != before))
        });
        if !owner {
            // SAFETY: taken above by this core.
            unsafe { self.task_lock.release() };
        }
        let (value, displaced) = outcome?;
        if displaced {
            self.port.yield_now();
        }
        Ok(value)
    }
}
