//! # Architecture Abstraction Layer
//!
//! The scheduler never touches the processor itself. Everything it needs
//! from the hardware goes through [`Port`]: which core is executing,
//! interrupt masking, the context-switch primitive, per-task context setup
//! and the idle wait.
//!
//! The ARM Cortex-M4 port is compiled for bare-metal ARM targets only;
//! host builds supply their own `Port` (the integration tests simulate one).

use crate::assign::ContextSwitch;
use crate::task::{CoreId, TaskEntry, TaskHandle};

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;

/// Hardware services consumed by [`crate::kernel::Kernel`].
///
/// Every method may be called from any core and from interrupt context,
/// so implementations must not block except where noted.
pub trait Port: Sync {
    /// Index of the executing core, `0..num_cores`.
    fn core_id(&self) -> CoreId;

    /// Mask interrupts on the executing core. Returns whether they were
    /// enabled before.
    fn disable_interrupts(&self) -> bool;

    /// Undo [`disable_interrupts`](Self::disable_interrupts).
    fn restore_interrupts(&self, was_enabled: bool);

    /// Ask `switch.core` to save `outgoing` and resume `incoming` (`None` is
    /// the idle task). Called with the scheduler's bookkeeping locked, so it
    /// must only post the request: a later request for the same core
    /// supersedes an earlier one that has not been carried out.
    fn request_switch(&self, switch: ContextSwitch);

    /// Carry out the switch pending for the executing core. Returns once
    /// the calling task runs again, or at once if nothing is pending.
    fn yield_now(&self);

    /// Prepare the saved context of a new task so that its first switch-in
    /// calls `entry(arg)`.
    fn init_task(&self, task: TaskHandle, entry: TaskEntry, arg: usize);

    /// The task's slot was reaped; its stack may be reused.
    fn release_task(&self, task: TaskHandle);

    /// Park the executing core until the next interrupt.
    fn wait_for_interrupt(&self) {
        core::hint::spin_loop();
    }
}
