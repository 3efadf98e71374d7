//! # Cortex-M4 Port Layer
//!
//! [`Port`] implementation for a single ARM Cortex-M4 (Thumb-2) core.
//! Context switches run in PendSV, the tick comes from SysTick.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by tasks in Thread mode
//!
//! On exception entry, the hardware stacks R0–R3, R12, LR, PC and xPSR onto
//! the process stack. The PendSV handler saves and restores R4–R11 itself,
//! which completes the context. Each task slot owns a fixed stack in a
//! static pool indexed by the task handle; one extra slot holds the idle
//! context.
//!
//! ## Interrupt Priorities
//!
//! PendSV and SysTick both run at the lowest priority, so a context switch
//! never preempts an application ISR.
//!
//! ## Firmware glue
//!
//! ```ignore
//! static KERNEL: Kernel<CortexM4Port> = Kernel::new(CortexM4Port::new(), KernelConfig::new(1));
//!
//! extern "C" fn idle(_: usize) -> ! {
//!     loop {
//!         KERNEL.idle();
//!     }
//! }
//!
//! #[no_mangle]
//! extern "C" fn SysTick() {
//!     KERNEL.tick();
//! }
//!
//! // in main:
//! KERNEL.port().install(idle, |core| KERNEL.context_switched(core));
//! cortex_m4::configure_systick(&mut cp.SYST, SYSCLK_HZ);
//! cortex_m4::set_interrupt_priorities(&mut cp.SCB);
//! KERNEL.spawn(TaskParams::new("blink", blink, 2))?;
//! KERNEL.start()?;
//! loop { cortex_m::asm::wfi(); } // PendSV takes over from here
//! ```

use core::arch::naked_asm;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};
use spin::Once;

use super::Port;
use crate::assign::ContextSwitch;
use crate::config::{MAX_TASKS, TICK_HZ};
use crate::task::{CoreId, TaskEntry, TaskHandle};

/// Words per task stack (4 KiB).
pub const STACK_WORDS: usize = 1024;

/// Stack slot of the idle context.
const IDLE_SLOT: usize = MAX_TASKS;
const SLOTS: usize = MAX_TASKS + 1;
/// No context has been switched in yet.
const NO_CONTEXT: usize = usize::MAX;

#[repr(C, align(8))]
struct Stack([u32; STACK_WORDS]);

struct StackPool(UnsafeCell<[Stack; SLOTS]>);

// SAFETY: a slot is written only by `init_task` before its task is made
// Ready, and afterwards only by the task itself and PendSV.
unsafe impl Sync for StackPool {}

const EMPTY_STACK: Stack = Stack([0; STACK_WORDS]);
const NULL_SP: AtomicUsize = AtomicUsize::new(0);

static STACKS: StackPool = StackPool(UnsafeCell::new([EMPTY_STACK; SLOTS]));
static SAVED_SP: [AtomicUsize; SLOTS] = [NULL_SP; SLOTS];
static CURRENT: AtomicUsize = AtomicUsize::new(NO_CONTEXT);
static NEXT: AtomicUsize = AtomicUsize::new(IDLE_SLOT);
static SWITCH_HOOK: Once<fn(CoreId)> = Once::new();

/// Scratch area PSP points to before the first switch, so PendSV can save
/// the boot context's R4–R11 somewhere harmless.
static BOOT_SCRATCH: StackPool = StackPool(UnsafeCell::new([EMPTY_STACK; 1]));

pub struct CortexM4Port {
    _private: (),
}

impl CortexM4Port {
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Prepare the idle context and register the hook PendSV calls after
    /// every completed switch (normally `Kernel::context_switched`).
    /// Must run once, before the kernel starts.
    pub fn install(&self, idle: TaskEntry, switched: fn(CoreId)) {
        SWITCH_HOOK.call_once(|| switched);
        init_stack(IDLE_SLOT, idle, 0);
        unsafe {
            let scratch = BOOT_SCRATCH.0.get() as *mut u32;
            cortex_m::register::psp::write(scratch.add(STACK_WORDS) as u32);
        }
    }
}

impl Default for CortexM4Port {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for CortexM4Port {
    fn core_id(&self) -> CoreId {
        0
    }

    fn disable_interrupts(&self) -> bool {
        let was_enabled = cortex_m::register::primask::read().is_inactive();
        cortex_m::interrupt::disable();
        was_enabled
    }

    fn restore_interrupts(&self, was_enabled: bool) {
        if was_enabled {
            unsafe { cortex_m::interrupt::enable() };
        }
    }

    fn request_switch(&self, switch: ContextSwitch) {
        let slot = switch.incoming.map_or(IDLE_SLOT, |task| task.index());
        NEXT.store(slot, Ordering::Release);
        SCB::set_pendsv();
    }

    fn yield_now(&self) {
        SCB::set_pendsv();
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    fn init_task(&self, task: TaskHandle, entry: TaskEntry, arg: usize) {
        init_stack(task.index(), entry, arg);
    }

    fn release_task(&self, task: TaskHandle) {
        SAVED_SP[task.index()].store(0, Ordering::Relaxed);
    }

    fn wait_for_interrupt(&self) {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` from the processor clock. The
/// firmware's `SysTick` handler calls `Kernel::tick`.
pub fn configure_systick(syst: &mut SYST, sysclk_hz: u32) {
    let reload = sysclk_hz / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Set PendSV and SysTick to the lowest interrupt priority.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    unsafe {
        scb.set_priority(SystemHandler::PendSV, 0xFF);
        scb.set_priority(SystemHandler::SysTick, 0xFF);
    }
}

// ---------------------------------------------------------------------------
// Stack initialization
// ---------------------------------------------------------------------------

/// Build the initial frame of a slot so that the first PendSV "return"
/// starts `entry(arg)`.
///
/// ```text
/// [Hardware stacked frame]   <- PSP after PendSV restores R4–R11
///   xPSR  (Thumb bit set)
///   PC    (task entry point)
///   LR    (task_exit)
///   R12, R3, R2, R1
///   R0    (arg)
/// [Software saved context]
///   R11 … R4 (0)             <- saved stack pointer
/// ```
fn init_stack(slot: usize, entry: TaskEntry, arg: usize) {
    let base = unsafe { (*STACKS.0.get()).as_mut_ptr().add(slot) as *mut u32 };
    // Top of the slot, 8-byte aligned by `Stack`'s layout.
    let top = unsafe { base.add(STACK_WORDS) };
    let frame = unsafe { top.sub(16) };

    unsafe {
        for i in 0..8 {
            frame.add(i).write_volatile(0); // R4–R11
        }
        frame.add(8).write_volatile(arg as u32); // R0
        for i in 9..13 {
            frame.add(i).write_volatile(0); // R1–R3, R12
        }
        frame.add(13).write_volatile(task_exit as usize as u32); // LR
        frame.add(14).write_volatile(entry as usize as u32); // PC
        frame.add(15).write_volatile(0x0100_0000); // xPSR, Thumb bit
    }
    SAVED_SP[slot].store(frame as usize, Ordering::Release);
}

/// Entry functions never return; this only guards against a corrupted LR.
extern "C" fn task_exit() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler: performs the switch posted by
/// `request_switch`.
///
/// 1. Push R4–R11 onto the outgoing process stack
/// 2. `switch_context` records that stack pointer and returns the
///    incoming one
/// 3. Pop R4–R11 from the incoming stack and return to Thread mode on PSP
///
/// # Safety
/// Called only by the NVIC, following the Cortex-M4 exception
/// entry/exit convention.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "bl {switch}",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "ldr r0, =0xFFFFFFFD",
        "bx r0",
        switch = sym switch_context,
    );
}

/// Record the outgoing stack pointer and hand back the incoming one.
///
/// # Safety
/// Called from PendSV only.
unsafe extern "C" fn switch_context(saved: u32) -> u32 {
    let current = CURRENT.load(Ordering::Acquire);
    if current != NO_CONTEXT {
        SAVED_SP[current].store(saved as usize, Ordering::Release);
    }
    let next = NEXT.load(Ordering::Acquire);
    CURRENT.store(next, Ordering::Release);
    if let Some(hook) = SWITCH_HOOK.get() {
        hook(0);
    }
    SAVED_SP[next].load(Ordering::Acquire) as u32
}
