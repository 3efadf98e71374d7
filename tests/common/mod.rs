//! Host simulation of the hardware port.
//!
//! Each test thread plays one core: `set_core` picks which. Switch requests
//! are recorded instead of performed, and a test can queue one closure to
//! run the next time a task yields, standing in for "time passes while the
//! task is switched out".

#![allow(dead_code)]

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use smpsched::{
    ContextSwitch, CoreId, Kernel, KernelConfig, Port, TaskEntry, TaskHandle, TaskParams,
};

thread_local! {
    static CORE: Cell<CoreId> = const { Cell::new(0) };
    static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Make the calling thread act as `core`.
pub fn set_core(core: CoreId) {
    CORE.with(|c| c.set(core));
}

pub fn interrupts_enabled() -> bool {
    IRQ_ENABLED.with(|e| e.get())
}

type YieldHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct SimPort {
    switches: Mutex<Vec<ContextSwitch>>,
    initialized: Mutex<Vec<(TaskHandle, usize)>>,
    released: Mutex<Vec<TaskHandle>>,
    on_yield: Mutex<Option<YieldHook>>,
    yields: AtomicUsize,
}

impl SimPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch requests posted since the last call.
    pub fn take_switches(&self) -> Vec<ContextSwitch> {
        std::mem::take(&mut *self.switches.lock().unwrap())
    }

    pub fn initialized(&self) -> Vec<(TaskHandle, usize)> {
        self.initialized.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<TaskHandle> {
        self.released.lock().unwrap().clone()
    }

    pub fn yields(&self) -> usize {
        self.yields.load(Ordering::SeqCst)
    }

    /// Run `hook` inside the next `yield_now`.
    pub fn on_next_yield(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_yield.lock().unwrap() = Some(Box::new(hook));
    }
}

impl Port for SimPort {
    fn core_id(&self) -> CoreId {
        CORE.with(|c| c.get())
    }

    fn disable_interrupts(&self) -> bool {
        IRQ_ENABLED.with(|e| e.replace(false))
    }

    fn restore_interrupts(&self, was_enabled: bool) {
        IRQ_ENABLED.with(|e| e.set(was_enabled));
    }

    fn request_switch(&self, switch: ContextSwitch) {
        self.switches.lock().unwrap().push(switch);
    }

    fn yield_now(&self) {
        self.yields.fetch_add(1, Ordering::SeqCst);
        let hook = self.on_yield.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn init_task(&self, task: TaskHandle, _entry: TaskEntry, arg: usize) {
        self.initialized.lock().unwrap().push((task, arg));
    }

    fn release_task(&self, task: TaskHandle) {
        self.released.lock().unwrap().push(task);
    }
}

pub extern "C" fn busy(_arg: usize) -> ! {
    loop {
        std::hint::spin_loop();
    }
}

pub fn task(name: &'static str, priority: u8) -> TaskParams {
    TaskParams::new(name, busy, priority)
}

/// A kernel that lives for the rest of the test binary, so yield hooks can
/// call back into it.
pub fn leaked_kernel(config: KernelConfig) -> &'static Kernel<SimPort> {
    set_core(0);
    Box::leak(Box::new(Kernel::new(SimPort::new(), config)))
}

/// Confirm every posted switch, as the port's switch handler would.
pub fn complete_switches(kernel: &Kernel<SimPort>) -> Vec<ContextSwitch> {
    let switches = kernel.port().take_switches();
    for switch in &switches {
        kernel.context_switched(switch.core);
    }
    switches
}
