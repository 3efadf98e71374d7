//! # smpsched
//!
//! A preemptive, priority-based, multi-core real-time task scheduler for
//! bare-metal targets.
//!
//! ## Overview
//!
//! Up to `MAX_CORES` identical cores share one set of tasks. At every
//! scheduling point the scheduler keeps the highest-priority Ready tasks on
//! the cores, subject to each task's core affinity and its
//! preemption-disable flag, and rotates tasks of equal priority round-robin
//! every time slice.
//!
//! - **Strict priority**: no Ready task outranks a Running one that it could
//!   displace
//! - **Affinity**: a task only ever runs on a core in its mask
//! - **Fairness**: equal-priority tasks share the cores in FIFO order
//! - **Scheduler lock**: `suspend_all`/`resume_all` freeze decisions; work
//!   issued meanwhile is logged and replayed in order
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │      spawn() · start() · delay() · notify() · tick()   │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │  Core Assignment   │  Sync Primitives  │
//! │  scheduler.rs│  assign.rs         │  sync.rs          │
//! │  ─ tick()    │  ─ assign_cores()  │  ─ critical_section│
//! │  ─ delay()   │  ─ RunTable        │  ─ TaskLock       │
//! │  ─ notify()  ├────────────────────┤                   │
//! │              │  Ready Lists       │  Scheduler Lock   │
//! │              │  ready.rs          │  lock.rs          │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │              Task Model (task.rs)                       │
//! │    TCB · TaskHandle · CoreMask · TaskState · Notify    │
//! ├────────────────────────────────────────────────────────┤
//! │         Port trait (arch/mod.rs)                        │
//! │    core id · interrupts · switch · stacks · idle       │
//! ├────────────────────────────────────────────────────────┤
//! │   ARM Cortex-M4 port (arch/cortex_m4.rs), or a host    │
//! │   simulation supplied by the caller                     │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: All state is statically sized
//! - **No `alloc`**: Pure `core`, collections from `heapless`
//! - **Fixed task arena**: `MAX_TASKS` TCBs addressed by generational
//!   handles
//! - **Two locks**: a short interrupt-masking spin lock around every
//!   operation, and the long task lock behind `suspend_all`
//!
//! ## Logging
//!
//! State changes are reported through the `log` facade: `trace!` for
//! switches, `debug!` for lifecycle events, `warn!` for deferred work
//! dropped at replay and `error!` for contract violations. Installing a
//! logger is up to the application.

#![no_std]

pub mod config;
pub mod error;
pub mod task;
pub mod ready;
pub mod assign;
pub mod lock;
pub mod scheduler;
pub mod arch;
pub mod kernel;
pub mod sync;

pub use arch::Port;
pub use assign::ContextSwitch;
pub use config::KernelConfig;
pub use error::{Error, Result};
pub use kernel::Kernel;
pub use scheduler::{Scheduler, SystemState};
pub use task::{
    CoreId, CoreMask, NotifyAction, NotifyWait, NotifyWaitOptions, Priority, TaskEntry,
    TaskHandle, TaskParams, TaskRef, TaskState, TaskStatus, Tick, WAIT_FOREVER,
};
