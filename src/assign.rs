//! # Core Assignment
//!
//! Decides which task each core executes. Given the TCB store, the ready
//! lists and the run table, [`assign_cores`] recomputes the whole
//! assignment in one pass and reports every core whose occupant changed.
//!
//! ## Algorithm
//!
//! 1. A core whose Running task has preemption disabled is pinned: it keeps
//!    its task no matter what is ready. With preemption switched off in the
//!    config every Running task is pinned this way.
//! 2. Priority levels are walked from high to low. At each level the tasks
//!    already running at that level keep their core, then the level's ready
//!    queue is served in FIFO order. A ready task takes an idle core if one
//!    is allowed, otherwise the allowed core whose occupant has the lowest
//!    priority.
//! 3. Cores nobody claimed run the idle task.
//! 4. A running task that lost its core goes back to Ready at the tail of
//!    its queue.
//!
//! The engine cannot fail. A ready-list update that does not apply is a
//! corrupted scheduler and halts via `panic!`.

use heapless::Vec;

use crate::config::{KernelConfig, MAX_CORES, MAX_PRIORITIES};
use crate::ready::ReadyLists;
use crate::task::{CoreId, Priority, TaskControlBlock, TaskHandle, TaskState, TaskTable};

/// A change of occupant on one core, handed to the port's switch primitive.
/// `None` stands for the idle task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSwitch {
    pub core: CoreId,
    pub outgoing: Option<TaskHandle>,
    pub incoming: Option<TaskHandle>,
}

/// Switch requests produced by one scheduling decision, at most one per core.
pub type Switches = Vec<ContextSwitch, MAX_CORES>;

/// Which task each core is executing; `None` = idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTable {
    slots: [Option<TaskHandle>; MAX_CORES],
}

impl RunTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_CORES],
        }
    }

    #[inline]
    pub fn get(&self, core: CoreId) -> Option<TaskHandle> {
        self.slots.get(core).copied().flatten()
    }

    #[inline]
    pub(crate) fn set(&mut self, core: CoreId, task: Option<TaskHandle>) {
        if let Some(slot) = self.slots.get_mut(core) {
            *slot = task;
        }
    }

    /// Core whose slot holds `task`.
    pub fn find(&self, task: TaskHandle) -> Option<CoreId> {
        self.slots.iter().position(|slot| *slot == Some(task))
    }

    /// Number of slots holding `task`. More than one is corruption.
    pub fn occurrences(&self, task: TaskHandle) -> usize {
        self.slots.iter().filter(|slot| **slot == Some(task)).count()
    }
}

impl Default for RunTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A Running task found on an unpinned core at the start of a decision.
#[derive(Clone, Copy)]
struct Incumbent {
    task: TaskHandle,
    priority: Priority,
    /// Its affinity still allows the core it is on.
    may_stay: bool,
}

#[inline]
fn allowed(tcb: &TaskControlBlock, core: CoreId, config: &KernelConfig) -> bool {
    !config.core_affinity || tcb.can_run_on_core(core)
}

/// Best unclaimed core for `tcb`: an idle one first, otherwise the one whose
/// occupant has the lowest priority. Lower core index wins ties, except that
/// an idle `home` core (the one the task last ran on) is preferred.
fn pick_core(
    tcb: &TaskControlBlock,
    home: Option<CoreId>,
    taken: &[bool; MAX_CORES],
    incumbents: &[Option<Incumbent>; MAX_CORES],
    cores: usize,
    config: &KernelConfig,
) -> Option<CoreId> {
    if let Some(core) = home {
        if core < cores
            && !taken[core]
            && incumbents[core].is_none()
            && allowed(tcb, core, config)
        {
            return Some(core);
        }
    }
    let mut best: Option<(CoreId, Option<Priority>)> = None;
    for core in 0..cores {
        if taken[core] || !allowed(tcb, core, config) {
            continue;
        }
        let occupant = incumbents[core].map(|i| i.priority);
        best = match best {
            None => Some((core, occupant)),
            Some((_, Some(held))) if occupant.map_or(true, |p| p < held) => Some((core, occupant)),
            keep => keep,
        };
    }
    best.map(|(core, _)| core)
}

/// Recompute the task ↔ core assignment and apply it to the TCBs, ready
/// lists and run table. Returns one entry per core whose occupant changed.
pub fn assign_cores(
    tasks: &mut TaskTable,
    ready: &mut ReadyLists,
    run: &mut RunTable,
    config: &KernelConfig,
) -> Switches {
    let cores = config.num_cores.min(MAX_CORES);
    let mut plan: [Option<TaskHandle>; MAX_CORES] = [None; MAX_CORES];
    let mut taken = [false; MAX_CORES];
    let mut incumbents: [Option<Incumbent>; MAX_CORES] = [None; MAX_CORES];
    let mut pinned_top: Option<Priority> = None;

    // Step 1: pinned cores and incumbents.
    for core in 0..cores {
        let Some(task) = run.get(core) else { continue };
        let Ok(tcb) = tasks.get(task) else { continue };
        if tcb.state != TaskState::Running || tcb.assigned_core != Some(core) {
            continue;
        }
        let may_stay = allowed(tcb, core, config);
        if may_stay && (tcb.preemption_disabled || !config.preemption) {
            plan[core] = Some(task);
            taken[core] = true;
            pinned_top = pinned_top.max(Some(tcb.effective_priority));
        } else {
            incumbents[core] = Some(Incumbent {
                task,
                priority: tcb.effective_priority,
                may_stay,
            });
        }
    }

    // With a single running priority, only the most urgent contending level
    // is served.
    let only_level = if config.run_multiple_priorities {
        None
    } else {
        let incumbent_top = incumbents.iter().flatten().map(|i| i.priority).max();
        pinned_top
            .max(incumbent_top)
            .max(ready.highest_nonempty_priority())
    };

    let mut picked: Vec<(TaskHandle, CoreId), MAX_CORES> = Vec::new();
    let mut migrated: Vec<(TaskHandle, CoreId), MAX_CORES> = Vec::new();

    // Step 2: greedy by priority.
    for level in (0..MAX_PRIORITIES).rev() {
        let p = level as Priority;
        if only_level.is_some_and(|top| top != p) {
            continue;
        }
        if taken[..cores].iter().all(|&t| t) {
            break;
        }

        for core in 0..cores {
            if let Some(inc) = incumbents[core] {
                if inc.priority == p && inc.may_stay && !taken[core] {
                    plan[core] = Some(inc.task);
                    taken[core] = true;
                    incumbents[core] = None;
                }
            }
        }

        // Incumbents at this level whose core was claimed above them.
        for core in 0..cores {
            let Some(inc) = incumbents[core] else { continue };
            if inc.priority != p {
                continue;
            }
            let Ok(tcb) = tasks.get(inc.task) else { continue };
            if let Some(target) = pick_core(tcb, None, &taken, &incumbents, cores, config) {
                plan[target] = Some(inc.task);
                taken[target] = true;
                incumbents[core] = None;
                let _ = migrated.push((inc.task, target));
            }
        }

        for task in ready.iter(p) {
            if taken[..cores].iter().all(|&t| t) {
                break;
            }
            let Ok(tcb) = tasks.get(task) else { continue };
            let home = run.find(task);
            if let Some(target) = pick_core(tcb, home, &taken, &incumbents, cores, config) {
                plan[target] = Some(task);
                taken[target] = true;
                let _ = picked.push((task, target));
            }
        }
    }

    // Step 3: apply.
    for &(task, core) in picked.iter() {
        let Ok(tcb) = tasks.get_mut(task) else {
            panic!("assign: picked task {:?} vanished", task);
        };
        if ready.remove(task, tcb.effective_priority).is_err() {
            panic!("assign: {:?} not queued at priority {}", task, tcb.effective_priority);
        }
        tcb.state = TaskState::Running;
        tcb.assigned_core = Some(core);
        if run.get(core) != Some(task) {
            tcb.run_count = tcb.run_count.wrapping_add(1);
        }
        tcb.reset_time_slice();
    }

    for &(task, core) in migrated.iter() {
        if let Ok(tcb) = tasks.get_mut(task) {
            tcb.assigned_core = Some(core);
            tcb.run_count = tcb.run_count.wrapping_add(1);
        }
    }

    // Step 4: preempted incumbents go to the back of their queue.
    for inc in incumbents.iter().flatten() {
        let Ok(tcb) = tasks.get_mut(inc.task) else { continue };
        tcb.state = TaskState::Ready;
        tcb.assigned_core = None;
        if ready.insert(inc.task, tcb.effective_priority).is_err() {
            panic!("assign: preempted {:?} already queued", inc.task);
        }
    }

    let mut switches = Switches::new();
    for core in 0..cores {
        let outgoing = run.get(core);
        let incoming = plan[core];
        if outgoing != incoming {
            run.set(core, incoming);
            let _ = switches.push(ContextSwitch {
                core,
                outgoing,
                incoming,
            });
        }
    }
    switches
}
