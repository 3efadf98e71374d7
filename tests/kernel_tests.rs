//! Kernel API tests against the simulated port.

mod common;

use common::*;
use smpsched::config::MAX_TASKS;
use smpsched::{
    ContextSwitch, CoreMask, Error, Kernel, KernelConfig, NotifyAction, NotifyWait,
    NotifyWaitOptions, TaskRef, TaskState, WAIT_FOREVER,
};

fn kernel(cores: usize) -> Kernel<SimPort> {
    set_core(0);
    Kernel::new(SimPort::new(), KernelConfig::new(cores))
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_start_posts_initial_switch() {
        let k = kernel(1);
        let a = k.spawn(task("a", 2).with_arg(7)).unwrap();
        assert_eq!(k.port().initialized(), vec![(a, 7)]);
        assert!(k.port().take_switches().is_empty());

        k.start().unwrap();
        assert_eq!(
            k.port().take_switches(),
            vec![ContextSwitch {
                core: 0,
                outgoing: None,
                incoming: Some(a),
            }]
        );
        assert_eq!(k.current_task(), Some(a));
        assert_eq!(k.task_state(a), Ok(TaskState::Running));
        assert_eq!(k.start(), Err(Error::ContractViolation));
    }

    #[test]
    fn test_spawn_exhausts_task_table() {
        let k = kernel(1);
        for _ in 0..MAX_TASKS {
            k.spawn(task("t", 1)).unwrap();
        }
        assert_eq!(k.spawn(task("t", 1)), Err(Error::ResourceExhausted));
        assert_eq!(k.task_count(), MAX_TASKS);
    }

    #[test]
    fn test_self_delete_reaped_after_switch() {
        let k = kernel(1);
        let a = k.spawn(task("a", 2)).unwrap();
        k.start().unwrap();
        complete_switches(&k);

        k.delete(TaskRef::Current).unwrap();
        assert_eq!(k.port().yields(), 1);
        assert_eq!(k.task_state(a), Ok(TaskState::Deleted));
        assert_eq!(k.current_task(), None);

        // Still executing on core 0 until the switch completes.
        k.idle();
        assert!(k.port().released().is_empty());
        assert_eq!(k.task_count(), 1);

        complete_switches(&k);
        k.idle();
        assert_eq!(k.port().released(), vec![a]);
        assert_eq!(k.task_count(), 0);
        assert_eq!(k.task_state(a), Err(Error::InvalidHandle));
    }

    #[test]
    fn test_delete_ready_task_is_released_at_once() {
        let k = kernel(1);
        let a = k.spawn(task("a", 3)).unwrap();
        let b = k.spawn(task("b", 1)).unwrap();
        k.start().unwrap();

        k.delete(TaskRef::Task(b)).unwrap();
        assert_eq!(k.port().released(), vec![b]);
        assert_eq!(k.port().yields(), 0);
        assert_eq!(k.current_task(), Some(a));
    }

    #[test]
    fn test_suspend_and_resume_other_task() {
        let k = kernel(2);
        let a = k.spawn(task("a", 2)).unwrap();
        let b = k.spawn(task("b", 2)).unwrap();
        k.start().unwrap();
        let b_core = k.task_status(b).unwrap().core.unwrap();

        k.suspend(TaskRef::Task(b)).unwrap();
        assert_eq!(k.task_state(b), Ok(TaskState::Suspended));
        assert_eq!(k.running_on(b_core), None);
        assert_eq!(k.task_state(a), Ok(TaskState::Running));

        k.resume(b).unwrap();
        assert_eq!(k.task_state(b), Ok(TaskState::Running));
        k.check_invariants().unwrap();
    }

    #[test]
    fn test_critical_section_masks_interrupts() {
        let k = kernel(1);
        assert!(interrupts_enabled());
        assert!(!k.critical_section(interrupts_enabled));
        assert!(interrupts_enabled());
    }
}

// ---------------------------------------------------------------------------
// User critical sections
// ---------------------------------------------------------------------------

mod critical_section_tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn test_sections_nest_on_one_core() {
        let k = kernel(1);
        let depth = k.critical_section(|| k.critical_section(|| k.critical_section(|| 3)));
        assert_eq!(depth, 3);
        assert!(interrupts_enabled());
    }

    #[test]
    fn test_kernel_calls_inside_a_section() {
        let k = kernel(2);
        let a = k.spawn(task("a", 2)).unwrap();
        let b = k.spawn(task("b", 2)).unwrap();
        k.start().unwrap();

        k.critical_section(|| {
            k.suspend(TaskRef::Task(b)).unwrap();
            k.set_priority(TaskRef::Task(a), 5).unwrap();
            assert_eq!(k.notify(a, 1, NotifyAction::SetBits), Ok(true));
        });
        assert_eq!(k.task_state(b), Ok(TaskState::Suspended));
        assert_eq!(k.priority(a), Ok(5));

        k.critical_section(|| k.resume(b)).unwrap();
        assert_eq!(k.task_state(b), Ok(TaskState::Running));
        k.check_invariants().unwrap();
    }

    #[test]
    fn test_other_core_waits_while_section_suspends_a_task() {
        let k = kernel(2);
        k.spawn(task("a", 2)).unwrap();
        let b = k.spawn(task("b", 2)).unwrap();
        k.start().unwrap();

        let entered = AtomicBool::new(false);
        let left = AtomicBool::new(false);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                set_core(0);
                k.critical_section(|| {
                    entered.store(true, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(50));
                    k.suspend(TaskRef::Task(b)).unwrap();
                    left.store(true, Ordering::SeqCst);
                });
            });
            scope.spawn(|| {
                set_core(1);
                while !entered.load(Ordering::SeqCst) {
                    std::hint::spin_loop();
                }
                let state = k.critical_section(|| {
                    assert!(left.load(Ordering::SeqCst));
                    k.task_state(b)
                });
                assert_eq!(state, Ok(TaskState::Suspended));
            });
        });
        assert!(interrupts_enabled());
        k.check_invariants().unwrap();
    }
}

// ---------------------------------------------------------------------------
// Priority and affinity
// ---------------------------------------------------------------------------

mod placement_tests {
    use super::*;

    #[test]
    fn test_raising_priority_preempts() {
        let k = kernel(1);
        let a = k.spawn(task("a", 2)).unwrap();
        let b = k.spawn(task("b", 1)).unwrap();
        k.start().unwrap();
        complete_switches(&k);

        k.set_priority(TaskRef::Task(b), 4).unwrap();
        assert_eq!(k.priority(b), Ok(4));
        assert_eq!(k.current_task(), Some(b));
        assert_eq!(k.task_state(a), Ok(TaskState::Ready));
        assert_eq!(
            k.port().take_switches(),
            vec![ContextSwitch {
                core: 0,
                outgoing: Some(a),
                incoming: Some(b),
            }]
        );
    }

    #[test]
    fn test_affinity_moves_task() {
        let k = kernel(2);
        let a = k.spawn(task("a", 3).with_affinity(CoreMask::core(1))).unwrap();
        k.start().unwrap();
        assert_eq!(k.running_on(1), Some(a));
        assert_eq!(k.running_on(0), None);

        k.set_affinity(TaskRef::Task(a), CoreMask::core(0)).unwrap();
        assert_eq!(k.affinity(a), Ok(CoreMask::core(0)));
        assert_eq!(k.running_on(0), Some(a));
        assert_eq!(k.running_on(1), None);
    }

    #[test]
    fn test_affinity_outside_configured_cores_rejected() {
        let k = kernel(2);
        let a = k.spawn(task("a", 3)).unwrap();
        assert_eq!(
            k.set_affinity(TaskRef::Task(a), CoreMask::core(5)),
            Err(Error::ContractViolation)
        );
        assert_eq!(
            k.spawn(task("b", 3).with_affinity(CoreMask::core(5))),
            Err(Error::ContractViolation)
        );
    }

    #[test]
    fn test_preemption_disabled_task_keeps_its_core() {
        let k = kernel(2);
        let low = k.spawn(task("low", 1)).unwrap();
        k.start().unwrap();
        let core = k.task_status(low).unwrap().core.unwrap();
        set_core(core);
        k.disable_preemption(TaskRef::Current).unwrap();

        let b = k.spawn(task("b", 5)).unwrap();
        let c = k.spawn(task("c", 5)).unwrap();
        assert_eq!(k.running_on(core), Some(low));
        let running = [b, c]
            .iter()
            .filter(|&&t| k.task_state(t) == Ok(TaskState::Running))
            .count();
        assert_eq!(running, 1);

        k.enable_preemption(TaskRef::Current).unwrap();
        assert_eq!(k.task_state(low), Ok(TaskState::Ready));
        assert_eq!(k.task_state(b), Ok(TaskState::Running));
        assert_eq!(k.task_state(c), Ok(TaskState::Running));
        k.check_invariants().unwrap();
    }
}

// ---------------------------------------------------------------------------
// Delays
// ---------------------------------------------------------------------------

mod delay_tests {
    use super::*;

    #[test]
    fn test_delay_blocks_until_wake_tick() {
        let k = leaked_kernel(KernelConfig::new(1));
        let a = k.spawn(task("a", 2)).unwrap();
        k.start().unwrap();

        k.port().on_next_yield(move || {
            assert_eq!(k.task_state(a), Ok(TaskState::Blocked));
            assert_eq!(k.current_task(), None);
            for _ in 0..3 {
                k.tick();
            }
        });
        k.delay(3).unwrap();
        assert_eq!(k.port().yields(), 1);
        assert_eq!(k.tick_count(), 3);
        assert_eq!(k.current_task(), Some(a));
    }

    #[test]
    fn test_delay_until_period() {
        let k = leaked_kernel(KernelConfig::new(1));
        k.spawn(task("a", 2)).unwrap();
        k.start().unwrap();

        let mut last = k.tick_count();
        k.port().on_next_yield(move || {
            for _ in 0..10 {
                k.tick();
            }
        });
        assert_eq!(k.delay_until(&mut last, 10), Ok(true));
        assert_eq!(last, 10);

        // Deadline already passed: no block, previous wake still advances.
        for _ in 0..15 {
            k.tick();
        }
        assert_eq!(k.delay_until(&mut last, 10), Ok(false));
        assert_eq!(last, 20);
        assert_eq!(k.delay_until(&mut last, 0), Err(Error::ContractViolation));
    }

    #[test]
    fn test_yield_rotates_equal_priority() {
        let k = kernel(1);
        let a = k.spawn(task("a", 2)).unwrap();
        let b = k.spawn(task("b", 2)).unwrap();
        k.start().unwrap();
        assert_eq!(k.current_task(), Some(a));

        k.yield_now().unwrap();
        assert_eq!(k.current_task(), Some(b));
        assert_eq!(k.port().yields(), 1);
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

mod notify_tests {
    use super::*;

    #[test]
    fn test_pending_notification_returns_without_blocking() {
        let k = kernel(1);
        let a = k.spawn(task("a", 2)).unwrap();
        k.start().unwrap();

        assert_eq!(k.notify(a, 0b101, NotifyAction::SetBits), Ok(true));
        assert_eq!(
            k.notify(a, 9, NotifyAction::SetValueWithoutOverwrite),
            Ok(false)
        );
        let got = k.wait_for_notify(NotifyWaitOptions::default(), WAIT_FOREVER).unwrap();
        assert_eq!(
            got,
            NotifyWait {
                notified: true,
                value: 0b101,
            }
        );
        assert_eq!(k.port().yields(), 0);
    }

    #[test]
    fn test_zero_timeout_polls() {
        let k = kernel(1);
        k.spawn(task("a", 2)).unwrap();
        k.start().unwrap();

        let got = k.wait_for_notify(NotifyWaitOptions::default(), 0).unwrap();
        assert!(!got.notified);
        assert_eq!(k.port().yields(), 0);
    }

    #[test]
    fn test_wait_woken_by_notify() {
        let k = leaked_kernel(KernelConfig::new(1));
        let a = k.spawn(task("a", 2)).unwrap();
        k.start().unwrap();

        k.port().on_next_yield(move || {
            assert_eq!(k.task_state(a), Ok(TaskState::Blocked));
            assert_eq!(k.notify(a, 42, NotifyAction::SetValueWithOverwrite), Ok(true));
        });
        let options = NotifyWaitOptions {
            clear_on_entry: 0,
            clear_on_exit: u32::MAX,
        };
        let got = k.wait_for_notify(options, WAIT_FOREVER).unwrap();
        assert_eq!(
            got,
            NotifyWait {
                notified: true,
                value: 42,
            }
        );

        let again = k.wait_for_notify(NotifyWaitOptions::default(), 0).unwrap();
        assert_eq!(
            again,
            NotifyWait {
                notified: false,
                value: 0,
            }
        );
    }

    #[test]
    fn test_wait_times_out() {
        let k = leaked_kernel(KernelConfig::new(1));
        let a = k.spawn(task("a", 2)).unwrap();
        k.start().unwrap();

        k.port().on_next_yield(move || {
            for _ in 0..5 {
                k.tick();
            }
        });
        let got = k.wait_for_notify(NotifyWaitOptions::default(), 5).unwrap();
        assert!(!got.notified);
        assert_eq!(k.current_task(), Some(a));
    }
}

// ---------------------------------------------------------------------------
// Scheduler lock
// ---------------------------------------------------------------------------

mod suspend_all_tests {
    use super::*;

    #[test]
    fn test_unmatched_resume_all() {
        let k = kernel(1);
        assert_eq!(k.resume_all(), Err(Error::ContractViolation));
        assert_eq!(k.suspend_depth(), 0);
    }

    #[test]
    fn test_nesting() {
        let k = kernel(1);
        assert_eq!(k.suspend_all(), Ok(1));
        assert_eq!(k.suspend_all(), Ok(2));
        assert_eq!(k.resume_all(), Ok(false));
        assert_eq!(k.suspend_depth(), 1);
        assert_eq!(k.resume_all(), Ok(false));
        assert_eq!(k.suspend_depth(), 0);
        assert_eq!(k.resume_all(), Err(Error::ContractViolation));
    }

    #[test]
    fn test_spawn_invisible_until_resume_all() {
        let k = kernel(1);
        let a = k.spawn(task("a", 2)).unwrap();
        k.start().unwrap();
        complete_switches(&k);

        k.suspend_all().unwrap();
        let b = k.spawn(task("b", 6)).unwrap();
        for _ in 0..3 {
            k.tick();
        }
        assert_eq!(k.current_task(), Some(a));
        assert_eq!(k.tick_count(), 0);
        assert!(k.port().take_switches().is_empty());

        assert_eq!(k.resume_all(), Ok(true));
        assert_eq!(k.current_task(), Some(b));
        assert_eq!(k.tick_count(), 3);
        assert_eq!(k.port().yields(), 1);
    }

    #[test]
    fn test_blocking_inside_own_section_rejected() {
        let k = kernel(1);
        k.spawn(task("a", 2)).unwrap();
        k.start().unwrap();

        k.suspend_all().unwrap();
        assert_eq!(k.delay(5), Err(Error::ContractViolation));
        assert_eq!(k.yield_now(), Err(Error::ContractViolation));
        assert_eq!(k.delete(TaskRef::Current), Err(Error::ContractViolation));
        k.resume_all().unwrap();
        k.check_invariants().unwrap();
    }

    #[test]
    fn test_other_core_cannot_suspend_concurrently() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        let k = kernel(2);
        let a = k.spawn(task("a", 2)).unwrap();
        k.start().unwrap();
        let a_core = k.task_status(a).unwrap().core.unwrap();
        let other = 1 - a_core;

        let held = AtomicBool::new(false);
        let released = AtomicBool::new(false);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                set_core(other);
                k.suspend_all().unwrap();
                held.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                released.store(true, Ordering::SeqCst);
                k.resume_all().unwrap();
            });
            scope.spawn(|| {
                set_core(a_core);
                while !held.load(Ordering::SeqCst) {
                    std::hint::spin_loop();
                }
                // Waits for the other core's section to end.
                k.delay(1).unwrap();
                assert!(released.load(Ordering::SeqCst));
            });
        });
        assert_eq!(k.task_state(a), Ok(TaskState::Blocked));
        assert_eq!(k.suspend_depth(), 0);
    }
}
