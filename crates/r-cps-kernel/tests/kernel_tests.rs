//! ---
//! cps_section: "02-simulation-kernel"
//! cps_subsection: "integration-test"
//! cps_type: "test"
//! cps_scope: "code"
//! cps_description: "Scheduler, awaiter and event-bus behaviour tests."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use r_cps_kernel::{KernelError, Scheduler, SimDuration, SimTime, StepOutcome};

type Log = Rc<RefCell<Vec<String>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

#[test]
fn same_deadline_resumes_in_spawn_order() {
    // Three tasks all sleep 10ms and then fire distinct unit channels.
    let scheduler = Scheduler::new();
    let log = new_log();

    for id in [1u64, 2, 3] {
        let log = log.clone();
        scheduler
            .spawn(move |ctx| async move {
                ctx.delay(SimDuration::from_millis(10)).await?;
                ctx.trigger(id);
                log.borrow_mut().push(format!("{id}"));
                Ok(())
            })
            .detach();
    }

    let mut scheduler = scheduler;
    scheduler.run_until(SimTime::from_millis(20));

    assert_eq!(entries(&log), vec!["1", "2", "3"]);
    assert_eq!(scheduler.now(), SimTime::from_millis(20));
}

#[test]
fn event_fans_out_in_subscription_order() {
    let scheduler = Scheduler::new();
    let log = new_log();
    let delivered = Rc::new(std::cell::Cell::new(0usize));

    for name in ["first", "second"] {
        let log = log.clone();
        scheduler
            .spawn(move |ctx| async move {
                let value = ctx.wait_for_event::<i32>(42).await?;
                log.borrow_mut().push(format!("{name}={value}@{}", ctx.now()));
                Ok(())
            })
            .detach();
    }
    {
        let delivered = delivered.clone();
        scheduler
            .spawn(move |ctx| async move {
                ctx.delay(SimDuration::from_millis(5)).await?;
                delivered.set(ctx.trigger_event(42, 7i32));
                Ok(())
            })
            .detach();
    }

    let mut scheduler = scheduler;
    scheduler.run_until(SimTime::from_millis(10));

    assert_eq!(delivered.get(), 2);
    assert_eq!(entries(&log), vec!["first=7@5ms", "second=7@5ms"]);
}

#[test]
fn type_mismatch_fails_only_the_mismatched_subscriber() {
    let scheduler = Scheduler::new();
    let log = new_log();

    let log_x = log.clone();
    scheduler
        .spawn(move |ctx| async move {
            let value = ctx.wait_for_event::<i32>(9).await?;
            log_x.borrow_mut().push(format!("x={value}"));
            Ok(())
        })
        .detach();
    let mismatched = scheduler.spawn(move |ctx| async move {
        let text = ctx.wait_for_event::<String>(9).await?;
        unreachable!("subscriber must not receive {text}");
    });
    let mismatched_id = mismatched.id();
    mismatched.detach();
    let delivered = Rc::new(std::cell::Cell::new(0usize));
    {
        let delivered = delivered.clone();
        scheduler
            .spawn(move |ctx| async move {
                ctx.delay(SimDuration::from_millis(1)).await?;
                delivered.set(ctx.trigger_event(9, 3i32));
                Ok(())
            })
            .detach();
    }

    let mut scheduler = scheduler;
    scheduler.run_until(SimTime::from_millis(5));

    // Only the correctly-typed subscriber counts as a delivery.
    assert_eq!(delivered.get(), 1);
    assert_eq!(entries(&log), vec!["x=3"]);
    assert!(matches!(
        scheduler.task_failure(mismatched_id),
        Some(KernelError::TypeMismatch { event: 9, .. })
    ));
}

#[test]
fn events_are_one_shot() {
    let scheduler = Scheduler::new();
    let log = new_log();

    let log_early = log.clone();
    scheduler
        .spawn(move |ctx| async move {
            let v = ctx.wait_for_event::<u32>(77).await?;
            log_early.borrow_mut().push(format!("early={v}"));
            Ok(())
        })
        .detach();

    let mut scheduler = scheduler;
    // Let the early subscriber register.
    while scheduler.run_one_step() == StepOutcome::Progressed {}
    assert_eq!(scheduler.trigger_event(77, 11u32), 1);
    while scheduler.run_one_step() == StepOutcome::Progressed {}

    // A subscriber registering after the emission sees nothing.
    let late = scheduler.spawn(|ctx| async move {
        let _ = ctx.wait_for_event::<u32>(77).await?;
        unreachable!("late subscriber must miss the earlier emission");
    });
    while scheduler.run_one_step() == StepOutcome::Progressed {}

    assert_eq!(entries(&log), vec!["early=11"]);
    assert!(!late.is_done());
    late.detach();
}

#[test]
fn program_order_delivery_without_suspension() {
    let scheduler = Scheduler::new();
    let log = new_log();

    for (channel, name) in [(1u64, "a"), (2u64, "b")] {
        let log = log.clone();
        scheduler
            .spawn(move |ctx| async move {
                ctx.wait_for_signal(channel).await?;
                log.borrow_mut().push(name.to_owned());
                Ok(())
            })
            .detach();
    }
    scheduler
        .spawn(|ctx| async move {
            // Two emissions, no suspension in between.
            ctx.trigger(1);
            ctx.trigger(2);
            Ok(())
        })
        .detach();

    let mut scheduler = scheduler;
    scheduler.run_until(SimTime::from_millis(1));
    assert_eq!(entries(&log), vec!["a", "b"]);
}

#[test]
fn zero_delay_yields_once_through_the_ready_queue() {
    let scheduler = Scheduler::new();
    let log = new_log();

    let log_a = log.clone();
    scheduler
        .spawn(move |ctx| async move {
            log_a.borrow_mut().push("a1".into());
            ctx.delay(SimDuration::ZERO).await?;
            log_a.borrow_mut().push("a2".into());
            Ok(())
        })
        .detach();
    let log_b = log.clone();
    scheduler
        .spawn(move |ctx| async move {
            log_b.borrow_mut().push("b1".into());
            ctx.delay(SimDuration::from_millis(-3)).await?;
            log_b.borrow_mut().push("b2".into());
            Ok(())
        })
        .detach();

    let mut scheduler = scheduler;
    scheduler.run_until(SimTime::from_millis(1));

    // Each zero/negative delay re-queues at the back instead of falling
    // through, so the two tasks interleave.
    assert_eq!(entries(&log), vec!["a1", "b1", "a2", "b2"]);
}

#[test]
fn delay_lower_bound_and_monotonic_clock() {
    let scheduler = Scheduler::new();
    let observed = Rc::new(RefCell::new(Vec::<SimTime>::new()));

    let observed_task = observed.clone();
    scheduler
        .spawn(move |ctx| async move {
            let before = ctx.now();
            observed_task.borrow_mut().push(before);
            ctx.delay(SimDuration::from_millis(25)).await?;
            let after = ctx.now();
            observed_task.borrow_mut().push(after);
            assert!(after >= before + SimDuration::from_millis(25));
            ctx.delay(SimDuration::from_millis(5)).await?;
            observed_task.borrow_mut().push(ctx.now());
            Ok(())
        })
        .detach();

    let mut scheduler = scheduler;
    scheduler.run_until(SimTime::from_millis(100));

    let times = observed.borrow().clone();
    assert_eq!(
        times,
        vec![
            SimTime::ZERO,
            SimTime::from_millis(25),
            SimTime::from_millis(30)
        ]
    );
    for pair in times.windows(2) {
        assert!(pair[1] >= pair[0]);
    }
}

#[test]
fn run_until_stops_short_of_future_timers() {
    let scheduler = Scheduler::new();
    let log = new_log();

    let log_t = log.clone();
    scheduler
        .spawn(move |ctx| async move {
            ctx.delay(SimDuration::from_millis(50)).await?;
            log_t.borrow_mut().push(format!("fired@{}", ctx.now()));
            Ok(())
        })
        .detach();

    let mut scheduler = scheduler;
    scheduler.run_until(SimTime::from_millis(20));
    assert_eq!(scheduler.now(), SimTime::from_millis(20));
    assert!(entries(&log).is_empty());

    scheduler.run_until(SimTime::from_millis(60));
    assert_eq!(entries(&log), vec!["fired@50ms"]);
    assert_eq!(scheduler.now(), SimTime::from_millis(60));
}

#[test]
fn run_one_step_reports_idle_when_drained() {
    let mut scheduler = Scheduler::new();
    assert_eq!(scheduler.run_one_step(), StepOutcome::Idle);

    scheduler
        .spawn(|_ctx| async move { Ok(()) })
        .detach();
    assert_eq!(scheduler.run_one_step(), StepOutcome::Progressed);
    assert_eq!(scheduler.run_one_step(), StepOutcome::Idle);
}

#[test]
fn dropping_a_handle_cancels_a_waiting_task() {
    let scheduler = Scheduler::new();
    let log = new_log();

    let log_t = log.clone();
    let handle = scheduler.spawn(move |ctx| async move {
        match ctx.wait_for_event::<i32>(500).await {
            Err(KernelError::Cancelled) => {
                log_t.borrow_mut().push("cancelled".into());
                Err(KernelError::Cancelled)
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    });
    let id = handle.id();

    let mut scheduler = scheduler;
    // Let the task register its subscription, then drop the handle.
    while scheduler.run_one_step() == StepOutcome::Progressed {}
    drop(handle);
    while scheduler.run_one_step() == StepOutcome::Progressed {}

    assert_eq!(entries(&log), vec!["cancelled"]);
    assert_eq!(scheduler.task_failure(id), Some(KernelError::Cancelled));
    // The subscription is gone: nobody receives this.
    assert_eq!(scheduler.trigger_event(500, 1i32), 0);
}

#[test]
fn cancelling_a_delayed_task_abandons_its_timer() {
    let scheduler = Scheduler::new();
    let handle = scheduler.spawn(|ctx| async move {
        ctx.delay(SimDuration::from_millis(100)).await?;
        panic!("timer must never complete for a cancelled task");
    });
    let id = handle.id();

    let mut scheduler = scheduler;
    while scheduler.run_one_step() == StepOutcome::Progressed {}
    drop(handle);
    scheduler.run_until(SimTime::from_millis(200));

    assert_eq!(scheduler.task_failure(id), Some(KernelError::Cancelled));
    assert_eq!(scheduler.now(), SimTime::from_millis(200));
}

#[test]
fn cancelling_before_first_run_skips_the_body_entirely() {
    let scheduler = Scheduler::new();
    let log = new_log();

    let log_t = log.clone();
    let handle = scheduler.spawn(move |ctx| async move {
        log_t.borrow_mut().push("ran".into());
        ctx.delay(SimDuration::from_millis(1)).await?;
        Ok(())
    });
    let id = handle.id();
    drop(handle);

    let mut scheduler = scheduler;
    scheduler.run_until(SimTime::from_millis(10));

    assert!(entries(&log).is_empty());
    assert_eq!(scheduler.task_failure(id), Some(KernelError::Cancelled));
}

#[test]
fn detached_tasks_outlive_their_handle() {
    let scheduler = Scheduler::new();
    let log = new_log();

    let log_t = log.clone();
    let handle = scheduler.spawn(move |ctx| async move {
        ctx.delay(SimDuration::from_millis(5)).await?;
        log_t.borrow_mut().push("done".into());
        Ok(())
    });
    handle.detach();

    let mut scheduler = scheduler;
    scheduler.run_until(SimTime::from_millis(10));
    assert_eq!(entries(&log), vec!["done"]);
}

#[test]
fn tasks_spawned_from_tasks_run_after_the_parent_suspends() {
    let scheduler = Scheduler::new();
    let log = new_log();

    let log_p = log.clone();
    scheduler
        .spawn(move |ctx| async move {
            let log_c = log_p.clone();
            ctx.spawn(move |_ctx| async move {
                log_c.borrow_mut().push("child".into());
                Ok(())
            })
            .detach();
            log_p.borrow_mut().push("parent-before-yield".into());
            ctx.delay(SimDuration::ZERO).await?;
            log_p.borrow_mut().push("parent-after-yield".into());
            Ok(())
        })
        .detach();

    let mut scheduler = scheduler;
    scheduler.run_until(SimTime::from_millis(1));
    assert_eq!(
        entries(&log),
        vec!["parent-before-yield", "child", "parent-after-yield"]
    );
}

#[test]
fn a_panicking_task_does_not_abort_the_scheduler() {
    let scheduler = Scheduler::new();
    let log = new_log();

    let panicking = scheduler.spawn(|_ctx| async move { panic!("agent blew up") });
    let id = panicking.id();
    panicking.detach();

    let log_t = log.clone();
    scheduler
        .spawn(move |ctx| async move {
            ctx.delay(SimDuration::from_millis(1)).await?;
            log_t.borrow_mut().push("survivor".into());
            Ok(())
        })
        .detach();

    let mut scheduler = scheduler;
    scheduler.run_until(SimTime::from_millis(5));

    assert_eq!(scheduler.task_failure(id), Some(KernelError::Panicked));
    assert_eq!(entries(&log), vec!["survivor"]);
}

#[test]
fn driver_context_outliving_the_scheduler_degrades_gracefully() {
    let scheduler = Scheduler::new();
    let ctx = scheduler.context();
    drop(scheduler);

    assert_eq!(ctx.now(), SimTime::ZERO);
    assert_eq!(ctx.trigger_event(1, 1i32), 0);
    let handle = ctx.spawn(|_ctx| async move { Ok(()) });
    assert!(handle.is_done());
}

#[test]
fn pre_run_clock_setup_shifts_the_epoch() {
    let mut scheduler = Scheduler::new();
    scheduler.set_time(SimTime::from_millis(1_000));
    scheduler.advance(SimDuration::from_millis(500));
    assert_eq!(scheduler.now(), SimTime::from_millis(1_500));

    let fired_at = Rc::new(RefCell::new(SimTime::ZERO));
    let fired = fired_at.clone();
    scheduler
        .spawn(move |ctx| async move {
            ctx.delay(SimDuration::from_millis(10)).await?;
            *fired.borrow_mut() = ctx.now();
            Ok(())
        })
        .detach();
    scheduler.run_until(SimTime::from_millis(2_000));
    assert_eq!(*fired_at.borrow(), SimTime::from_millis(1_510));
}

#[test]
fn real_time_run_paces_against_the_wall_clock() {
    let scheduler = Scheduler::new();
    let log = new_log();

    let log_t = log.clone();
    scheduler
        .spawn(move |ctx| async move {
            ctx.delay(SimDuration::from_millis(10)).await?;
            log_t.borrow_mut().push(format!("t={}", ctx.now()));
            Ok(())
        })
        .detach();

    let mut scheduler = scheduler;
    let wall_start = Instant::now();
    scheduler.run_real_time_until(SimTime::from_millis(30));
    let wall_elapsed = wall_start.elapsed();

    assert_eq!(entries(&log), vec!["t=10ms"]);
    assert_eq!(scheduler.now(), SimTime::from_millis(30));
    // Virtual 30ms must cost at least roughly that much wall time.
    assert!(wall_elapsed >= std::time::Duration::from_millis(25));
}
