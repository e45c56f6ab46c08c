//! ---
//! cps_section: "02-simulation-kernel"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Cooperative discrete-event scheduler, typed event bus and virtual clock."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! The scheduler: virtual clock, FIFO ready queue, timer heap, typed
//! subscriber table and the single-threaded poll loop that drives them.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Instant;

use tracing::{debug, error, trace, warn};

use crate::awaiter::{Delay, EventWait};
use crate::error::{KernelError, TaskResult};
use crate::event::{EventId, EventSlot, Subscription};
use crate::task::{TaskHandle, TaskId};
use crate::time::{SimDuration, SimTime};

/// Result of a single scheduling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A task was resumed or the clock advanced to a timer deadline.
    Progressed,
    /// No ready task and no pending timer.
    Idle,
}

/// Timer heap entry; ordered by `(deadline, seq)` so simultaneous
/// deadlines resume in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TimerEntry {
    deadline: SimTime,
    seq: u64,
    task: TaskId,
}

struct TaskSlot {
    /// Taken out while the task is being polled.
    future: Option<Pin<Box<dyn Future<Output = TaskResult>>>>,
    polled: bool,
    completed: bool,
    cancelled: bool,
    failure: Option<KernelError>,
}

/// Mutable scheduler state shared between the façade, the context
/// handles and the awaiters.
pub(crate) struct Core {
    pub(crate) now: SimTime,
    ready: VecDeque<TaskId>,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    timer_seq: u64,
    subscribers: HashMap<EventId, Vec<Subscription>>,
    tasks: HashMap<TaskId, TaskSlot>,
    next_task_id: u64,
    /// Set once any task has been polled; guards pre-run clock setup.
    started: bool,
}

impl Core {
    fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            ready: VecDeque::new(),
            timers: BinaryHeap::new(),
            timer_seq: 0,
            subscribers: HashMap::new(),
            tasks: HashMap::new(),
            next_task_id: 0,
            started: false,
        }
    }

    fn alloc_task_id(&mut self) -> TaskId {
        self.next_task_id += 1;
        TaskId(self.next_task_id)
    }

    fn is_live(&self, task: TaskId) -> bool {
        self.tasks.get(&task).is_some_and(|slot| !slot.completed)
    }

    pub(crate) fn is_completed(&self, task: TaskId) -> bool {
        !self.is_live(task)
    }

    pub(crate) fn is_cancelled(&self, task: TaskId) -> bool {
        self.tasks
            .get(&task)
            .is_some_and(|slot| slot.cancelled && !slot.completed)
    }

    pub(crate) fn make_ready(&mut self, task: TaskId) {
        self.ready.push_back(task);
    }

    pub(crate) fn push_timer(&mut self, deadline: SimTime, task: TaskId) {
        self.timer_seq += 1;
        self.timers.push(Reverse(TimerEntry {
            deadline,
            seq: self.timer_seq,
            task,
        }));
    }

    pub(crate) fn subscribe(&mut self, event: EventId, subscription: Subscription) {
        self.subscribers.entry(event).or_default().push(subscription);
    }

    pub(crate) fn unsubscribe(&mut self, event: EventId, slot: &Rc<RefCell<EventSlot>>) {
        if let Some(subs) = self.subscribers.get_mut(&event) {
            subs.retain(|s| !Rc::ptr_eq(&s.slot, slot));
            if subs.is_empty() {
                self.subscribers.remove(&event);
            }
        }
    }

    /// One-shot fan-out. The subscriber set is snapshotted and removed
    /// before dispatch, so re-subscriptions never see this emission.
    /// Returns the number of subscribers that received the payload.
    pub(crate) fn trigger_dyn(
        &mut self,
        event: EventId,
        type_id: TypeId,
        type_name: &'static str,
        make_payload: &mut dyn FnMut() -> Box<dyn Any>,
    ) -> usize {
        let subscriptions = match self.subscribers.remove(&event) {
            Some(subs) => subs,
            None => return 0,
        };
        let mut delivered = 0usize;
        for sub in subscriptions {
            if !self.is_live(sub.task) {
                continue;
            }
            if sub.type_id == type_id {
                *sub.slot.borrow_mut() = EventSlot::Delivered(make_payload());
                delivered += 1;
            } else {
                warn!(
                    event,
                    subscriber = %sub.task,
                    expected = sub.type_name,
                    actual = type_name,
                    "event payload type mismatch"
                );
                *sub.slot.borrow_mut() = EventSlot::Mismatch {
                    expected: sub.type_name,
                    actual: type_name,
                };
            }
            self.ready.push_back(sub.task);
        }
        delivered
    }

    /// Request cooperative cancellation. The task's subscription is
    /// removed immediately; a pending timer entry is abandoned in place
    /// and skipped when it fires. The task is made runnable so its
    /// awaiter can observe the cancellation.
    pub(crate) fn cancel(&mut self, task: TaskId) {
        let Some(slot) = self.tasks.get_mut(&task) else {
            return;
        };
        if slot.completed || slot.cancelled {
            return;
        }
        slot.cancelled = true;
        for subs in self.subscribers.values_mut() {
            subs.retain(|s| s.task != task);
        }
        self.subscribers.retain(|_, subs| !subs.is_empty());
        if !self.ready.contains(&task) {
            self.ready.push_back(task);
        }
        debug!(task = %task, "task cancellation requested");
    }

    /// Pop the next runnable task, discarding entries whose task has
    /// already completed (stale wakeups from abandoned timers).
    fn pop_ready(&mut self) -> Option<TaskId> {
        while let Some(id) = self.ready.pop_front() {
            if self.is_live(id) {
                return Some(id);
            }
        }
        None
    }

    /// Earliest deadline owned by a live task; stale heap heads are
    /// dropped on the way.
    fn next_timer_deadline(&mut self) -> Option<SimTime> {
        while let Some(&Reverse(entry)) = self.timers.peek() {
            if self.is_live(entry.task) {
                return Some(entry.deadline);
            }
            self.timers.pop();
        }
        None
    }

    /// Move every timer with `deadline <= now` to the ready queue,
    /// preserving insertion order.
    fn drain_due_timers(&mut self) {
        while let Some(&Reverse(entry)) = self.timers.peek() {
            if entry.deadline > self.now {
                break;
            }
            self.timers.pop();
            if self.is_live(entry.task) {
                self.ready.push_back(entry.task);
            }
        }
    }

    fn has_pending(&mut self) -> bool {
        while let Some(&id) = self.ready.front() {
            if self.is_live(id) {
                return true;
            }
            self.ready.pop_front();
        }
        self.next_timer_deadline().is_some()
    }
}

/// The co-simulation scheduler façade.
///
/// Owns the virtual clock and every spawned task. All execution happens
/// on the calling thread through [`Scheduler::run_one_step`],
/// [`Scheduler::run_until`] or the wall-clock-paced
/// [`Scheduler::run_real_time_until`].
pub struct Scheduler {
    core: Rc<RefCell<Core>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            core: Rc::new(RefCell::new(Core::new())),
        }
    }

    /// A driver-side context for triggering events and spawning tasks
    /// from outside any task body.
    pub fn context(&self) -> SimContext {
        SimContext {
            core: Rc::downgrade(&self.core),
            task: None,
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> SimTime {
        self.core.borrow().now
    }

    /// Driver-only pre-run setup: place the clock at an arbitrary epoch.
    /// Calling this after any task has run breaks the timers-only
    /// time-advance rule, hence the debug assertion.
    pub fn set_time(&mut self, time: SimTime) {
        let mut core = self.core.borrow_mut();
        debug_assert!(!core.started, "set_time is pre-run setup only");
        core.now = time;
    }

    /// Driver-only pre-run setup: shift the clock forward.
    pub fn advance(&mut self, delta: SimDuration) {
        let mut core = self.core.borrow_mut();
        debug_assert!(!core.started, "advance is pre-run setup only");
        core.now = core.now + delta;
    }

    /// Spawn a task. The body closure receives the task's [`SimContext`]
    /// and returns the async body. The task is enqueued runnable and does
    /// not execute before the scheduler next steps; spawning from inside
    /// a running task is allowed.
    pub fn spawn<F, Fut>(&self, body: F) -> TaskHandle
    where
        F: FnOnce(SimContext) -> Fut,
        Fut: Future<Output = TaskResult> + 'static,
    {
        spawn_on(&self.core, body)
    }

    /// Publish `value` on channel `id`. Returns the number of
    /// subscribers that received it; mismatched subscribers are resumed
    /// with [`KernelError::TypeMismatch`] instead.
    pub fn trigger_event<T: Clone + 'static>(&self, id: EventId, value: T) -> usize {
        trigger_on(&self.core, id, value)
    }

    /// Publish a payload-free signal on channel `id`.
    pub fn trigger(&self, id: EventId) -> usize {
        trigger_on(&self.core, id, ())
    }

    /// True while any live task is ready or waiting on a timer.
    pub fn has_pending_tasks(&self) -> bool {
        self.core.borrow_mut().has_pending()
    }

    /// Failure recorded for a completed task, if any.
    pub fn task_failure(&self, task: TaskId) -> Option<KernelError> {
        self.core
            .borrow()
            .tasks
            .get(&task)
            .and_then(|slot| slot.failure.clone())
    }

    /// Execute one scheduling step.
    ///
    /// Resumes the front of the ready queue if non-empty; otherwise
    /// advances the clock to the earliest timer deadline (never
    /// backward), drains all due timers and resumes one task. Returns
    /// [`StepOutcome::Idle`] when there is nothing to do.
    pub fn run_one_step(&mut self) -> StepOutcome {
        let runnable = self.core.borrow_mut().pop_ready();
        if let Some(task) = runnable {
            resume(&self.core, task);
            return StepOutcome::Progressed;
        }

        let fired = {
            let mut core = self.core.borrow_mut();
            match core.next_timer_deadline() {
                None => return StepOutcome::Idle,
                Some(deadline) => {
                    if deadline > core.now {
                        core.now = deadline;
                    }
                    core.drain_due_timers();
                    core.pop_ready()
                }
            }
        };
        if let Some(task) = fired {
            resume(&self.core, task);
        }
        StepOutcome::Progressed
    }

    /// Run until the virtual clock reaches `deadline` or no work remains.
    /// On return `now() == deadline` (the clock is topped up even when
    /// the simulation drained early). Timers due exactly at `deadline`
    /// do not fire.
    pub fn run_until(&mut self, deadline: SimTime) {
        loop {
            {
                let mut core = self.core.borrow_mut();
                if core.now >= deadline || !core.has_pending() {
                    break;
                }
            }

            // Drain every task runnable at the current instant. The
            // borrow must not span the resume, so pop as a statement.
            loop {
                let next = self.core.borrow_mut().pop_ready();
                match next {
                    Some(task) => resume(&self.core, task),
                    None => break,
                }
            }

            let mut core = self.core.borrow_mut();
            match core.next_timer_deadline() {
                None => break,
                Some(next) if next >= deadline => {
                    core.now = deadline;
                    break;
                }
                Some(next) => {
                    core.now = next;
                    core.drain_due_timers();
                }
            }
        }
        let mut core = self.core.borrow_mut();
        if core.now < deadline {
            core.now = deadline;
        }
    }

    /// Run until `deadline`, pacing virtual time against the wall clock.
    ///
    /// Keeps a `(wall_start, sim_start)` reference and sleeps between
    /// steps until the wall clock catches up with the virtual clock. A
    /// run that cannot meet pacing never corrects retroactively; virtual
    /// time stays exact and the wall-clock lag is logged.
    pub fn run_real_time_until(&mut self, deadline: SimTime) {
        let wall_start = Instant::now();
        let sim_start = self.now();

        while self.now() < deadline {
            if !self.has_pending_tasks() {
                break;
            }
            self.run_one_step();

            let target_wall = wall_start + (self.now() - sim_start).to_std();
            let now_wall = Instant::now();
            if target_wall > now_wall {
                std::thread::sleep(target_wall - now_wall);
            } else {
                let lag = now_wall - target_wall;
                if lag.as_millis() > 0 {
                    trace!(lag_ms = lag.as_millis() as u64, "real-time pacing overrun");
                }
            }
        }

        if self.now() < deadline {
            let final_target = wall_start + (deadline - sim_start).to_std();
            let now_wall = Instant::now();
            if final_target > now_wall {
                std::thread::sleep(final_target - now_wall);
            }
            self.core.borrow_mut().now = deadline;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.borrow();
        f.debug_struct("Scheduler")
            .field("now", &core.now)
            .field("ready", &core.ready.len())
            .field("timers", &core.timers.len())
            .field("tasks", &core.tasks.len())
            .finish()
    }
}

/// Per-task (or driver-side) handle into the scheduler, passed to every
/// spawn closure. Cheap to clone; holds the scheduler weakly so awaiting
/// after scheduler teardown surfaces [`KernelError::NoActiveScheduler`]
/// rather than dangling.
#[derive(Clone)]
pub struct SimContext {
    pub(crate) core: Weak<RefCell<Core>>,
    pub(crate) task: Option<TaskId>,
}

impl SimContext {
    /// Current virtual time; the epoch if the scheduler is gone.
    pub fn now(&self) -> SimTime {
        self.core
            .upgrade()
            .map(|core| core.borrow().now)
            .unwrap_or(SimTime::ZERO)
    }

    /// Suspend the current task for `duration` of virtual time.
    ///
    /// A non-positive duration re-queues the task at the back of the
    /// ready queue instead of falling through, preserving fairness for
    /// zero-delay yields.
    pub fn delay(&self, duration: SimDuration) -> Delay {
        Delay::new(self.core.clone(), self.task, duration)
    }

    /// Suspend until channel `id` fires with a `T` payload. One-shot:
    /// each await registers a fresh subscription.
    pub fn wait_for_event<T: Clone + 'static>(&self, id: EventId) -> EventWait<T> {
        EventWait::new(self.core.clone(), self.task, id)
    }

    /// Suspend until the payload-free signal `id` fires.
    pub fn wait_for_signal(&self, id: EventId) -> EventWait<()> {
        self.wait_for_event::<()>(id)
    }

    /// Publish `value` on channel `id`; see [`Scheduler::trigger_event`].
    /// Delivery never preempts the caller: subscribers only run once the
    /// current task next suspends.
    pub fn trigger_event<T: Clone + 'static>(&self, id: EventId, value: T) -> usize {
        match self.core.upgrade() {
            Some(core) => trigger_on(&core, id, value),
            None => 0,
        }
    }

    /// Publish a payload-free signal on channel `id`.
    pub fn trigger(&self, id: EventId) -> usize {
        self.trigger_event(id, ())
    }

    /// Spawn a sibling task; it will not run before the current task
    /// next suspends. Returns a dead handle if the scheduler is gone.
    pub fn spawn<F, Fut>(&self, body: F) -> TaskHandle
    where
        F: FnOnce(SimContext) -> Fut,
        Fut: Future<Output = TaskResult> + 'static,
    {
        match self.core.upgrade() {
            Some(core) => spawn_on(&core, body),
            None => TaskHandle {
                id: TaskId(0),
                core: Weak::new(),
                detached: true,
            },
        }
    }
}

impl std::fmt::Debug for SimContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimContext").field("task", &self.task).finish()
    }
}

fn spawn_on<F, Fut>(core_rc: &Rc<RefCell<Core>>, body: F) -> TaskHandle
where
    F: FnOnce(SimContext) -> Fut,
    Fut: Future<Output = TaskResult> + 'static,
{
    let id = core_rc.borrow_mut().alloc_task_id();
    let ctx = SimContext {
        core: Rc::downgrade(core_rc),
        task: Some(id),
    };
    // Building the future must not hold the core borrow: the closure may
    // consult the context (e.g. `ctx.now()`).
    let future = body(ctx);

    let mut core = core_rc.borrow_mut();
    core.tasks.insert(
        id,
        TaskSlot {
            future: Some(Box::pin(future)),
            polled: false,
            completed: false,
            cancelled: false,
            failure: None,
        },
    );
    core.ready.push_back(id);
    trace!(task = %id, "task spawned");

    TaskHandle {
        id,
        core: Rc::downgrade(core_rc),
        detached: false,
    }
}

fn trigger_on<T: Clone + 'static>(core: &Rc<RefCell<Core>>, id: EventId, value: T) -> usize {
    let mut make_payload = || -> Box<dyn Any> { Box::new(value.clone()) };
    core.borrow_mut().trigger_dyn(
        id,
        TypeId::of::<T>(),
        std::any::type_name::<T>(),
        &mut make_payload,
    )
}

/// Poll one task to its next suspension point. The future is taken out
/// of its slot for the duration of the poll so context handles can
/// freely re-borrow the core. Panics are caught here; a panicking task
/// completes with [`KernelError::Panicked`] and the scheduler carries on.
fn resume(core_rc: &Rc<RefCell<Core>>, task: TaskId) {
    // Dropping a future can run user destructors (child task handles,
    // pending awaiters) that re-borrow the core, so every drop of a
    // future below happens outside the core borrow.
    let (taken, run) = {
        let mut core = core_rc.borrow_mut();
        let Some(slot) = core.tasks.get_mut(&task) else {
            return;
        };
        if slot.completed {
            return;
        }
        if slot.cancelled && !slot.polled {
            // Never started: complete without running any user code.
            let future = slot.future.take();
            slot.completed = true;
            slot.failure = Some(KernelError::Cancelled);
            debug!(task = %task, "task cancelled before first run");
            (future, false)
        } else {
            match slot.future.take() {
                None => return,
                Some(future) => {
                    slot.polled = true;
                    core.started = true;
                    (Some(future), true)
                }
            }
        }
    };
    if !run {
        drop(taken);
        return;
    }
    let mut future = taken.expect("runnable task has a future");

    let mut cx = Context::from_waker(Waker::noop());
    let outcome = catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));

    let mut finished = None;
    {
        let mut core = core_rc.borrow_mut();
        let slot = core
            .tasks
            .get_mut(&task)
            .expect("task slot survives its own poll");
        match outcome {
            Ok(Poll::Pending) => {
                slot.future = Some(future);
            }
            Ok(Poll::Ready(result)) => {
                slot.completed = true;
                finished = Some(future);
                match result {
                    Ok(()) => trace!(task = %task, "task completed"),
                    Err(KernelError::Cancelled) => {
                        slot.failure = Some(KernelError::Cancelled);
                        debug!(task = %task, "task cancelled");
                    }
                    Err(err) => {
                        warn!(task = %task, error = %err, "task failed");
                        slot.failure = Some(err);
                    }
                }
            }
            Err(_panic) => {
                slot.completed = true;
                slot.failure = Some(KernelError::Panicked);
                finished = Some(future);
                error!(task = %task, "task panicked; simulation continues");
            }
        }
    }
    drop(finished);
}
