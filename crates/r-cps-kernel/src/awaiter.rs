//! ---
//! cps_section: "02-simulation-kernel"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Cooperative discrete-event scheduler, typed event bus and virtual clock."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! The two suspension points of the kernel.
//!
//! [`Delay`] parks the current task on the timer heap; [`EventWait`]
//! registers a one-shot subscription on the event bus. Both are manual
//! futures driven exclusively by the kernel's own executor: they never
//! use the [`std::task::Waker`], the scheduler re-polls a task only when
//! it made it runnable.

use std::any::TypeId;
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use crate::error::KernelError;
use crate::event::{EventId, EventSlot, Subscription};
use crate::scheduler::Core;
use crate::task::TaskId;
use crate::time::{SimDuration, SimTime};

enum DelayState {
    Init,
    /// Non-positive duration: one trip through the ready queue.
    Yielded,
    Waiting {
        deadline: SimTime,
    },
    Done,
}

/// Future returned by [`crate::SimContext::delay`].
///
/// Resumes with `now >= issue_time + max(d, 0)`; a non-positive duration
/// still yields once through the ready queue so zero-delay loops stay
/// fair to their siblings.
pub struct Delay {
    core: Weak<RefCell<Core>>,
    task: Option<TaskId>,
    duration: SimDuration,
    state: DelayState,
}

impl Delay {
    pub(crate) fn new(
        core: Weak<RefCell<Core>>,
        task: Option<TaskId>,
        duration: SimDuration,
    ) -> Self {
        Self {
            core,
            task,
            duration,
            state: DelayState::Init,
        }
    }
}

impl Future for Delay {
    type Output = Result<(), KernelError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(core_rc) = this.core.upgrade() else {
            return Poll::Ready(Err(KernelError::DelayNotScheduled));
        };
        let Some(task) = this.task else {
            return Poll::Ready(Err(KernelError::DelayNotScheduled));
        };
        let mut core = core_rc.borrow_mut();
        if core.is_cancelled(task) {
            this.state = DelayState::Done;
            return Poll::Ready(Err(KernelError::Cancelled));
        }
        match this.state {
            DelayState::Init => {
                if this.duration.is_positive() {
                    let deadline = core.now + this.duration;
                    core.push_timer(deadline, task);
                    this.state = DelayState::Waiting { deadline };
                } else {
                    core.make_ready(task);
                    this.state = DelayState::Yielded;
                }
                Poll::Pending
            }
            DelayState::Yielded => {
                this.state = DelayState::Done;
                Poll::Ready(Ok(()))
            }
            DelayState::Waiting { deadline } => {
                if core.now >= deadline {
                    this.state = DelayState::Done;
                    Poll::Ready(Ok(()))
                } else {
                    Poll::Pending
                }
            }
            DelayState::Done => Poll::Ready(Ok(())),
        }
    }
}

/// Future returned by [`crate::SimContext::wait_for_event`].
///
/// Registers a `(task, type-tag, slot)` subscription on first poll and
/// resolves when a publisher fires the channel: with the payload when
/// the types agree, with [`KernelError::TypeMismatch`] when they do not.
/// Strictly one-shot; a consumed or dropped `EventWait` leaves no
/// subscription behind.
pub struct EventWait<T> {
    core: Weak<RefCell<Core>>,
    task: Option<TaskId>,
    event: EventId,
    slot: Option<Rc<RefCell<EventSlot>>>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Clone + 'static> EventWait<T> {
    pub(crate) fn new(core: Weak<RefCell<Core>>, task: Option<TaskId>, event: EventId) -> Self {
        Self {
            core,
            task,
            event,
            slot: None,
            _payload: PhantomData,
        }
    }
}

impl<T: Clone + 'static> Future for EventWait<T> {
    type Output = Result<T, KernelError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(core_rc) = this.core.upgrade() else {
            return Poll::Ready(Err(KernelError::NoActiveScheduler));
        };
        let Some(task) = this.task else {
            return Poll::Ready(Err(KernelError::NoActiveScheduler));
        };
        let mut core = core_rc.borrow_mut();
        if core.is_cancelled(task) {
            return Poll::Ready(Err(KernelError::Cancelled));
        }
        match &this.slot {
            None => {
                let slot = Rc::new(RefCell::new(EventSlot::Waiting));
                core.subscribe(
                    this.event,
                    Subscription {
                        task,
                        type_id: TypeId::of::<T>(),
                        type_name: std::any::type_name::<T>(),
                        slot: Rc::clone(&slot),
                    },
                );
                this.slot = Some(slot);
                Poll::Pending
            }
            Some(slot) => {
                let delivered = std::mem::replace(&mut *slot.borrow_mut(), EventSlot::Waiting);
                match delivered {
                    EventSlot::Delivered(payload) => {
                        let value = payload
                            .downcast::<T>()
                            .expect("payload type verified at delivery");
                        this.slot = None;
                        Poll::Ready(Ok(*value))
                    }
                    EventSlot::Mismatch { expected, actual } => {
                        this.slot = None;
                        Poll::Ready(Err(KernelError::TypeMismatch {
                            event: this.event,
                            expected,
                            actual,
                        }))
                    }
                    EventSlot::Waiting => Poll::Pending,
                }
            }
        }
    }
}

impl<T> Drop for EventWait<T> {
    fn drop(&mut self) {
        // An abandoned awaiter must not leave a dangling subscription.
        if let (Some(slot), Some(core_rc)) = (&self.slot, self.core.upgrade()) {
            core_rc.borrow_mut().unsubscribe(self.event, slot);
        }
    }
}
