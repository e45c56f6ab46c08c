//! ---
//! cps_section: "02-simulation-kernel"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Cooperative discrete-event scheduler, typed event bus and virtual clock."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
use thiserror::Error;

use crate::event::EventId;

/// Outcome of a task body; errors propagate with `?` and mark the task
/// completed-with-failure without aborting the scheduler.
pub type TaskResult = Result<(), KernelError>;

/// Kernel error taxonomy surfaced by awaiters and the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// An event awaiter ran with no live scheduler behind its context.
    #[error("no active scheduler for this context")]
    NoActiveScheduler,
    /// A delay awaiter ran with no live scheduler; it resumes immediately.
    #[error("delay could not be scheduled: scheduler is gone")]
    DelayNotScheduled,
    /// The owning task handle was dropped; the awaiter wakes without a
    /// delivery so the body can release resources and return.
    #[error("task cancelled")]
    Cancelled,
    /// A publisher's payload type differs from this subscription's.
    /// Correctly-typed subscribers on the same emission still receive.
    #[error("event {event}: subscribed for {expected}, publisher sent {actual}")]
    TypeMismatch {
        event: EventId,
        expected: &'static str,
        actual: &'static str,
    },
    /// The task body panicked; caught at the poll boundary so a single
    /// agent failure cannot abort the simulation.
    #[error("task panicked")]
    Panicked,
}
