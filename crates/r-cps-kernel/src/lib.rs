//! ---
//! cps_section: "02-simulation-kernel"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Cooperative discrete-event scheduler, typed event bus and virtual clock."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! Cooperative discrete-event simulation kernel.
//!
//! The kernel drives long-lived agent tasks against a virtual
//! millisecond clock. Tasks are plain `async` blocks spawned through
//! [`Scheduler::spawn`]; they suspend exclusively at the two awaiters —
//! [`SimContext::delay`] and [`SimContext::wait_for_event`] — and
//! communicate through a typed one-shot event bus embedded in the
//! scheduler. A real-time variant paces the virtual clock against the
//! host wall clock.
//!
//! The engine is strictly single-threaded: at most one task runs at any
//! instant, events never preempt the emitter, and ties are broken FIFO
//! everywhere (ready queue order, timer insertion order, subscription
//! order).

pub mod awaiter;
pub mod error;
pub mod event;
pub mod scheduler;
pub mod task;
pub mod time;

pub use awaiter::{Delay, EventWait};
pub use error::{KernelError, TaskResult};
pub use event::EventId;
pub use scheduler::{Scheduler, SimContext, StepOutcome};
pub use task::{TaskHandle, TaskId};
pub use time::{SimDuration, SimTime};
