//! ---
//! cps_section: "02-simulation-kernel"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Cooperative discrete-event scheduler, typed event bus and virtual clock."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! Typed one-shot event channels.
//!
//! An [`EventId`] names a logical channel; the driver assigns ids
//! globally and keeps publishers and subscribers agreed on the payload
//! type per id. The kernel verifies that agreement at delivery time with
//! a runtime type tag and fails only the mismatched subscriber.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::task::TaskId;

/// Integer identifier of an event channel, assigned by the driver.
pub type EventId = u64;

/// Delivery slot shared between a pending [`crate::EventWait`] and the
/// subscriber table. One-shot: the slot is written exactly once per
/// subscription, then the subscription is gone.
pub(crate) enum EventSlot {
    Waiting,
    Delivered(Box<dyn Any>),
    Mismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

/// A task suspended on an event channel.
pub(crate) struct Subscription {
    pub task: TaskId,
    pub type_id: std::any::TypeId,
    pub type_name: &'static str,
    pub slot: Rc<RefCell<EventSlot>>,
}
