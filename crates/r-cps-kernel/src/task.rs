//! ---
//! cps_section: "02-simulation-kernel"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Cooperative discrete-event scheduler, typed event bus and virtual clock."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
use std::cell::RefCell;
use std::fmt;
use std::rc::Weak;

use crate::scheduler::Core;

/// Opaque identifier of a spawned task, unique per scheduler lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Owning handle to a spawned task.
///
/// Dropping an incomplete, non-detached handle requests cooperative
/// cancellation: at the task's next suspension point its awaiter
/// resolves to [`crate::KernelError::Cancelled`] instead of running user
/// code, and the body unwinds through `?`. [`TaskHandle::detach`]
/// transfers ownership to the scheduler instead.
pub struct TaskHandle {
    pub(crate) id: TaskId,
    pub(crate) core: Weak<RefCell<Core>>,
    pub(crate) detached: bool,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Hand the task over to the scheduler; dropping the handle no
    /// longer cancels it.
    pub fn detach(mut self) {
        self.detached = true;
    }

    /// True iff the task has completed (normally, with a failure, or via
    /// cancellation). A handle whose scheduler is gone reports done.
    pub fn is_done(&self) -> bool {
        match self.core.upgrade() {
            Some(core) => core.borrow().is_completed(self.id),
            None => true,
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("detached", &self.detached)
            .finish()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(core) = self.core.upgrade() {
            core.borrow_mut().cancel(self.id);
        }
    }
}
