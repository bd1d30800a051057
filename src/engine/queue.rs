//! The manager's single propagation queue.
//!
//! Requests arriving from other threads (operation completions, external
//! re-evaluation requests) are posted here and applied by the manager's
//! owner in `process_pending`, never directly from the worker context.

use crossbeam_channel::Sender;

use crate::collab::OperationOutcome;
use crate::core::{Generation, TaskId};

#[derive(Debug)]
pub(crate) enum Request {
    Reevaluate(TaskId),
    Completion {
        task: TaskId,
        generation: Generation,
        outcome: OperationOutcome,
    },
}

/// Cloneable, `Send` handle for posting work to a manager.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    pub(crate) tx: Sender<Request>,
}

impl ManagerHandle {
    /// Ask for `task` to be re-evaluated on the next `process_pending`.
    ///
    /// Returns false if the manager has been dropped.
    pub fn request_reevaluate(&self, task: TaskId) -> bool {
        self.tx.send(Request::Reevaluate(task)).is_ok()
    }
}
