//! Interfaces of the engine's external collaborators.
//!
//! Agents consult attribute and resource collaborators as read-only
//! queries and hand long-running work to an operation executor. The
//! executor reports back through a [`CompletionSink`], which posts onto the
//! manager's propagation queue from whatever thread the work finished on.

pub mod memory;
pub mod tokio_executor;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::{Generation, PortData, TaskId};
use crate::engine::queue::Request;

pub use memory::{ManualExecutor, PendingSubmission, StaticAttributes, StaticResources};
pub use tokio_executor::{OperationFn, TokioExecutor};

/// How complete an attribute set is for a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    /// Nothing to check yet (no subject objects for the role).
    Missing,
    Partial,
    Complete,
}

pub trait AttributeQuery: Send + Sync {
    /// Is the attribute set for `role` complete, optionally restricted to
    /// the objects carried by `subject`?
    fn completeness(
        &self,
        role: &str,
        subject: Option<&PortData>,
    ) -> std::result::Result<Completeness, String>;
}

pub trait ResourceQuery: Send + Sync {
    /// Number of attached resources of `kind`.
    fn resource_count(&self, kind: &str) -> std::result::Result<usize, String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub operation: String,
    pub parameters: serde_json::Value,
    /// Input payload, when the submitting agent reads one.
    pub input: Option<PortData>,
}

/// Executor-side handle of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle(pub String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "payload")]
pub enum OperationOutcome {
    Succeeded(serde_json::Value),
    Failed(String),
}

pub trait OperationExecutor: Send + Sync {
    /// Start `request` without blocking; deliver its outcome through `sink`.
    fn submit(
        &self,
        request: OperationRequest,
        sink: CompletionSink,
    ) -> std::result::Result<OperationHandle, String>;
}

/// One-shot callback that routes an operation outcome back to its task.
#[derive(Debug)]
pub struct CompletionSink {
    tx: Sender<Request>,
    task: TaskId,
    generation: Generation,
}

impl CompletionSink {
    pub(crate) fn new(tx: Sender<Request>, task: TaskId, generation: Generation) -> Self {
        Self {
            tx,
            task,
            generation,
        }
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Post the outcome. Safe to call from any thread; returns false if
    /// the manager is gone.
    pub fn deliver(self, outcome: OperationOutcome) -> bool {
        self.tx
            .send(Request::Completion {
                task: self.task,
                generation: self.generation,
                outcome,
            })
            .is_ok()
    }
}

/// Collaborators available to agents.
#[derive(Clone, Default)]
pub struct Services {
    pub attributes: Option<Arc<dyn AttributeQuery>>,
    pub resources: Option<Arc<dyn ResourceQuery>>,
    pub operations: Option<Arc<dyn OperationExecutor>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attributes(mut self, q: Arc<dyn AttributeQuery>) -> Self {
        self.attributes = Some(q);
        self
    }

    pub fn with_resources(mut self, q: Arc<dyn ResourceQuery>) -> Self {
        self.resources = Some(q);
        self
    }

    pub fn with_operations(mut self, e: Arc<dyn OperationExecutor>) -> Self {
        self.operations = Some(e);
        self
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("attributes", &self.attributes.is_some())
            .field("resources", &self.resources.is_some())
            .field("operations", &self.operations.is_some())
            .finish()
    }
}
