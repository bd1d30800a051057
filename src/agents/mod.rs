//! Agents: pluggable strategies that judge a task's local readiness.
//!
//! A task consults its agents in insertion order on every re-evaluation
//! and combines their verdicts (weakest wins by default). Agents see the
//! task through an [`AgentContext`] and never touch other tasks directly.

pub mod builtin;
pub mod domain;
pub mod registry;
pub mod submit;

use std::any::Any;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::collab::{CompletionSink, OperationOutcome, OperationRequest, Services};
use crate::core::{
    AdaptorId, Generation, LocalVerdict, Port, PortData, PortDirection, PortSpec, State, TaskId,
};
use crate::engine::queue::Request;

pub use builtin::{AlwaysAgent, PortDataAgent, UpstreamAgent};
pub use domain::{AttributeAgent, ResourceAgent};
pub use registry::{AgentConstructor, Factory, TransformConstructor};
pub use submit::{SubmitAgent, SubmitStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("no {0} collaborator configured")]
    MissingCollaborator(&'static str),

    #[error("port '{0}' not available")]
    MissingPort(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("submission failed: {0}")]
    Submission(String),

    #[error("{0}")]
    Failed(String),
}

/// Serializable description of an agent: its registered kind plus config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl AgentSpec {
    pub fn new(kind: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            config,
        }
    }

    pub fn always(verdict: LocalVerdict) -> Self {
        Self::new(AlwaysAgent::KIND, json!({ "verdict": verdict }))
    }

    pub fn always_completable() -> Self {
        Self::always(LocalVerdict::Completable)
    }

    pub fn port_data(port: &str) -> Self {
        Self::new(PortDataAgent::KIND, json!({ "port": port }))
    }

    pub fn upstream() -> Self {
        Self::new(UpstreamAgent::KIND, serde_json::Value::Null)
    }

    pub fn attributes(role: &str) -> Self {
        Self::new(AttributeAgent::KIND, json!({ "role": role }))
    }

    pub fn resources(kind: &str, min: usize) -> Self {
        Self::new(ResourceAgent::KIND, json!({ "kind": kind, "min": min }))
    }

    pub fn submit(operation: &str, parameters: serde_json::Value) -> Self {
        Self::new(
            SubmitAgent::KIND,
            json!({ "operation": operation, "parameters": parameters }),
        )
    }
}

/// An incoming adaptor as seen from the target task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamLink {
    pub adaptor: AdaptorId,
    /// Input port on this task.
    pub port: String,
    pub task: TaskId,
    pub state: State,
    pub enabled: bool,
}

pub trait Agent: Send + std::fmt::Debug {
    /// Registered kind name used to rebuild the agent from its config.
    fn kind(&self) -> &str;

    /// Configuration snapshot, including any outcome that must survive
    /// export and import.
    fn config(&self) -> serde_json::Value;

    /// Ports the agent needs on its task. Missing ones are declared when
    /// the agent is attached.
    fn ports(&self) -> Vec<PortSpec> {
        Vec::new()
    }

    fn evaluate(&mut self, ctx: &mut AgentContext<'_>) -> Result<LocalVerdict, AgentError>;

    /// Accept the outcome of an operation this agent submitted. Returns
    /// false if `generation` is not the one the agent is waiting on.
    fn on_completion(&mut self, _generation: Generation, _outcome: &OperationOutcome) -> bool {
        false
    }

    /// Evaluation state to put back if the wave that changed it fails.
    /// Agents whose evaluation changes nothing return `None`.
    fn checkpoint(&self) -> Option<Box<dyn Any + Send>> {
        None
    }

    fn restore(&mut self, _checkpoint: Box<dyn Any + Send>) {}

    /// Forget any progress; called by an explicit task reset.
    fn reset(&mut self) {}

    /// The owning task is being destroyed.
    fn detach(&mut self) {}

    /// Reason reported by a failed external operation.
    fn failure(&self) -> Option<&str> {
        None
    }

    fn spec(&self) -> AgentSpec {
        AgentSpec::new(self.kind(), self.config())
    }
}

/// The view of its task an agent gets during evaluation.
pub struct AgentContext<'a> {
    pub(crate) task: TaskId,
    pub(crate) task_name: &'a str,
    pub(crate) agent_index: usize,
    pub(crate) ports: &'a mut [Port],
    pub(crate) upstream: &'a [UpstreamLink],
    pub(crate) services: &'a Services,
    pub(crate) queue: &'a Sender<Request>,
    pub(crate) next_generation: &'a mut u64,
    pub(crate) submissions: Vec<(Generation, usize)>,
    pub(crate) outputs_changed: Vec<String>,
}

impl<'a> AgentContext<'a> {
    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn task_name(&self) -> &str {
        self.task_name
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name() == name)
    }

    /// Data currently held by the named port.
    pub fn data(&self, name: &str) -> Option<&PortData> {
        self.port(name).and_then(|p| p.data())
    }

    pub fn upstream(&self) -> &[UpstreamLink] {
        self.upstream
    }

    pub fn services(&self) -> &Services {
        self.services
    }

    /// Write into one of the task's output ports. Returns whether the
    /// payload changed; a change fires the port's adaptors.
    pub fn write_output(&mut self, name: &str, data: Option<PortData>) -> Result<bool, AgentError> {
        let port = self
            .ports
            .iter_mut()
            .find(|p| p.name() == name && p.direction() == PortDirection::Output)
            .ok_or_else(|| AgentError::MissingPort(name.to_string()))?;
        let changed = port.write(data);
        if changed && !self.outputs_changed.iter().any(|p| p == name) {
            self.outputs_changed.push(name.to_string());
        }
        Ok(changed)
    }

    /// Hand `request` to the operation executor without blocking.
    pub fn submit(&mut self, request: OperationRequest) -> Result<Generation, AgentError> {
        let executor = self
            .services
            .operations
            .clone()
            .ok_or(AgentError::MissingCollaborator("operation executor"))?;
        *self.next_generation += 1;
        let generation = Generation(*self.next_generation);
        let sink = CompletionSink::new(self.queue.clone(), self.task, generation);
        executor
            .submit(request, sink)
            .map_err(AgentError::Submission)?;
        self.submissions.push((generation, self.agent_index));
        Ok(generation)
    }
}
