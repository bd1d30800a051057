//! Task data model: the graph node.
//!
//! A task owns its ports and agents. Its state is written only by the
//! manager's re-evaluation protocol; callers influence it through port
//! data, completion marks, relevance, and graph structure.

use serde::{Deserialize, Serialize};

use super::group::{GroupData, GroupPolicy};
use super::ids::TaskId;
use super::port::{Port, PortDirection, PortSpec};
use super::state::{CombinePolicy, State};
use crate::agents::{Agent, AgentSpec};

/// Behavioral flags of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskStyle {
    /// Move straight from Completable to Completed without an explicit mark.
    #[serde(default)]
    pub auto_complete: bool,
    #[serde(default)]
    pub combine: CombinePolicy,
}

/// A problem surfaced during the last evaluation of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Index of the agent that produced it, if any.
    pub agent: Option<usize>,
    /// Agent kind, or the id of the adaptor whose transform failed.
    pub source: String,
    pub message: String,
}

/// Request to create a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    /// `None` takes the manager's configured defaults.
    #[serde(default)]
    pub style: Option<TaskStyle>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.ports.push(PortSpec::input(name));
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.ports.push(PortSpec::output(name));
        self
    }

    pub fn agent(mut self, agent: AgentSpec) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn style(mut self, style: TaskStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn auto_complete(mut self) -> Self {
        let mut style = self.style.unwrap_or_default();
        style.auto_complete = true;
        self.style = Some(style);
        self
    }
}

/// Request to create a group.
#[derive(Debug, Clone, Default)]
pub struct GroupSpec {
    pub task: TaskSpec,
    pub policy: GroupPolicy,
    /// Existing tasks to adopt, in order.
    pub children: Vec<TaskId>,
}

impl GroupSpec {
    pub fn new(name: impl Into<String>, policy: GroupPolicy) -> Self {
        Self {
            task: TaskSpec::new(name),
            policy,
            children: Vec::new(),
        }
    }

    pub fn child(mut self, id: TaskId) -> Self {
        self.children.push(id);
        self
    }
}

#[derive(Debug)]
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) seq: u64,
    pub(crate) name: String,
    pub(crate) state: State,
    pub(crate) ports: Vec<Port>,
    pub(crate) agents: Vec<Box<dyn Agent>>,
    pub(crate) parent: Option<TaskId>,
    pub(crate) style: TaskStyle,
    pub(crate) relevant: bool,
    pub(crate) marked_completed: bool,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) group: Option<GroupData>,
}

impl Task {
    pub(crate) fn new(id: TaskId, seq: u64, name: String, style: TaskStyle) -> Self {
        Self {
            id,
            seq,
            name,
            state: State::Unavailable,
            ports: Vec::new(),
            agents: Vec::new(),
            parent: None,
            style,
            relevant: true,
            marked_completed: false,
            diagnostics: Vec::new(),
            group: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn style(&self) -> TaskStyle {
        self.style
    }

    pub fn is_relevant(&self) -> bool {
        self.relevant
    }

    pub fn is_marked_completed(&self) -> bool {
        self.marked_completed
    }

    pub fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    /// Ports in declaration order.
    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name() == name)
    }

    pub(crate) fn port_mut(&mut self, name: &str) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.name() == name)
    }

    pub fn output_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports
            .iter()
            .filter(|p| p.direction() == PortDirection::Output)
    }

    pub fn agents(&self) -> &[Box<dyn Agent>] {
        &self.agents
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Failure reasons reported by agents (e.g. a failed operation).
    pub fn failure_reasons(&self) -> Vec<String> {
        self.agents
            .iter()
            .filter_map(|a| a.failure().map(str::to_string))
            .collect()
    }

    pub fn is_group(&self) -> bool {
        self.group.is_some()
    }

    pub fn group(&self) -> Option<&GroupData> {
        self.group.as_ref()
    }

    /// Children of a group; empty for plain tasks.
    pub fn children(&self) -> &[TaskId] {
        self.group.as_ref().map(|g| g.children()).unwrap_or(&[])
    }

    pub(crate) fn add_port(&mut self, spec: &PortSpec) -> bool {
        if self.port(&spec.name).is_some() {
            return false;
        }
        self.ports.push(Port::new(spec.name.clone(), spec.direction));
        true
    }
}
