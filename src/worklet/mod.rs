//! Worklets: immutable, parameterized blueprints of graph fragments.
//!
//! A blueprint references its own tasks only by index. Instantiation (see
//! [`Manager::instantiate_worklet`](crate::engine::Manager::instantiate_worklet))
//! allocates fresh ids, binds parameters, and registers the fragment
//! all-or-nothing.

pub mod params;

use std::collections::{BTreeSet, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};

use crate::agents::AgentSpec;
use crate::core::{GroupPolicy, PortDirection, PortSpec, TaskStyle, TransformSpec};
use crate::error::{Error, Result};

pub use params::{Bindings, ParameterSpec, ParameterType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBlueprint {
    pub name: String,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub style: Option<TaskStyle>,
    /// Present when the task is a group.
    #[serde(default)]
    pub group: Option<GroupPolicy>,
    /// Index of the containing group within the blueprint.
    #[serde(default)]
    pub parent: Option<usize>,
    /// Weight inside the parent group.
    #[serde(default)]
    pub weight: Option<f64>,
}

impl TaskBlueprint {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ports: Vec::new(),
            agents: Vec::new(),
            style: None,
            group: None,
            parent: None,
            weight: None,
        }
    }

    pub fn group(name: &str, policy: GroupPolicy) -> Self {
        Self {
            group: Some(policy),
            ..Self::new(name)
        }
    }

    pub fn input(mut self, name: &str) -> Self {
        self.ports.push(PortSpec::input(name));
        self
    }

    pub fn output(mut self, name: &str) -> Self {
        self.ports.push(PortSpec::output(name));
        self
    }

    pub fn agent(mut self, agent: AgentSpec) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn parent(mut self, index: usize) -> Self {
        self.parent = Some(index);
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// A port on a blueprint task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub task: usize,
    pub port: String,
}

impl PortRef {
    pub fn new(task: usize, port: &str) -> Self {
        Self {
            task,
            port: port.to_string(),
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptorBlueprint {
    pub source: PortRef,
    pub target: PortRef,
    #[serde(default)]
    pub transform: TransformSpec,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl AdaptorBlueprint {
    pub fn new(source: PortRef, target: PortRef) -> Self {
        Self {
            source,
            target,
            transform: TransformSpec::identity(),
            enabled: true,
        }
    }

    pub fn with_transform(mut self, transform: TransformSpec) -> Self {
        self.transform = transform;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Blueprint {
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    pub tasks: Vec<TaskBlueprint>,
    #[serde(default)]
    pub adaptors: Vec<AdaptorBlueprint>,
}

impl Blueprint {
    /// Check that the blueprint is closed and internally consistent.
    ///
    /// Adaptor endpoints must name ports listed in the task blueprint
    /// itself, not ports an agent would add.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidBlueprint(msg));

        if self.tasks.is_empty() {
            return invalid("blueprint has no tasks".to_string());
        }

        let mut names = HashSet::new();
        for p in &self.parameters {
            if !params::is_valid_name(&p.name) {
                return invalid(format!("invalid parameter name '{}'", p.name));
            }
            if !names.insert(p.name.as_str()) {
                return invalid(format!("duplicate parameter '{}'", p.name));
            }
            if let Some(default) = &p.default {
                if !p.ty.accepts(default) {
                    return invalid(format!("default of parameter '{}' has the wrong type", p.name));
                }
            }
        }

        let mut containment = DiGraph::<usize, ()>::new();
        let nodes: Vec<_> = (0..self.tasks.len()).map(|i| containment.add_node(i)).collect();
        for (i, task) in self.tasks.iter().enumerate() {
            let mut ports = HashSet::new();
            for port in &task.ports {
                if !ports.insert(port.name.as_str()) {
                    return invalid(format!("task {} declares port '{}' twice", i, port.name));
                }
            }
            if let Some(parent) = task.parent {
                let Some(p) = self.tasks.get(parent) else {
                    return invalid(format!("task {} has parent {} outside the blueprint", i, parent));
                };
                if p.group.is_none() {
                    return invalid(format!("parent {} of task {} is not a group", parent, i));
                }
                containment.add_edge(nodes[parent], nodes[i], ());
            }
            if let Some(policy) = &task.group {
                if let Err(reason) = policy.check() {
                    return invalid(format!("task {}: {}", i, reason));
                }
            }
            if let Some(w) = task.weight {
                if !w.is_finite() || w < 0.0 {
                    return invalid(format!("task {} has invalid weight {}", i, w));
                }
            }
        }
        if is_cyclic_directed(&containment) {
            return invalid("group containment is cyclic".to_string());
        }

        let mut fed = HashSet::new();
        for (i, adaptor) in self.adaptors.iter().enumerate() {
            self.check_port(i, &adaptor.source, PortDirection::Output)?;
            self.check_port(i, &adaptor.target, PortDirection::Input)?;
            if !fed.insert(&adaptor.target) {
                return invalid(format!(
                    "adaptor {} feeds task {} port '{}', which is already fed",
                    i, adaptor.target.task, adaptor.target.port
                ));
            }
        }

        for slot in self.slots() {
            if !names.contains(slot.as_str()) {
                return invalid(format!("slot '${{{}}}' is not a declared parameter", slot));
            }
        }
        Ok(())
    }

    fn check_port(&self, adaptor: usize, port: &PortRef, direction: PortDirection) -> Result<()> {
        let task = self.tasks.get(port.task).ok_or_else(|| {
            Error::InvalidBlueprint(format!(
                "adaptor {} references task {} outside the blueprint",
                adaptor, port.task
            ))
        })?;
        match task.ports.iter().find(|p| p.name == port.port) {
            Some(p) if p.direction == direction => Ok(()),
            Some(_) => Err(Error::InvalidBlueprint(format!(
                "adaptor {}: port '{}' on task {} is not an {} port",
                adaptor, port.port, port.task, direction
            ))),
            None => Err(Error::InvalidBlueprint(format!(
                "adaptor {}: task {} has no port '{}'",
                adaptor, port.task, port.port
            ))),
        }
    }

    /// Every slot referenced by task names and agent/transform configs.
    pub fn slots(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for task in &self.tasks {
            out.extend(params::slots_in(&task.name).map(str::to_string));
            for agent in &task.agents {
                params::collect_slots(&agent.config, &mut out);
            }
        }
        for adaptor in &self.adaptors {
            params::collect_slots(&adaptor.transform.config, &mut out);
        }
        out
    }

    /// Indices of tasks with no parent inside the blueprint.
    pub fn top_level(&self) -> Vec<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.parent.is_none())
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worklet {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub blueprint: Blueprint,
}

impl Worklet {
    /// Build a worklet, validating its blueprint.
    pub fn new(name: &str, description: &str, blueprint: Blueprint) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(Error::InvalidBlueprint("worklet name is empty".to_string()));
        }
        blueprint.validate()?;
        Ok(Self {
            name: name.to_string(),
            description: description.to_string(),
            blueprint,
        })
    }
}
