//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building common task shapes
//! - Recording observer events
//! - A fan-out/fan-in graph for firing-order checks

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::json;

use workgraph::agents::AgentSpec;
use workgraph::config::{EngineConfig, FiringOrder};
use workgraph::core::{AdaptorId, AdaptorSpec, Endpoint, PortData, State, TaskId, TaskSpec, TransformSpec};
use workgraph::engine::{GraphMutated, Manager, MutationKind, StateChanged};

pub fn objects(items: &[&str]) -> PortData {
    PortData::new("objects", json!(items))
}

/// Completable task with one output port.
pub fn source(m: &mut Manager, name: &str) -> TaskId {
    m.create_task(
        TaskSpec::new(name)
            .output("out")
            .agent(AgentSpec::always_completable()),
    )
    .expect("create source task")
}

/// Task that waits for data on its `in` port.
pub fn sink(m: &mut Manager, name: &str) -> TaskId {
    m.create_task(TaskSpec::new(name).agent(AgentSpec::port_data("in")))
        .expect("create sink task")
}

/// Task that forwards nothing itself but reads `in` and offers `out`.
pub fn relay(m: &mut Manager, name: &str) -> TaskId {
    m.create_task(
        TaskSpec::new(name)
            .output("out")
            .agent(AgentSpec::port_data("in")),
    )
    .expect("create relay task")
}

pub fn connect(m: &mut Manager, from: TaskId, to: TaskId) -> AdaptorId {
    m.create_adaptor(AdaptorSpec::new(Endpoint::new(from, "out"), Endpoint::new(to, "in")))
        .expect("create adaptor")
}

pub fn connect_ports(
    m: &mut Manager,
    from: TaskId,
    out: &str,
    to: TaskId,
    input: &str,
    transform: TransformSpec,
) -> AdaptorId {
    m.create_adaptor(
        AdaptorSpec::new(Endpoint::new(from, out), Endpoint::new(to, input)).with_transform(transform),
    )
    .expect("create adaptor")
}

/// Collects every state-changed event delivered to a subscriber.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<StateChanged>>>,
}

impl EventLog {
    pub fn attach(m: &mut Manager) -> Self {
        let log = Self::default();
        let sink = log.events.clone();
        m.subscribe_state_changed(move |e| sink.lock().unwrap().push(*e));
        log
    }

    pub fn events(&self) -> Vec<StateChanged> {
        self.events.lock().unwrap().clone()
    }

    pub fn for_task(&self, task: TaskId) -> Vec<StateChanged> {
        self.events().into_iter().filter(|e| e.task == task).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

/// Collects graph mutation kinds.
#[derive(Clone, Default)]
pub struct MutationLog {
    events: Arc<Mutex<Vec<GraphMutated>>>,
}

impl MutationLog {
    pub fn attach(m: &mut Manager) -> Self {
        let log = Self::default();
        let sink = log.events.clone();
        m.subscribe_graph_mutated(move |e| sink.lock().unwrap().push(e.clone()));
        log
    }

    pub fn kinds(&self) -> Vec<MutationKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    pub fn last(&self) -> Option<GraphMutated> {
        self.events.lock().unwrap().last().cloned()
    }
}

/// One source fanning out to three relays, which all feed a group-like
/// collector chain:
///
/// ```text
///            +-> r1 -> j1
///   root ----+-> r2 -> j2
///            +-> r3 -> j3
/// ```
///
/// plus a state-signal edge from every relay into a shared gate task.
pub struct FanGraph {
    pub manager: Manager,
    pub root: TaskId,
    pub relays: Vec<TaskId>,
    pub joins: Vec<TaskId>,
    pub gate: TaskId,
}

impl FanGraph {
    pub fn build(order: FiringOrder) -> Self {
        let mut m = Manager::new(EngineConfig {
            firing_order: order,
            auto_complete: true,
            ..EngineConfig::default()
        });
        let root = source(&mut m, "root");
        let gate = m
            .create_task(
                TaskSpec::new("gate")
                    .agent(AgentSpec::port_data("s1"))
                    .agent(AgentSpec::port_data("s2"))
                    .agent(AgentSpec::port_data("s3")),
            )
            .expect("create gate");
        let mut relays = Vec::new();
        let mut joins = Vec::new();
        for i in 1..=3 {
            let r = relay(&mut m, &format!("r{}", i));
            connect(&mut m, root, r);
            let j = relay(&mut m, &format!("j{}", i));
            connect(&mut m, r, j);
            connect_ports(
                &mut m,
                r,
                "out",
                gate,
                &format!("s{}", i),
                TransformSpec::new("when_completed", json!(null)),
            );
            relays.push(r);
            joins.push(j);
        }
        Self {
            manager: m,
            root,
            relays,
            joins,
            gate,
        }
    }

    /// Final state of every task, in creation order.
    pub fn states(&self) -> Vec<(String, State)> {
        self.manager
            .tasks()
            .iter()
            .map(|t| (t.name().to_string(), t.state()))
            .collect()
    }

    /// Push data through the whole graph.
    pub fn run(&mut self) {
        self.manager
            .set_port_data(self.root, "out", objects(&["part-1", "part-2"]))
            .expect("seed root");
        for relay in self.relays.clone() {
            self.manager
                .set_port_data(relay, "out", objects(&["faces"]))
                .expect("write relay output");
        }
    }
}
