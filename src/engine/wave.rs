//! Propagation waves.
//!
//! A wave is a FIFO of evaluate/fire steps that runs until nothing is
//! pending. Evaluations are coalesced through a pending set, so a task
//! queued several times is evaluated once per visit. Every task touched by
//! the wave is journaled before its first mutation; if any task changes
//! state more than `hop_bound` times the wave aborts with `Convergence`
//! and the journal restores the graph to where it was before the wave.
//! Submissions made during an aborted wave are forgotten, so their
//! completions are dropped when they arrive.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::manager::Manager;
use super::observer::StateChanged;
use crate::agents::{AgentContext, UpstreamLink};
use crate::config::FiringOrder;
use crate::core::group::aggregate;
use crate::core::state::{combine, resolve, Resolution};
use crate::core::{
    AdaptorId, Diagnostic, Generation, LocalVerdict, PortData, State, Task, TaskId, WaveId,
};
use crate::error::{Error, Result};
use crate::{wlog_debug, wlog_error, wlog_trace, wlog_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Evaluate(TaskId),
    Fire(AdaptorId),
}

/// Outcome of one settled wave.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveReport {
    pub wave: WaveId,
    /// Coalesced state changes, in first-change order.
    pub events: Vec<StateChanged>,
    pub evaluated: usize,
    pub fired: usize,
}

impl WaveReport {
    pub fn is_quiet(&self) -> bool {
        self.events.is_empty()
    }

    /// The change reported for `task`, if any.
    pub fn change_of(&self, task: TaskId) -> Option<&StateChanged> {
        self.events.iter().find(|e| e.task == task)
    }
}

/// Pre-wave values of everything a wave may overwrite on one task.
#[derive(Debug)]
struct Snapshot {
    state: State,
    relevant: bool,
    marked_completed: bool,
    ports: Vec<(String, Option<PortData>)>,
    diagnostics: Vec<Diagnostic>,
    agents: Vec<Option<Box<dyn Any + Send>>>,
}

impl Snapshot {
    fn of(task: &Task) -> Self {
        Self {
            state: task.state,
            relevant: task.relevant,
            marked_completed: task.marked_completed,
            ports: task
                .ports
                .iter()
                .map(|p| (p.name().to_string(), p.data().cloned()))
                .collect(),
            diagnostics: task.diagnostics.clone(),
            agents: task.agents.iter().map(|a| a.checkpoint()).collect(),
        }
    }

    fn restore(self, task: &mut Task) {
        task.state = self.state;
        task.relevant = self.relevant;
        task.marked_completed = self.marked_completed;
        task.diagnostics = self.diagnostics;
        for (name, data) in self.ports {
            if let Some(port) = task.port_mut(&name) {
                port.restore(data);
            }
        }
        for (agent, checkpoint) in task.agents.iter_mut().zip(self.agents) {
            if let Some(checkpoint) = checkpoint {
                agent.restore(checkpoint);
            }
        }
    }
}

pub(crate) struct Wave {
    pub(crate) id: WaveId,
    queue: VecDeque<Step>,
    pending: HashSet<TaskId>,
    changes: HashMap<TaskId, usize>,
    order: Vec<TaskId>,
    journal: HashMap<TaskId, Snapshot>,
    submitted: Vec<Generation>,
    evaluated: usize,
    fired: usize,
    rng: Option<StdRng>,
}

impl Wave {
    fn new(id: WaveId, order: FiringOrder) -> Self {
        let rng = match order {
            FiringOrder::Creation => None,
            FiringOrder::Shuffled { seed } => Some(StdRng::seed_from_u64(seed.wrapping_add(id.0))),
        };
        Self {
            id,
            queue: VecDeque::new(),
            pending: HashSet::new(),
            changes: HashMap::new(),
            order: Vec::new(),
            journal: HashMap::new(),
            submitted: Vec::new(),
            evaluated: 0,
            fired: 0,
            rng,
        }
    }

    /// Queue an evaluation unless one is already pending.
    pub(crate) fn evaluate(&mut self, task: TaskId) {
        if self.pending.insert(task) {
            self.queue.push_back(Step::Evaluate(task));
        }
    }

    pub(crate) fn fire(&mut self, adaptor: AdaptorId) {
        self.queue.push_back(Step::Fire(adaptor));
    }

    /// Queue sibling adaptors, given in creation order.
    pub(crate) fn fire_all(&mut self, mut adaptors: Vec<AdaptorId>) {
        if let Some(rng) = self.rng.as_mut() {
            adaptors.shuffle(rng);
        }
        for a in adaptors {
            self.fire(a);
        }
    }
}

impl Manager {
    /// Run one wave. `seed` applies the caller's input (journaling what it
    /// touches) and queues the first steps.
    pub(crate) fn run_wave<F>(&mut self, seed: F) -> Result<WaveReport>
    where
        F: FnOnce(&mut Manager, &mut Wave) -> Result<()>,
    {
        self.ensure_idle()?;
        self.next_wave += 1;
        let mut wave = Wave::new(WaveId(self.next_wave), self.config.firing_order);
        self.wave_active = true;
        wlog_debug!("Wave {} started", wave.id);

        let result = seed(self, &mut wave).and_then(|_| self.drive(&mut wave));
        self.wave_active = false;

        match result {
            Ok(()) => Ok(self.settle(wave)),
            Err(e) => {
                let touched = wave.journal.len();
                for (id, snapshot) in wave.journal {
                    if let Some(task) = self.tasks.get_mut(&id) {
                        snapshot.restore(task);
                    }
                }
                for generation in &wave.submitted {
                    self.in_flight.remove(generation);
                }
                wlog_error!("Wave {} rolled back ({} tasks restored): {}", wave.id, touched, e);
                Err(e)
            }
        }
    }

    /// Record the pre-wave values of `task` if this is its first touch.
    pub(crate) fn journal(&self, wave: &mut Wave, task: TaskId) {
        if wave.journal.contains_key(&task) {
            return;
        }
        if let Some(t) = self.tasks.get(&task) {
            wave.journal.insert(task, Snapshot::of(t));
        }
    }

    /// Journal then overwrite a port, returning whether the payload changed.
    pub(crate) fn write_port(
        &mut self,
        wave: &mut Wave,
        task: TaskId,
        port: &str,
        data: Option<PortData>,
    ) -> bool {
        self.journal(wave, task);
        self.tasks
            .get_mut(&task)
            .and_then(|t| t.port_mut(port))
            .map(|p| p.write(data))
            .unwrap_or(false)
    }

    fn drive(&mut self, wave: &mut Wave) -> Result<()> {
        while let Some(step) = wave.queue.pop_front() {
            match step {
                Step::Evaluate(id) => {
                    if wave.pending.remove(&id) {
                        self.evaluate_task(wave, id)?;
                    }
                }
                Step::Fire(id) => self.fire_step(wave, id)?,
            }
        }
        Ok(())
    }

    fn settle(&mut self, wave: Wave) -> WaveReport {
        let events: Vec<StateChanged> = wave
            .order
            .iter()
            .filter_map(|id| {
                let old = wave.journal.get(id)?.state;
                let new = self.tasks.get(id)?.state;
                (old != new).then_some(StateChanged {
                    task: *id,
                    old,
                    new,
                    wave: wave.id,
                })
            })
            .collect();

        wlog_debug!(
            "Wave {} settled: evaluated={} fired={} changes={}",
            wave.id,
            wave.evaluated,
            wave.fired,
            events.len()
        );
        self.observers.state_changed(&events);

        WaveReport {
            wave: wave.id,
            events,
            evaluated: wave.evaluated,
            fired: wave.fired,
        }
    }

    pub(crate) fn upstream_links(&self, task: TaskId) -> Vec<UpstreamLink> {
        let Some(arcs) = self.arcs.get(&task) else {
            return Vec::new();
        };
        arcs.incoming
            .iter()
            .filter_map(|id| {
                let adaptor = self.adaptors.get(id)?;
                let source = self.tasks.get(&adaptor.source.task)?;
                Some(UpstreamLink {
                    adaptor: *id,
                    port: adaptor.target.port.clone(),
                    task: adaptor.source.task,
                    state: source.state,
                    enabled: adaptor.enabled,
                })
            })
            .collect()
    }

    fn group_aggregate(&self, task: TaskId) -> Option<LocalVerdict> {
        let group = self.tasks.get(&task)?.group.as_ref()?;
        let children: Vec<(State, f64)> = group
            .children
            .iter()
            .filter_map(|c| self.tasks.get(c).map(|t| (t.state, group.weight(c))))
            .collect();
        Some(aggregate(group.policy, &children))
    }

    fn evaluate_task(&mut self, wave: &mut Wave, id: TaskId) -> Result<()> {
        let children = match self.tasks.get(&id) {
            Some(t) => t.children().to_vec(),
            None => return Ok(()),
        };
        // Children pending in this wave settle before their group reads them.
        for child in children {
            if wave.pending.remove(&child) {
                self.evaluate_task(wave, child)?;
            }
        }

        self.journal(wave, id);
        let links = self.upstream_links(id);
        let group_verdict = self.group_aggregate(id);

        let Some(task) = self.tasks.get_mut(&id) else {
            return Ok(());
        };

        let mut verdicts = Vec::with_capacity(task.agents.len());
        let mut diagnostics: Vec<Diagnostic> = task
            .diagnostics
            .iter()
            .filter(|d| d.agent.is_none())
            .cloned()
            .collect();
        let mut submissions = Vec::new();
        let mut outputs_changed: Vec<String> = Vec::new();

        for (index, agent) in task.agents.iter_mut().enumerate() {
            let mut ctx = AgentContext {
                task: id,
                task_name: &task.name,
                agent_index: index,
                ports: &mut task.ports,
                upstream: &links,
                services: &self.services,
                queue: &self.tx,
                next_generation: &mut self.next_generation,
                submissions: Vec::new(),
                outputs_changed: Vec::new(),
            };
            let result = agent.evaluate(&mut ctx);
            let AgentContext {
                submissions: submitted,
                outputs_changed: written,
                ..
            } = ctx;
            submissions.extend(submitted);
            for port in written {
                if !outputs_changed.contains(&port) {
                    outputs_changed.push(port);
                }
            }

            match result {
                Ok(verdict) => verdicts.push(verdict),
                Err(e) => {
                    wlog_warn!(
                        "Agent {} ({}) on task '{}' failed: {}",
                        index,
                        agent.kind(),
                        task.name,
                        e
                    );
                    diagnostics.push(Diagnostic {
                        agent: Some(index),
                        source: agent.kind().to_string(),
                        message: e.to_string(),
                    });
                    verdicts.push(LocalVerdict::Incomplete);
                }
            }
            if let Some(reason) = agent.failure() {
                diagnostics.push(Diagnostic {
                    agent: Some(index),
                    source: agent.kind().to_string(),
                    message: reason.to_string(),
                });
            }
        }

        let verdict = match (combine(task.style.combine, verdicts), group_verdict) {
            (Some(a), Some(g)) => Some(a.min(g)),
            (a, None) => a,
            (None, g) => g,
        };
        let (state, mark) = resolve(Resolution {
            relevant: task.relevant,
            verdict,
            marked_completed: task.marked_completed,
            auto_complete: task.style.auto_complete,
        });
        task.marked_completed = mark;
        task.diagnostics = diagnostics;

        let old = task.state;
        task.state = state;
        let parent = task.parent;
        let name = task.name.clone();

        for (generation, agent) in submissions {
            self.in_flight.insert(generation, (id, agent));
            wave.submitted.push(generation);
        }
        wave.evaluated += 1;

        let outgoing = self.outgoing(id);
        if state != old {
            let hops = wave.changes.entry(id).or_insert(0);
            *hops += 1;
            let hops = *hops;
            if hops == 1 {
                wave.order.push(id);
            }
            if hops > self.config.hop_bound {
                wlog_error!(
                    "Task '{}' ({}) exceeded hop bound {} in wave {}",
                    name,
                    id.short(),
                    self.config.hop_bound,
                    wave.id
                );
                return Err(Error::Convergence {
                    task: id,
                    hops,
                    wave: wave.id,
                });
            }
            wlog_trace!("Task '{}' {} -> {} (wave {})", name, old, state, wave.id);

            wave.fire_all(outgoing);
            if let Some(parent) = parent {
                wave.evaluate(parent);
            }
        } else if !outputs_changed.is_empty() {
            let changed: Vec<AdaptorId> = outgoing
                .into_iter()
                .filter(|a| {
                    self.adaptors
                        .get(a)
                        .is_some_and(|ad| outputs_changed.contains(&ad.source.port))
                })
                .collect();
            wave.fire_all(changed);
        }
        Ok(())
    }

    fn fire_step(&mut self, wave: &mut Wave, id: AdaptorId) -> Result<()> {
        let Some(adaptor) = self.adaptors.get(&id) else {
            return Ok(());
        };
        if !adaptor.enabled {
            return Ok(());
        }
        let Some(source) = self.tasks.get(&adaptor.source.task) else {
            return Ok(());
        };
        let input = source.port(&adaptor.source.port).and_then(|p| p.data());
        let result = adaptor.transform.apply(input, source.state);
        let target = adaptor.target.clone();
        let kind = adaptor.transform.kind().to_string();

        self.journal(wave, target.task);
        let Some(task) = self.tasks.get_mut(&target.task) else {
            return Ok(());
        };
        let fault_source = id.to_string();
        task.diagnostics
            .retain(|d| d.agent.is_some() || d.source != fault_source);

        let data = match result {
            Ok(data) => data,
            Err(reason) => {
                wlog_warn!("Transform {} on adaptor {} failed: {}", kind, id.short(), reason);
                task.diagnostics.push(Diagnostic {
                    agent: None,
                    source: fault_source,
                    message: format!("{} transform failed: {}", kind, reason),
                });
                None
            }
        };
        if let Some(port) = task.port_mut(&target.port) {
            port.write(data);
        }

        wave.fired += 1;
        wave.evaluate(target.task);
        Ok(())
    }
}
