//! The Manager: sole owner of every task, adaptor, and worklet in a
//! session.
//!
//! All cross references are ids resolved through the manager. Every
//! caller input (port writes, completion marks, relevance, structure
//! changes) is applied on the owner's thread and followed by one
//! propagation wave; other threads reach the manager only through its
//! request queue.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use super::observer::{GraphMutated, MutationKind, Observers, StateChanged, SubscriptionId};
use super::queue::{ManagerHandle, Request};
use super::wave::WaveReport;
use crate::agents::{Agent, AgentSpec, Factory};
use crate::collab::Services;
use crate::config::{ChildDisposition, EngineConfig};
use crate::core::{
    Adaptor, AdaptorId, AdaptorSpec, Endpoint, Generation, GroupData, GroupSpec, PortData,
    PortDirection, State, Task, TaskId, TaskSpec, TaskStyle, Transform,
};
use crate::error::{Error, Result};
use crate::worklet::Worklet;
use crate::{wlog_debug, wlog_warn};

/// Adaptors incident to one task, in creation order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Arcs {
    pub(crate) incoming: Vec<AdaptorId>,
    pub(crate) outgoing: Vec<AdaptorId>,
}

pub struct Manager {
    pub(crate) config: EngineConfig,
    pub(crate) tasks: HashMap<TaskId, Task>,
    pub(crate) adaptors: HashMap<AdaptorId, Adaptor>,
    /// Ids of destroyed adaptors, so later use is reported as detached.
    pub(crate) retired: BTreeSet<AdaptorId>,
    pub(crate) worklets: BTreeMap<String, Worklet>,
    pub(crate) arcs: HashMap<TaskId, Arcs>,
    pub(crate) next_task_seq: u64,
    pub(crate) next_adaptor_seq: u64,
    pub(crate) factory: Factory,
    pub(crate) services: Services,
    pub(crate) observers: Observers,
    pub(crate) tx: Sender<Request>,
    rx: Receiver<Request>,
    pub(crate) next_generation: u64,
    /// Submissions whose completion is still wanted: generation -> (task, agent index).
    pub(crate) in_flight: HashMap<Generation, (TaskId, usize)>,
    pub(crate) next_wave: u64,
    pub(crate) wave_active: bool,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("tasks", &self.tasks.len())
            .field("adaptors", &self.adaptors.len())
            .field("worklets", &self.worklets.len())
            .field("in_flight", &self.in_flight.len())
            .field("waves", &self.next_wave)
            .finish()
    }
}

impl Manager {
    pub fn new(config: EngineConfig) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            config,
            tasks: HashMap::new(),
            adaptors: HashMap::new(),
            retired: BTreeSet::new(),
            worklets: BTreeMap::new(),
            arcs: HashMap::new(),
            next_task_seq: 0,
            next_adaptor_seq: 0,
            factory: Factory::with_builtins(),
            services: Services::default(),
            observers: Observers::default(),
            tx,
            rx,
            next_generation: 0,
            in_flight: HashMap::new(),
            next_wave: 0,
            wave_active: false,
        }
    }

    pub fn with_services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    pub fn set_services(&mut self, services: Services) {
        self.services = services;
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    pub fn register_agent_kind<F>(&mut self, kind: &str, ctor: F)
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn Agent>> + Send + Sync + 'static,
    {
        self.factory.register_agent(kind, ctor);
    }

    pub fn register_transform_kind<F>(&mut self, kind: &str, ctor: F)
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn Transform>> + Send + Sync + 'static,
    {
        self.factory.register_transform(kind, ctor);
    }

    pub(crate) fn ensure_idle(&self) -> Result<()> {
        if self.wave_active {
            return Err(Error::WaveInProgress);
        }
        Ok(())
    }

    pub(crate) fn notify(&mut self, event: GraphMutated) {
        wlog_debug!(
            "Graph mutated: {:?} tasks={} adaptors={}",
            event.kind,
            event.tasks.len(),
            event.adaptors.len()
        );
        self.observers.graph_mutated(&event);
    }

    // ---- construction helpers ----

    /// Build a detached task from `spec`. Nothing is registered.
    pub(crate) fn build_task(&self, id: TaskId, spec: &TaskSpec) -> Result<Task> {
        let style = spec.style.unwrap_or(TaskStyle {
            auto_complete: self.config.auto_complete,
            ..TaskStyle::default()
        });
        let mut task = Task::new(id, 0, spec.name.clone(), style);
        for port in &spec.ports {
            if !task.add_port(port) {
                return Err(Error::Validation(format!(
                    "duplicate port '{}' on task '{}'",
                    port.name, spec.name
                )));
            }
        }
        for agent_spec in &spec.agents {
            let agent = self.factory.build_agent(agent_spec)?;
            attach_agent(&mut task, agent)?;
        }
        Ok(task)
    }

    /// Register a built task, assigning its creation sequence.
    pub(crate) fn insert_task(&mut self, mut task: Task) -> TaskId {
        self.next_task_seq += 1;
        task.seq = self.next_task_seq;
        let id = task.id;
        self.arcs.entry(id).or_default();
        self.tasks.insert(id, task);
        id
    }

    /// Make `child` a child of `group`, detaching it from any previous
    /// parent. Returns the previous parent.
    pub(crate) fn link_child(&mut self, group: TaskId, child: TaskId) -> Option<TaskId> {
        let old = self.tasks.get(&child).and_then(|t| t.parent);
        if old == Some(group) {
            return None;
        }
        if let Some(old_parent) = old {
            if let Some(g) = self.tasks.get_mut(&old_parent).and_then(|t| t.group.as_mut()) {
                g.remove_child(&child);
            }
        }
        if let Some(g) = self.tasks.get_mut(&group).and_then(|t| t.group.as_mut()) {
            g.push_child(child);
        }
        if let Some(t) = self.tasks.get_mut(&child) {
            t.parent = Some(group);
        }
        old
    }

    fn unlink_child(&mut self, group: TaskId, child: TaskId) {
        if let Some(g) = self.tasks.get_mut(&group).and_then(|t| t.group.as_mut()) {
            g.remove_child(&child);
        }
        if let Some(t) = self.tasks.get_mut(&child) {
            if t.parent == Some(group) {
                t.parent = None;
            }
        }
    }

    /// True if `ancestor` is `task` or contains it, transitively.
    fn contains(&self, ancestor: TaskId, task: TaskId) -> bool {
        let mut current = Some(task);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.tasks.get(&id).and_then(|t| t.parent);
        }
        false
    }

    fn check_endpoint(&self, ep: &Endpoint, expected: PortDirection) -> Result<()> {
        let task = self.tasks.get(&ep.task).ok_or(Error::TaskNotFound(ep.task))?;
        let port = task.port(&ep.port).ok_or_else(|| Error::PortNotFound {
            task: ep.task,
            port: ep.port.clone(),
        })?;
        if port.direction() != expected {
            return Err(Error::PortDirection {
                task: ep.task,
                port: ep.port.clone(),
                expected: expected.to_string(),
            });
        }
        Ok(())
    }

    /// Validate an adaptor spec against the live graph and build its
    /// transform. Nothing is registered.
    pub(crate) fn prepare_adaptor(&self, spec: &AdaptorSpec) -> Result<Box<dyn Transform>> {
        self.check_endpoint(&spec.source, PortDirection::Output)?;
        self.check_endpoint(&spec.target, PortDirection::Input)?;
        let fed_by = self
            .tasks
            .get(&spec.target.task)
            .and_then(|t| t.port(&spec.target.port))
            .and_then(|p| p.adaptors().first().copied());
        if let Some(existing) = fed_by {
            return Err(Error::FanIn {
                task: spec.target.task,
                port: spec.target.port.clone(),
                existing,
            });
        }
        self.factory.build_transform(&spec.transform)
    }

    pub(crate) fn attach_adaptor(
        &mut self,
        id: AdaptorId,
        spec: AdaptorSpec,
        transform: Box<dyn Transform>,
    ) {
        self.next_adaptor_seq += 1;
        if let Some(p) = self
            .tasks
            .get_mut(&spec.source.task)
            .and_then(|t| t.port_mut(&spec.source.port))
        {
            p.attach(id);
        }
        if let Some(p) = self
            .tasks
            .get_mut(&spec.target.task)
            .and_then(|t| t.port_mut(&spec.target.port))
        {
            p.attach(id);
        }
        self.arcs.entry(spec.source.task).or_default().outgoing.push(id);
        self.arcs.entry(spec.target.task).or_default().incoming.push(id);
        self.adaptors.insert(
            id,
            Adaptor {
                id,
                seq: self.next_adaptor_seq,
                source: spec.source,
                target: spec.target,
                transform,
                enabled: spec.enabled,
            },
        );
    }

    /// Unhook an adaptor from its ports and the arc index.
    pub(crate) fn detach_adaptor(&mut self, id: AdaptorId) -> Option<Adaptor> {
        let adaptor = self.adaptors.remove(&id)?;
        for ep in [&adaptor.source, &adaptor.target] {
            if let Some(p) = self.tasks.get_mut(&ep.task).and_then(|t| t.port_mut(&ep.port)) {
                p.detach(id);
            }
        }
        if let Some(arcs) = self.arcs.get_mut(&adaptor.source.task) {
            arcs.outgoing.retain(|a| *a != id);
        }
        if let Some(arcs) = self.arcs.get_mut(&adaptor.target.task) {
            arcs.incoming.retain(|a| *a != id);
        }
        Some(adaptor)
    }

    fn live_adaptor(&self, id: AdaptorId) -> Result<&Adaptor> {
        match self.adaptors.get(&id) {
            Some(a) => Ok(a),
            None if self.retired.contains(&id) => Err(Error::AdaptorDetached(id)),
            None => Err(Error::AdaptorNotFound(id)),
        }
    }

    fn live_task(&self, id: TaskId) -> Result<&Task> {
        self.tasks.get(&id).ok_or(Error::TaskNotFound(id))
    }

    // ---- structure ----

    pub fn create_task(&mut self, spec: TaskSpec) -> Result<TaskId> {
        self.ensure_idle()?;
        let task = self.build_task(TaskId::new(), &spec)?;
        let mut undo = self.stage();
        let id = self.insert_task(task);
        undo.created_task(id);
        wlog_debug!("Manager::create_task name={} id={}", spec.name, id.short());
        self.run_staged(undo, |_, w| {
            w.evaluate(id);
            Ok(())
        })?;
        self.notify(GraphMutated::new(MutationKind::TaskCreated).task(id));
        Ok(id)
    }

    pub fn create_group(&mut self, spec: GroupSpec) -> Result<TaskId> {
        self.ensure_idle()?;
        spec.policy.check().map_err(Error::Validation)?;
        for child in &spec.children {
            self.live_task(*child)?;
        }
        let mut task = self.build_task(TaskId::new(), &spec.task)?;
        task.group = Some(GroupData::new(spec.policy));

        let mut undo = self.stage();
        for child in &spec.children {
            self.keep_layout(&mut undo, *child);
            if let Some(old) = self.parent(*child) {
                self.keep_layout(&mut undo, old);
            }
        }
        let id = self.insert_task(task);
        undo.created_task(id);

        let mut seeds = Vec::new();
        let mut event = GraphMutated::new(MutationKind::GroupCreated).task(id);
        for child in spec.children {
            if let Some(old) = self.link_child(id, child) {
                seeds.push(old);
            }
            event = event.task(child);
        }
        seeds.push(id);
        wlog_debug!(
            "Manager::create_group name={} id={} children={}",
            spec.task.name,
            id.short(),
            event.tasks.len() - 1
        );
        self.run_staged(undo, |_, w| {
            for s in seeds {
                w.evaluate(s);
            }
            Ok(())
        })?;
        self.notify(event);
        Ok(id)
    }

    /// Add `child` to `group`, moving it out of any previous group.
    pub fn add_child(&mut self, group: TaskId, child: TaskId) -> Result<WaveReport> {
        self.ensure_idle()?;
        if !self.live_task(group)?.is_group() {
            return Err(Error::NotAGroup(group));
        }
        self.live_task(child)?;
        if self.contains(child, group) {
            wlog_debug!(
                "Manager::add_child rejected: {} contains {}",
                child.short(),
                group.short()
            );
            return Err(Error::CyclicContainment { group, child });
        }

        let mut undo = self.stage();
        self.keep_layout(&mut undo, group);
        self.keep_layout(&mut undo, child);
        if let Some(old) = self.parent(child) {
            self.keep_layout(&mut undo, old);
        }
        let old = self.link_child(group, child);
        let (report, _) = self.run_staged(undo, |_, w| {
            w.evaluate(group);
            if let Some(old) = old {
                w.evaluate(old);
            }
            Ok(())
        })?;
        self.notify(
            GraphMutated::new(MutationKind::ChildAdded)
                .task(group)
                .task(child),
        );
        Ok(report)
    }

    pub fn remove_child(&mut self, group: TaskId, child: TaskId) -> Result<WaveReport> {
        self.ensure_idle()?;
        if !self.live_task(group)?.is_group() {
            return Err(Error::NotAGroup(group));
        }
        if self.live_task(child)?.parent != Some(group) {
            return Err(Error::Validation(format!(
                "task {} is not a child of group {}",
                child, group
            )));
        }
        let mut undo = self.stage();
        self.keep_layout(&mut undo, group);
        self.keep_layout(&mut undo, child);
        self.unlink_child(group, child);
        let (report, _) = self.run_staged(undo, |_, w| {
            w.evaluate(group);
            Ok(())
        })?;
        self.notify(
            GraphMutated::new(MutationKind::ChildRemoved)
                .task(group)
                .task(child),
        );
        Ok(report)
    }

    /// Weight used by `WeightedThreshold` groups. Must be finite and
    /// non-negative.
    pub fn set_child_weight(&mut self, group: TaskId, child: TaskId, weight: f64) -> Result<WaveReport> {
        self.ensure_idle()?;
        if !weight.is_finite() || weight < 0.0 {
            return Err(Error::Validation(format!("invalid child weight {}", weight)));
        }
        let data = self.live_task(group)?.group().ok_or(Error::NotAGroup(group))?;
        if !data.children.contains(&child) {
            return Err(Error::Validation(format!(
                "task {} is not a child of group {}",
                child, group
            )));
        }
        let mut undo = self.stage();
        self.keep_layout(&mut undo, group);
        if let Some(data) = self.tasks.get_mut(&group).and_then(|t| t.group.as_mut()) {
            data.weights.insert(child, weight);
        }
        let (report, _) = self.run_staged(undo, |_, w| {
            w.evaluate(group);
            Ok(())
        })?;
        Ok(report)
    }

    /// Connect an output port to an input port. The adaptor fires once
    /// immediately; if that wave does not converge the adaptor is removed
    /// again and the error returned.
    pub fn create_adaptor(&mut self, spec: AdaptorSpec) -> Result<AdaptorId> {
        self.ensure_idle()?;
        let transform = match self.prepare_adaptor(&spec) {
            Ok(t) => t,
            Err(e) => {
                wlog_debug!("Manager::create_adaptor rejected {} -> {}: {}", spec.source, spec.target, e);
                return Err(e);
            }
        };
        let id = AdaptorId::new();
        let (source, target) = (spec.source.task, spec.target.task);
        wlog_debug!(
            "Manager::create_adaptor id={} {} -> {}",
            id.short(),
            spec.source,
            spec.target
        );
        let mut undo = self.stage();
        self.keep_layout(&mut undo, source);
        self.keep_layout(&mut undo, target);
        self.attach_adaptor(id, spec, transform);
        undo.created_adaptor(id);

        self.run_staged(undo, |_, w| {
            w.fire(id);
            Ok(())
        })?;
        self.notify(
            GraphMutated::new(MutationKind::AdaptorCreated)
                .task(source)
                .task(target)
                .adaptor(id),
        );
        Ok(id)
    }

    /// Remove an adaptor, clearing the target port it fed.
    pub fn destroy_adaptor(&mut self, id: AdaptorId) -> Result<WaveReport> {
        self.ensure_idle()?;
        let adaptor = self.live_adaptor(id)?;
        let (source, target) = (adaptor.source.task, adaptor.target.clone());

        let mut undo = self.stage();
        self.keep_layout(&mut undo, source);
        self.keep_layout(&mut undo, target.task);
        let Some(adaptor) = self.detach_adaptor(id) else {
            return Err(Error::AdaptorNotFound(id));
        };
        self.retired.insert(id);
        undo.removed_adaptor(adaptor);

        let fed = target.clone();
        let (report, _) = self.run_staged(undo, |m, w| {
            m.clear_fed_port(w, &fed, id);
            Ok(())
        })?;
        self.notify(
            GraphMutated::new(MutationKind::AdaptorDestroyed)
                .task(source)
                .task(target.task)
                .adaptor(id),
        );
        Ok(report)
    }

    /// Enabling fires the adaptor; disabling leaves the target data as is.
    pub fn set_adaptor_enabled(&mut self, id: AdaptorId, enabled: bool) -> Result<WaveReport> {
        self.ensure_idle()?;
        let adaptor = self.live_adaptor(id)?;
        let (source, target) = (adaptor.source.task, adaptor.target.task);
        let was = adaptor.enabled;
        if was == enabled {
            return self.run_wave(|_, _| Ok(()));
        }
        if let Some(a) = self.adaptors.get_mut(&id) {
            a.enabled = enabled;
        }

        let report = match self.run_wave(|_, w| {
            if enabled {
                w.fire(id);
            } else {
                w.evaluate(target);
            }
            Ok(())
        }) {
            Ok(report) => report,
            Err(e) => {
                if let Some(a) = self.adaptors.get_mut(&id) {
                    a.enabled = was;
                }
                return Err(e);
            }
        };
        let kind = if enabled {
            MutationKind::AdaptorEnabled
        } else {
            MutationKind::AdaptorDisabled
        };
        self.notify(GraphMutated::new(kind).task(source).task(target).adaptor(id));
        Ok(report)
    }

    /// Fire an adaptor outside its normal triggers.
    pub fn fire_adaptor(&mut self, id: AdaptorId) -> Result<WaveReport> {
        self.ensure_idle()?;
        self.live_adaptor(id)?;
        self.run_wave(|_, w| {
            w.fire(id);
            Ok(())
        })
    }

    /// Destroy a task using the configured child disposition.
    pub fn destroy_task(&mut self, id: TaskId) -> Result<Vec<TaskId>> {
        let disposition = self.config.child_disposition;
        self.destroy_task_with(id, disposition)
    }

    /// Destroy a task, detaching every incident adaptor first. Returns the
    /// ids of all destroyed tasks. If the wave that follows does not
    /// converge, everything is put back and the error returned.
    pub fn destroy_task_with(&mut self, id: TaskId, disposition: ChildDisposition) -> Result<Vec<TaskId>> {
        self.ensure_idle()?;
        let parent = self.live_task(id)?.parent;

        let mut doomed = vec![id];
        let mut promoted = Vec::new();
        match disposition {
            ChildDisposition::Destroy => {
                let mut i = 0;
                while i < doomed.len() {
                    let children = self
                        .tasks
                        .get(&doomed[i])
                        .map(|t| t.children().to_vec())
                        .unwrap_or_default();
                    doomed.extend(children);
                    i += 1;
                }
            }
            ChildDisposition::Promote => promoted = self.live_task(id)?.children().to_vec(),
        }
        let doomed_set: HashSet<TaskId> = doomed.iter().copied().collect();
        let incident: Vec<AdaptorId> = doomed
            .iter()
            .filter_map(|t| self.arcs.get(t))
            .flat_map(|a| a.incoming.iter().chain(a.outgoing.iter()).copied())
            .collect();

        let mut undo = self.stage();
        for task in doomed.iter().chain(promoted.iter()).chain(parent.iter()) {
            self.keep_layout(&mut undo, *task);
        }
        for aid in &incident {
            if let Some(a) = self.adaptors.get(aid) {
                let (source, target) = (a.source.task, a.target.task);
                self.keep_layout(&mut undo, source);
                self.keep_layout(&mut undo, target);
            }
        }

        let mut seeds = Vec::new();
        for child in &promoted {
            match parent {
                Some(p) => {
                    self.link_child(p, *child);
                }
                None => self.unlink_child(id, *child),
            }
            seeds.push(*child);
        }

        let mut removed = Vec::new();
        let mut cleared = Vec::new();
        for aid in incident {
            if let Some(adaptor) = self.detach_adaptor(aid) {
                self.retired.insert(aid);
                removed.push(aid);
                if !doomed_set.contains(&adaptor.target.task) {
                    cleared.push((adaptor.target.clone(), aid));
                }
                undo.removed_adaptor(adaptor);
            }
        }

        if let Some(p) = parent {
            self.unlink_child(p, id);
            seeds.push(p);
        }
        for task_id in &doomed {
            if let Some(task) = self.tasks.remove(task_id) {
                undo.removed_task(task);
            }
            self.arcs.remove(task_id);
        }

        let (_, undo) = self.run_staged(undo, |m, w| {
            for (target, aid) in &cleared {
                m.clear_fed_port(w, target, *aid);
            }
            for s in seeds {
                w.evaluate(s);
            }
            Ok(())
        })?;

        for mut task in undo.into_removed_tasks() {
            for agent in task.agents.iter_mut() {
                agent.detach();
            }
        }
        let before = self.in_flight.len();
        self.in_flight.retain(|_, (task, _)| !doomed_set.contains(task));
        if before != self.in_flight.len() {
            wlog_debug!(
                "Manager::destroy_task dropped {} in-flight submissions",
                before - self.in_flight.len()
            );
        }

        let mut event = GraphMutated::new(MutationKind::TaskDestroyed);
        event.tasks = doomed.clone();
        event.adaptors = removed;
        self.notify(event);
        Ok(doomed)
    }

    fn clear_fed_port(&mut self, w: &mut super::wave::Wave, target: &Endpoint, adaptor: AdaptorId) {
        self.write_port(w, target.task, &target.port, None);
        let source = adaptor.to_string();
        if let Some(t) = self.tasks.get_mut(&target.task) {
            t.diagnostics
                .retain(|d| d.agent.is_some() || d.source != source);
        }
        w.evaluate(target.task);
    }

    /// Attach another agent to a task; its required ports are declared.
    pub fn add_agent(&mut self, task: TaskId, spec: AgentSpec) -> Result<WaveReport> {
        self.ensure_idle()?;
        self.live_task(task)?;
        let agent = self.factory.build_agent(&spec)?;
        let mut undo = self.stage();
        self.keep_layout(&mut undo, task);
        if let Some(t) = self.tasks.get_mut(&task) {
            attach_agent(t, agent)?;
        }
        let (report, _) = self.run_staged(undo, |_, w| {
            w.evaluate(task);
            Ok(())
        })?;
        self.notify(GraphMutated::new(MutationKind::AgentAdded).task(task));
        Ok(report)
    }

    // ---- caller inputs ----

    /// Write data into a port. Writing an output port fires its adaptors.
    pub fn set_port_data(&mut self, task: TaskId, port: &str, data: PortData) -> Result<WaveReport> {
        self.write_input(task, port, Some(data))
    }

    pub fn clear_port_data(&mut self, task: TaskId, port: &str) -> Result<WaveReport> {
        self.write_input(task, port, None)
    }

    fn write_input(&mut self, task: TaskId, port: &str, data: Option<PortData>) -> Result<WaveReport> {
        let p = self.live_task(task)?.port(port).ok_or_else(|| Error::PortNotFound {
            task,
            port: port.to_string(),
        })?;
        let direction = p.direction();
        let fed: Vec<AdaptorId> = p.adaptors().to_vec();
        self.run_wave(|m, w| {
            let changed = m.write_port(w, task, port, data);
            if changed && direction == PortDirection::Output {
                w.fire_all(fed);
            }
            w.evaluate(task);
            Ok(())
        })
    }

    /// Explicitly complete a `Completable` task.
    pub fn mark_completed(&mut self, task: TaskId) -> Result<WaveReport> {
        let state = self.live_task(task)?.state;
        match state {
            State::Completable => {}
            State::Completed => {
                return self.run_wave(|_, w| {
                    w.evaluate(task);
                    Ok(())
                })
            }
            state => return Err(Error::NotCompletable { task, state }),
        }
        self.run_wave(|m, w| {
            m.journal(w, task);
            if let Some(t) = m.tasks.get_mut(&task) {
                t.marked_completed = true;
            }
            w.evaluate(task);
            Ok(())
        })
    }

    /// Clear the completion mark, reset every agent, and drop the task's
    /// in-flight submissions.
    pub fn reset(&mut self, task: TaskId) -> Result<WaveReport> {
        self.ensure_idle()?;
        self.live_task(task)?;
        let stale: Vec<Generation> = self
            .in_flight
            .iter()
            .filter(|(_, (owner, _))| *owner == task)
            .map(|(generation, _)| *generation)
            .collect();
        let report = self.run_wave(|m, w| {
            m.journal(w, task);
            if let Some(t) = m.tasks.get_mut(&task) {
                t.marked_completed = false;
                for agent in t.agents.iter_mut() {
                    agent.reset();
                }
            }
            w.evaluate(task);
            Ok(())
        })?;
        for generation in stale {
            self.in_flight.remove(&generation);
        }
        Ok(report)
    }

    pub fn set_relevant(&mut self, task: TaskId, relevant: bool) -> Result<WaveReport> {
        self.live_task(task)?;
        self.run_wave(|m, w| {
            m.journal(w, task);
            if let Some(t) = m.tasks.get_mut(&task) {
                t.relevant = relevant;
            }
            w.evaluate(task);
            Ok(())
        })
    }

    // ---- waves ----

    /// Start a wave at `task`.
    pub fn reevaluate(&mut self, task: TaskId) -> Result<WaveReport> {
        self.live_task(task)?;
        self.run_wave(|_, w| {
            w.evaluate(task);
            Ok(())
        })
    }

    /// One wave seeded with every task, in creation order.
    pub fn reevaluate_all(&mut self) -> Result<WaveReport> {
        let ids: Vec<TaskId> = self.tasks().iter().map(|t| t.id()).collect();
        self.run_wave(|_, w| {
            for id in ids {
                w.evaluate(id);
            }
            Ok(())
        })
    }

    // ---- observers ----

    pub fn subscribe_state_changed<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&StateChanged) + Send + 'static,
    {
        self.observers.on_state(Box::new(f))
    }

    pub fn subscribe_graph_mutated<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&GraphMutated) + Send + 'static,
    {
        self.observers.on_graph(Box::new(f))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.remove(id)
    }

    // ---- request queue ----

    /// Handle other threads use to post requests.
    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            tx: self.tx.clone(),
        }
    }

    /// Apply every queued request in one wave. `None` if nothing applied.
    pub fn process_pending(&mut self) -> Result<Option<WaveReport>> {
        let requests: Vec<Request> = self.rx.try_iter().collect();
        self.apply_requests(requests)
    }

    /// Block up to `timeout` for at least one request, then apply
    /// everything queued.
    pub fn wait_pending(&mut self, timeout: Duration) -> Result<Option<WaveReport>> {
        let first = match self.rx.recv_timeout(timeout) {
            Ok(r) => r,
            Err(_) => return Ok(None),
        };
        let mut requests = vec![first];
        requests.extend(self.rx.try_iter());
        self.apply_requests(requests)
    }

    fn apply_requests(&mut self, requests: Vec<Request>) -> Result<Option<WaveReport>> {
        self.ensure_idle()?;
        let mut seeds = Vec::new();
        for request in requests {
            match request {
                Request::Reevaluate(task) => {
                    if self.tasks.contains_key(&task) {
                        seeds.push(task);
                    } else {
                        wlog_debug!("Dropping re-evaluation of unknown task {}", task.short());
                    }
                }
                Request::Completion {
                    task,
                    generation,
                    outcome,
                } => {
                    let agent_index = match self.in_flight.get(&generation) {
                        Some((owner, index)) if *owner == task => *index,
                        _ => {
                            wlog_debug!(
                                "Dropping late completion {} for task {}",
                                generation,
                                task.short()
                            );
                            continue;
                        }
                    };
                    self.in_flight.remove(&generation);
                    let accepted = self
                        .tasks
                        .get_mut(&task)
                        .and_then(|t| t.agents.get_mut(agent_index))
                        .map(|a| a.on_completion(generation, &outcome))
                        .unwrap_or(false);
                    if accepted {
                        seeds.push(task);
                    } else {
                        wlog_warn!(
                            "Agent {} on task {} refused completion {}",
                            agent_index,
                            task.short(),
                            generation
                        );
                    }
                }
            }
        }
        if seeds.is_empty() {
            return Ok(None);
        }
        self.run_wave(|_, w| {
            for s in seeds {
                w.evaluate(s);
            }
            Ok(())
        })
        .map(Some)
    }

    // ---- accessors ----

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn state(&self, id: TaskId) -> Result<State> {
        Ok(self.live_task(id)?.state)
    }

    /// First task with the given name, in creation order.
    pub fn task_by_name(&self, name: &str) -> Option<&Task> {
        self.tasks().into_iter().find(|t| t.name() == name)
    }

    /// All tasks in creation order.
    pub fn tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by_key(|t| t.seq);
        tasks
    }

    pub fn adaptor(&self, id: AdaptorId) -> Option<&Adaptor> {
        self.adaptors.get(&id)
    }

    /// All adaptors in creation order.
    pub fn adaptors(&self) -> Vec<&Adaptor> {
        let mut adaptors: Vec<&Adaptor> = self.adaptors.values().collect();
        adaptors.sort_by_key(|a| a.seq);
        adaptors
    }

    pub fn incoming(&self, task: TaskId) -> Vec<AdaptorId> {
        self.arcs.get(&task).map(|a| a.incoming.clone()).unwrap_or_default()
    }

    pub fn outgoing(&self, task: TaskId) -> Vec<AdaptorId> {
        self.arcs.get(&task).map(|a| a.outgoing.clone()).unwrap_or_default()
    }

    pub fn children(&self, group: TaskId) -> Vec<TaskId> {
        self.tasks
            .get(&group)
            .map(|t| t.children().to_vec())
            .unwrap_or_default()
    }

    pub fn parent(&self, task: TaskId) -> Option<TaskId> {
        self.tasks.get(&task).and_then(|t| t.parent)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.adaptors.is_empty() && self.worklets.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn adaptor_count(&self) -> usize {
        self.adaptors.len()
    }

    /// Submissions still awaiting a completion.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Attach an agent, declaring the ports it needs. Fails without touching
/// the task if a needed port exists with the other direction.
pub(crate) fn attach_agent(task: &mut Task, agent: Box<dyn Agent>) -> Result<()> {
    let needed = agent.ports();
    for spec in &needed {
        if let Some(existing) = task.port(&spec.name) {
            if existing.direction() != spec.direction {
                return Err(Error::InvalidAgentConfig {
                    kind: agent.kind().to_string(),
                    reason: format!(
                        "port '{}' is declared as {}, agent needs {}",
                        spec.name,
                        existing.direction(),
                        spec.direction
                    ),
                });
            }
        }
    }
    for spec in &needed {
        task.add_port(spec);
    }
    task.agents.push(agent);
    Ok(())
}
