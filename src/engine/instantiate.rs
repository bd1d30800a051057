//! Worklet registration and atomic instantiation.

use super::manager::Manager;
use super::observer::{GraphMutated, MutationKind};
use crate::agents::AgentSpec;
use crate::core::{
    AdaptorId, AdaptorSpec, Endpoint, GroupData, Task, TaskId, TaskSpec, Transform, TransformSpec,
};
use crate::error::{Error, Result};
use crate::worklet::params::{self, Bindings};
use crate::worklet::{TaskBlueprint, Worklet};
use crate::{wlog, wlog_debug, wlog_warn};

/// Ids allocated by one instantiation, in blueprint order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instantiation {
    pub worklet: String,
    pub tasks: Vec<TaskId>,
    pub adaptors: Vec<AdaptorId>,
    /// Tasks with no parent inside the fragment.
    pub top_level: Vec<TaskId>,
}

impl Instantiation {
    /// Id allocated for blueprint task `index`.
    pub fn task(&self, index: usize) -> Option<TaskId> {
        self.tasks.get(index).copied()
    }
}

fn bind_task(blueprint: &TaskBlueprint, values: &Bindings) -> Result<TaskSpec> {
    let agents = blueprint
        .agents
        .iter()
        .map(|a| Ok(AgentSpec::new(a.kind.clone(), params::substitute_value(&a.config, values)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(TaskSpec {
        name: params::substitute_str(&blueprint.name, values)?,
        ports: blueprint.ports.clone(),
        agents,
        style: blueprint.style,
    })
}

impl Manager {
    /// Register a worklet under its name. Names are unique and every agent
    /// and transform kind it uses must already be known.
    pub fn register_worklet(&mut self, worklet: Worklet) -> Result<()> {
        self.ensure_idle()?;
        if self.worklets.contains_key(&worklet.name) {
            return Err(Error::WorkletExists(worklet.name));
        }
        self.check_worklet(&worklet)?;
        wlog_debug!(
            "Manager::register_worklet name={} tasks={} adaptors={}",
            worklet.name,
            worklet.blueprint.tasks.len(),
            worklet.blueprint.adaptors.len()
        );
        self.worklets.insert(worklet.name.clone(), worklet);
        self.notify(GraphMutated::new(MutationKind::WorkletRegistered));
        Ok(())
    }

    /// Validate a worklet's blueprint against the known agent and
    /// transform kinds.
    pub(crate) fn check_worklet(&self, worklet: &Worklet) -> Result<()> {
        worklet.blueprint.validate()?;
        for task in &worklet.blueprint.tasks {
            if let Some(agent) = task.agents.iter().find(|a| !self.factory.has_agent(&a.kind)) {
                return Err(Error::UnknownAgentKind(agent.kind.clone()));
            }
        }
        if let Some(adaptor) = worklet
            .blueprint
            .adaptors
            .iter()
            .find(|a| !self.factory.has_transform(&a.transform.kind))
        {
            return Err(Error::UnknownTransformKind(adaptor.transform.kind.clone()));
        }
        Ok(())
    }

    pub fn worklet(&self, name: &str) -> Option<&Worklet> {
        self.worklets.get(name)
    }

    /// Registered worklets, sorted by name.
    pub fn worklets(&self) -> Vec<&Worklet> {
        self.worklets.values().collect()
    }

    /// Create a fresh copy of a registered worklet's fragment.
    ///
    /// Every task and transform is built before anything is registered, so
    /// a failure leaves the graph untouched. If the first wave over the new
    /// fragment fails, the fragment is removed again.
    pub fn instantiate_worklet(&mut self, name: &str, bindings: &Bindings) -> Result<Instantiation> {
        self.ensure_idle()?;
        let worklet = self
            .worklets
            .get(name)
            .cloned()
            .ok_or_else(|| Error::WorkletNotFound(name.to_string()))?;
        let blueprint = &worklet.blueprint;
        let values = params::resolve(&blueprint.parameters, bindings)?;

        let mut built: Vec<Task> = Vec::with_capacity(blueprint.tasks.len());
        for (i, tb) in blueprint.tasks.iter().enumerate() {
            let spec = bind_task(tb, &values)?;
            let mut task = self.build_task(TaskId::new(), &spec).map_err(|e| {
                wlog_debug!("Worklet {} task {} failed to build: {}", name, i, e);
                e
            })?;
            if let Some(policy) = tb.group {
                task.group = Some(GroupData::new(policy));
            }
            built.push(task);
        }
        let mut transforms: Vec<(TransformSpec, Box<dyn Transform>)> = Vec::new();
        for ab in &blueprint.adaptors {
            let spec = TransformSpec::new(
                ab.transform.kind.clone(),
                params::substitute_value(&ab.transform.config, &values)?,
            );
            let transform = self.factory.build_transform(&spec)?;
            transforms.push((spec, transform));
        }

        let mut undo = self.stage();
        let ids: Vec<TaskId> = built.into_iter().map(|t| self.insert_task(t)).collect();
        for id in &ids {
            undo.created_task(*id);
        }
        for (i, tb) in blueprint.tasks.iter().enumerate() {
            let Some(parent) = tb.parent else {
                continue;
            };
            self.link_child(ids[parent], ids[i]);
            if let Some(weight) = tb.weight {
                if let Some(g) = self.tasks.get_mut(&ids[parent]).and_then(|t| t.group.as_mut()) {
                    g.weights.insert(ids[i], weight);
                }
            }
        }
        let mut adaptors = Vec::with_capacity(transforms.len());
        for (ab, (transform_spec, transform)) in blueprint.adaptors.iter().zip(transforms) {
            let id = AdaptorId::new();
            let spec = AdaptorSpec {
                source: Endpoint::new(ids[ab.source.task], ab.source.port.clone()),
                target: Endpoint::new(ids[ab.target.task], ab.target.port.clone()),
                transform: transform_spec,
                enabled: ab.enabled,
            };
            self.attach_adaptor(id, spec, transform);
            undo.created_adaptor(id);
            adaptors.push(id);
        }

        let seeds = ids.clone();
        let fired = adaptors.clone();
        if let Err(e) = self.run_staged(undo, |_, w| {
            w.fire_all(fired);
            for id in seeds {
                w.evaluate(id);
            }
            Ok(())
        }) {
            wlog_warn!("Worklet {} instantiation rolled back: {}", name, e);
            return Err(e);
        }

        let mut event = GraphMutated::new(MutationKind::WorkletInstantiated);
        event.tasks = ids.clone();
        event.adaptors = adaptors.clone();
        self.notify(event);

        let top_level = blueprint.top_level().into_iter().map(|i| ids[i]).collect();
        wlog!(
            "Instantiated worklet {} ({} tasks, {} adaptors)",
            name,
            ids.len(),
            adaptors.len()
        );
        Ok(Instantiation {
            worklet: worklet.name.clone(),
            tasks: ids,
            adaptors,
            top_level,
        })
    }
}
