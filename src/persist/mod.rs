//! Export and import of a manager's whole graph.
//!
//! A document keeps ids, creation sequences, states, marks, port data,
//! and agent configuration. Importing restores the stored states and then
//! re-evaluates everything in one wave, so a graph of deterministic agents
//! comes back identical and quiet.

pub mod document;

use std::collections::HashSet;
use std::path::Path;

use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;

pub use document::{AdaptorRecord, GraphDocument, GroupRecord, PortRecord, TaskRecord, DOCUMENT_VERSION};

use crate::core::{AdaptorSpec, GroupData, PortSpec, TaskSpec};
use crate::engine::{GraphMutated, Manager, MutationKind, WaveReport};
use crate::error::{Error, Result};
use crate::{wlog, wlog_debug};

impl Manager {
    pub fn export(&self) -> GraphDocument {
        let tasks = self
            .tasks()
            .into_iter()
            .map(|t| TaskRecord {
                id: t.id(),
                seq: t.seq(),
                name: t.name().to_string(),
                state: t.state(),
                marked_completed: t.is_marked_completed(),
                relevant: t.is_relevant(),
                style: t.style(),
                ports: t
                    .ports()
                    .iter()
                    .map(|p| PortRecord {
                        name: p.name().to_string(),
                        direction: p.direction(),
                        data: p.data().cloned(),
                    })
                    .collect(),
                agents: t.agents().iter().map(|a| a.spec()).collect(),
                group: t.group().map(|g| GroupRecord {
                    policy: g.policy(),
                    children: g.children().to_vec(),
                    weights: g
                        .children()
                        .iter()
                        .filter_map(|c| g.weights.get(c).map(|w| (*c, *w)))
                        .collect(),
                }),
                parent: t.parent(),
            })
            .collect();
        let adaptors = self
            .adaptors()
            .into_iter()
            .map(|a| AdaptorRecord {
                id: a.id(),
                seq: a.seq(),
                source: a.source().clone(),
                target: a.target().clone(),
                transform: a.transform_spec(),
                enabled: a.is_enabled(),
            })
            .collect();
        GraphDocument {
            version: DOCUMENT_VERSION,
            tasks,
            adaptors,
            worklets: self.worklets.values().cloned().collect(),
            retired: self.retired.iter().copied().collect(),
        }
    }

    /// Load a document into an empty manager. On any error the manager is
    /// left empty.
    pub fn import(&mut self, doc: GraphDocument) -> Result<WaveReport> {
        self.ensure_idle()?;
        if !self.is_empty() {
            return Err(Error::Validation("import requires an empty manager".to_string()));
        }
        if doc.version > DOCUMENT_VERSION {
            return Err(Error::Validation(format!(
                "unsupported graph document version {}",
                doc.version
            )));
        }

        let (task_count, adaptor_count) = (doc.tasks.len(), doc.adaptors.len());
        if let Err(e) = self.restore_records(doc) {
            wlog_debug!("Manager::import rejected document: {}", e);
            self.clear_graph();
            return Err(e);
        }

        match self.reevaluate_all() {
            Ok(report) => {
                let mut event = GraphMutated::new(MutationKind::Imported);
                event.tasks = self.tasks().iter().map(|t| t.id()).collect();
                event.adaptors = self.adaptors().iter().map(|a| a.id()).collect();
                self.notify(event);
                wlog!(
                    "Imported {} tasks and {} adaptors ({} state changes)",
                    task_count,
                    adaptor_count,
                    report.events.len()
                );
                Ok(report)
            }
            Err(e) => {
                self.clear_graph();
                Err(e)
            }
        }
    }

    fn restore_records(&mut self, doc: GraphDocument) -> Result<()> {
        for record in &doc.tasks {
            if self.tasks.contains_key(&record.id) {
                return Err(Error::Validation(format!("duplicate task id {}", record.id)));
            }
            let spec = TaskSpec {
                name: record.name.clone(),
                ports: record
                    .ports
                    .iter()
                    .map(|p| PortSpec {
                        name: p.name.clone(),
                        direction: p.direction,
                    })
                    .collect(),
                agents: record.agents.clone(),
                style: Some(record.style),
            };
            let mut task = self.build_task(record.id, &spec)?;
            task.seq = record.seq;
            task.state = record.state;
            task.marked_completed = record.marked_completed;
            task.relevant = record.relevant;
            for port in &record.ports {
                if let Some(p) = task.port_mut(&port.name) {
                    p.restore(port.data.clone());
                }
            }
            if let Some(group) = &record.group {
                group.policy.check().map_err(Error::Validation)?;
                task.group = Some(GroupData::new(group.policy));
            }
            self.next_task_seq = self.next_task_seq.max(record.seq);
            self.arcs.entry(record.id).or_default();
            self.tasks.insert(record.id, task);
        }

        let mut containment = DiGraphMap::new();
        let mut adopted = HashSet::new();
        for record in &doc.tasks {
            let Some(group) = &record.group else {
                continue;
            };
            for child in &group.children {
                if !self.tasks.contains_key(child) || !adopted.insert(*child) {
                    return Err(Error::Validation(format!(
                        "group {} lists child {} that is missing or already adopted",
                        record.id, child
                    )));
                }
                containment.add_edge(record.id, *child, ());
                self.link_child(record.id, *child);
            }
            for (child, weight) in &group.weights {
                if !weight.is_finite() || *weight < 0.0 || !group.children.contains(child) {
                    return Err(Error::Validation(format!(
                        "invalid weight {} for child {} of group {}",
                        weight, child, record.id
                    )));
                }
                if let Some(g) = self.tasks.get_mut(&record.id).and_then(|t| t.group.as_mut()) {
                    g.weights.insert(*child, *weight);
                }
            }
        }
        if is_cyclic_directed(&containment) {
            return Err(Error::Validation("group containment is cyclic".to_string()));
        }
        for record in &doc.tasks {
            if self.parent(record.id) != record.parent {
                return Err(Error::Validation(format!(
                    "task {} disagrees with its group about its parent",
                    record.id
                )));
            }
        }

        for record in doc.adaptors {
            if self.adaptors.contains_key(&record.id) {
                return Err(Error::Validation(format!("duplicate adaptor id {}", record.id)));
            }
            let spec = AdaptorSpec {
                source: record.source,
                target: record.target,
                transform: record.transform,
                enabled: record.enabled,
            };
            let transform = self.prepare_adaptor(&spec)?;
            self.attach_adaptor(record.id, spec, transform);
            if let Some(a) = self.adaptors.get_mut(&record.id) {
                a.seq = record.seq;
            }
            self.next_adaptor_seq = self.next_adaptor_seq.max(record.seq);
        }

        for id in doc.retired {
            if self.adaptors.contains_key(&id) {
                return Err(Error::Validation(format!("adaptor {} is both live and retired", id)));
            }
            self.retired.insert(id);
        }

        for worklet in doc.worklets {
            if self.worklets.contains_key(&worklet.name) {
                return Err(Error::WorkletExists(worklet.name));
            }
            self.check_worklet(&worklet)?;
            self.worklets.insert(worklet.name.clone(), worklet);
        }
        Ok(())
    }

    fn clear_graph(&mut self) {
        for task in self.tasks.values_mut() {
            for agent in task.agents.iter_mut() {
                agent.detach();
            }
        }
        self.tasks.clear();
        self.adaptors.clear();
        self.arcs.clear();
        self.worklets.clear();
        self.retired.clear();
        self.in_flight.clear();
        self.next_task_seq = 0;
        self.next_adaptor_seq = 0;
    }

    /// Export and write the graph to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.export().save(path)
    }

    /// Read a document from `path` and import it.
    pub fn load(&mut self, path: &Path) -> Result<WaveReport> {
        let doc = GraphDocument::load(path)?;
        self.import(doc)
    }
}
