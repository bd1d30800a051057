//! Structural undo.
//!
//! A structural mutation is applied first and checked by the wave that
//! follows it. Before touching anything the mutation records the links of
//! every task it will change (parent, group membership, arcs, port
//! attachments, agent and port counts) plus whatever it creates or
//! removes. If the wave fails, the wave journal restores states and port
//! data and the undo puts the structure back, so the caller sees the graph
//! exactly as it was before the call.

use std::collections::HashMap;

use super::manager::{Arcs, Manager};
use super::wave::{Wave, WaveReport};
use crate::core::{Adaptor, AdaptorId, GroupData, Task, TaskId};
use crate::error::Result;
use crate::wlog_debug;

/// Links of one task before the mutation.
#[derive(Debug)]
struct Layout {
    parent: Option<TaskId>,
    group: Option<GroupData>,
    arcs: Arcs,
    port_links: Vec<Vec<AdaptorId>>,
    agents: usize,
}

#[derive(Debug)]
pub(crate) struct Undo {
    layouts: HashMap<TaskId, Layout>,
    created_tasks: Vec<TaskId>,
    created_adaptors: Vec<AdaptorId>,
    removed_tasks: Vec<Task>,
    removed_adaptors: Vec<Adaptor>,
    retired: Vec<AdaptorId>,
    seqs: (u64, u64),
}

impl Undo {
    pub(crate) fn created_task(&mut self, id: TaskId) {
        self.created_tasks.push(id);
    }

    pub(crate) fn created_adaptor(&mut self, id: AdaptorId) {
        self.created_adaptors.push(id);
    }

    pub(crate) fn removed_task(&mut self, task: Task) {
        self.removed_tasks.push(task);
    }

    /// An adaptor that was detached and retired.
    pub(crate) fn removed_adaptor(&mut self, adaptor: Adaptor) {
        self.retired.push(adaptor.id);
        self.removed_adaptors.push(adaptor);
    }

    /// Tasks removed by the mutation, once it has been kept.
    pub(crate) fn into_removed_tasks(self) -> Vec<Task> {
        self.removed_tasks
    }
}

impl Manager {
    pub(crate) fn stage(&self) -> Undo {
        Undo {
            layouts: HashMap::new(),
            created_tasks: Vec::new(),
            created_adaptors: Vec::new(),
            removed_tasks: Vec::new(),
            removed_adaptors: Vec::new(),
            retired: Vec::new(),
            seqs: (self.next_task_seq, self.next_adaptor_seq),
        }
    }

    /// Record the links of `task` unless already recorded. Must be called
    /// before the mutation changes them.
    pub(crate) fn keep_layout(&self, undo: &mut Undo, task: TaskId) {
        if undo.layouts.contains_key(&task) {
            return;
        }
        let Some(t) = self.tasks.get(&task) else {
            return;
        };
        undo.layouts.insert(
            task,
            Layout {
                parent: t.parent,
                group: t.group.clone(),
                arcs: self.arcs.get(&task).cloned().unwrap_or_default(),
                port_links: t.ports.iter().map(|p| p.adaptors().to_vec()).collect(),
                agents: t.agents.len(),
            },
        );
    }

    /// Run the wave that checks a staged mutation, undoing the mutation if
    /// the wave fails.
    pub(crate) fn run_staged<F>(&mut self, undo: Undo, seed: F) -> Result<(WaveReport, Undo)>
    where
        F: FnOnce(&mut Manager, &mut Wave) -> Result<()>,
    {
        match self.run_wave(seed) {
            Ok(report) => Ok((report, undo)),
            Err(e) => {
                self.rollback(undo);
                Err(e)
            }
        }
    }

    fn rollback(&mut self, undo: Undo) {
        wlog_debug!(
            "Undoing mutation: {} created tasks, {} created adaptors, {} removed tasks, {} removed adaptors",
            undo.created_tasks.len(),
            undo.created_adaptors.len(),
            undo.removed_tasks.len(),
            undo.removed_adaptors.len()
        );
        for id in &undo.created_adaptors {
            self.adaptors.remove(id);
        }
        for id in &undo.created_tasks {
            if let Some(mut task) = self.tasks.remove(id) {
                for agent in task.agents.iter_mut() {
                    agent.detach();
                }
            }
            self.arcs.remove(id);
        }
        self.in_flight
            .retain(|_, (owner, _)| !undo.created_tasks.contains(owner));
        for task in undo.removed_tasks {
            self.tasks.insert(task.id, task);
        }
        for adaptor in undo.removed_adaptors {
            self.adaptors.insert(adaptor.id, adaptor);
        }
        for id in &undo.retired {
            self.retired.remove(id);
        }
        for (id, layout) in undo.layouts {
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            task.parent = layout.parent;
            task.group = layout.group;
            for agent in task.agents.iter_mut().skip(layout.agents) {
                agent.detach();
            }
            task.agents.truncate(layout.agents);
            task.ports.truncate(layout.port_links.len());
            for (port, links) in task.ports.iter_mut().zip(layout.port_links) {
                port.relink(links);
            }
            self.arcs.insert(id, layout.arcs);
        }
        (self.next_task_seq, self.next_adaptor_seq) = undo.seqs;
    }
}
