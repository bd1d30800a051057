//! Observer feed: explicit subscribe/unsubscribe with synchronous,
//! ordered delivery once a wave or mutation has settled.

use serde::{Deserialize, Serialize};

use crate::core::{AdaptorId, State, TaskId, WaveId};

/// A task whose state at the end of a wave differs from its state at the
/// start of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChanged {
    pub task: TaskId,
    pub old: State,
    pub new: State,
    pub wave: WaveId,
}

impl std::fmt::Display for StateChanged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "wave {}: {} {} -> {}",
            self.wave,
            self.task.short(),
            self.old,
            self.new
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    TaskCreated,
    GroupCreated,
    TaskDestroyed,
    ChildAdded,
    ChildRemoved,
    AdaptorCreated,
    AdaptorDestroyed,
    AdaptorEnabled,
    AdaptorDisabled,
    AgentAdded,
    WorkletRegistered,
    WorkletInstantiated,
    Imported,
}

/// A structural change and the ids it touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphMutated {
    pub kind: MutationKind,
    pub tasks: Vec<TaskId>,
    pub adaptors: Vec<AdaptorId>,
}

impl GraphMutated {
    pub fn new(kind: MutationKind) -> Self {
        Self {
            kind,
            tasks: Vec::new(),
            adaptors: Vec::new(),
        }
    }

    pub fn task(mut self, id: TaskId) -> Self {
        self.tasks.push(id);
        self
    }

    pub fn adaptor(mut self, id: AdaptorId) -> Self {
        self.adaptors.push(id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type StateObserver = Box<dyn FnMut(&StateChanged) + Send>;
pub type GraphObserver = Box<dyn FnMut(&GraphMutated) + Send>;

#[derive(Default)]
pub(crate) struct Observers {
    next: u64,
    state: Vec<(SubscriptionId, StateObserver)>,
    graph: Vec<(SubscriptionId, GraphObserver)>,
}

impl Observers {
    fn next_id(&mut self) -> SubscriptionId {
        self.next += 1;
        SubscriptionId(self.next)
    }

    pub fn on_state(&mut self, f: StateObserver) -> SubscriptionId {
        let id = self.next_id();
        self.state.push((id, f));
        id
    }

    pub fn on_graph(&mut self, f: GraphObserver) -> SubscriptionId {
        let id = self.next_id();
        self.graph.push((id, f));
        id
    }

    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.state.len() + self.graph.len();
        self.state.retain(|(s, _)| *s != id);
        self.graph.retain(|(s, _)| *s != id);
        before != self.state.len() + self.graph.len()
    }

    /// Deliver in subscription order, event by event.
    pub fn state_changed(&mut self, events: &[StateChanged]) {
        for event in events {
            for (_, f) in self.state.iter_mut() {
                f(event);
            }
        }
    }

    pub fn graph_mutated(&mut self, event: &GraphMutated) {
        for (_, f) in self.graph.iter_mut() {
            f(event);
        }
    }
}
