//! Task states, agent verdicts, and how verdicts combine.

use serde::{Deserialize, Serialize};

/// Task state, totally ordered by progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Not applicable given the current configuration.
    Irrelevant,
    /// Dependencies not yet satisfied.
    #[default]
    Unavailable,
    /// Available, but agents report missing work.
    Incomplete,
    /// All required work satisfiable; awaiting explicit or automatic completion.
    Completable,
    /// Done. Re-opened only by an explicit reset or by inputs regressing.
    Completed,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Irrelevant => write!(f, "irrelevant"),
            State::Unavailable => write!(f, "unavailable"),
            State::Incomplete => write!(f, "incomplete"),
            State::Completable => write!(f, "completable"),
            State::Completed => write!(f, "completed"),
        }
    }
}

/// An agent's local judgement of its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalVerdict {
    Unavailable,
    Incomplete,
    Completable,
    Completed,
}

impl From<LocalVerdict> for State {
    fn from(v: LocalVerdict) -> Self {
        match v {
            LocalVerdict::Unavailable => State::Unavailable,
            LocalVerdict::Incomplete => State::Incomplete,
            LocalVerdict::Completable => State::Completable,
            LocalVerdict::Completed => State::Completed,
        }
    }
}

impl LocalVerdict {
    /// The verdict equivalent of a state. `Irrelevant` has none.
    pub fn from_state(state: State) -> Option<Self> {
        match state {
            State::Irrelevant => None,
            State::Unavailable => Some(LocalVerdict::Unavailable),
            State::Incomplete => Some(LocalVerdict::Incomplete),
            State::Completable => Some(LocalVerdict::Completable),
            State::Completed => Some(LocalVerdict::Completed),
        }
    }
}

/// How a task reduces the ordered verdicts of its agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CombinePolicy {
    /// The weakest verdict wins: every agent must be satisfied.
    #[default]
    Weakest,
    /// The strongest verdict wins: any one satisfied agent suffices.
    Strongest,
}

/// Reduce verdicts by `policy`. Returns `None` when there are none.
pub fn combine<I>(policy: CombinePolicy, verdicts: I) -> Option<LocalVerdict>
where
    I: IntoIterator<Item = LocalVerdict>,
{
    let iter = verdicts.into_iter();
    match policy {
        CombinePolicy::Weakest => iter.min(),
        CombinePolicy::Strongest => iter.max(),
    }
}

/// Inputs to the final state of a task.
#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    pub relevant: bool,
    /// Combined verdict of agents and, for groups, the child aggregate.
    pub verdict: Option<LocalVerdict>,
    pub marked_completed: bool,
    pub auto_complete: bool,
}

/// Compute a task state. Returns the state and whether the explicit
/// completion mark survives.
pub fn resolve(r: Resolution) -> (State, bool) {
    if !r.relevant {
        return (State::Irrelevant, r.marked_completed);
    }
    match r.verdict.unwrap_or(LocalVerdict::Completable) {
        LocalVerdict::Completed => (State::Completed, r.marked_completed),
        LocalVerdict::Completable if r.marked_completed || r.auto_complete => {
            (State::Completed, r.marked_completed)
        }
        LocalVerdict::Completable => (State::Completable, false),
        other => (other.into(), false),
    }
}
