//! Composite tasks whose state aggregates over their children.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ids::TaskId;
use super::state::{LocalVerdict, State};

/// How a group reduces its children's states.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum GroupPolicy {
    /// Completed iff every relevant child is completed, else the weakest child.
    #[default]
    AllCompleted,
    /// Completed iff any child is completed, else the strongest child.
    AnyCompleted,
    /// Completable once the weighted fraction of completed children reaches
    /// `threshold`, Incomplete before that.
    WeightedThreshold { threshold: f64 },
}

impl GroupPolicy {
    /// A threshold must be a finite fraction in `0.0..=1.0`.
    pub fn check(&self) -> std::result::Result<(), String> {
        match *self {
            GroupPolicy::WeightedThreshold { threshold }
                if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) =>
            {
                Err(format!("group threshold {} is outside 0..=1", threshold))
            }
            _ => Ok(()),
        }
    }
}

/// Group-specific part of a task.
#[derive(Debug, Clone, Default)]
pub struct GroupData {
    pub(crate) policy: GroupPolicy,
    pub(crate) children: Vec<TaskId>,
    pub(crate) weights: HashMap<TaskId, f64>,
}

impl GroupData {
    pub fn new(policy: GroupPolicy) -> Self {
        Self {
            policy,
            children: Vec::new(),
            weights: HashMap::new(),
        }
    }

    pub fn policy(&self) -> GroupPolicy {
        self.policy
    }

    /// Child ids in insertion order.
    pub fn children(&self) -> &[TaskId] {
        &self.children
    }

    pub fn weight(&self, child: &TaskId) -> f64 {
        self.weights.get(child).copied().unwrap_or(1.0)
    }

    pub(crate) fn push_child(&mut self, child: TaskId) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub(crate) fn remove_child(&mut self, child: &TaskId) -> bool {
        let before = self.children.len();
        self.children.retain(|c| c != child);
        self.weights.remove(child);
        before != self.children.len()
    }
}

/// Reduce child states by `policy`.
///
/// Irrelevant children are ignored. With no relevant children the
/// aggregate is `Completable`, matching a task with no agents.
pub fn aggregate(policy: GroupPolicy, children: &[(State, f64)]) -> LocalVerdict {
    let relevant: Vec<(State, f64)> = children
        .iter()
        .copied()
        .filter(|(s, _)| *s != State::Irrelevant)
        .collect();
    if relevant.is_empty() {
        return LocalVerdict::Completable;
    }

    let verdict_of = |s: State| LocalVerdict::from_state(s).unwrap_or(LocalVerdict::Completable);

    match policy {
        GroupPolicy::AllCompleted => {
            if relevant.iter().all(|(s, _)| *s == State::Completed) {
                LocalVerdict::Completed
            } else {
                relevant
                    .iter()
                    .map(|(s, _)| verdict_of(*s))
                    .min()
                    .unwrap_or(LocalVerdict::Completable)
            }
        }
        GroupPolicy::AnyCompleted => relevant
            .iter()
            .map(|(s, _)| verdict_of(*s))
            .max()
            .unwrap_or(LocalVerdict::Completable),
        GroupPolicy::WeightedThreshold { threshold } => {
            let total: f64 = relevant.iter().map(|(_, w)| w.max(0.0)).sum();
            let done: f64 = relevant
                .iter()
                .filter(|(s, _)| *s == State::Completed)
                .map(|(_, w)| w.max(0.0))
                .sum();
            let fraction = if total > 0.0 { done / total } else { 1.0 };
            if fraction >= threshold {
                LocalVerdict::Completable
            } else {
                LocalVerdict::Incomplete
            }
        }
    }
}
