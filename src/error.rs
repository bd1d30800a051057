use thiserror::Error;

use crate::agents::AgentError;
use crate::core::{AdaptorId, State, TaskId, WaveId};

/// Broad classification of an [`Error`].
///
/// Structural errors are rejected at the mutating call and never partially
/// applied. Convergence errors leave the graph in its last stable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Structural,
    Convergence,
    Agent,
    External,
    Io,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Adaptor not found: {0}")]
    AdaptorNotFound(AdaptorId),

    #[error("Adaptor {0} is detached")]
    AdaptorDetached(AdaptorId),

    #[error("Port '{port}' not found on task {task}")]
    PortNotFound { task: TaskId, port: String },

    #[error("Port '{port}' on task {task} is not an {expected} port")]
    PortDirection {
        task: TaskId,
        port: String,
        expected: String,
    },

    #[error("Input port '{port}' on task {task} is already fed by adaptor {existing}")]
    FanIn {
        task: TaskId,
        port: String,
        existing: AdaptorId,
    },

    #[error("Adding {child} to group {group} would create a containment cycle")]
    CyclicContainment { group: TaskId, child: TaskId },

    #[error("Task {0} is not a group")]
    NotAGroup(TaskId),

    #[error("Task {task} cannot be completed from state {state}")]
    NotCompletable { task: TaskId, state: State },

    #[error("Unresolved worklet parameter: {0}")]
    UnresolvedParameter(String),

    #[error("Worklet parameter '{name}' expects {expected}")]
    ParameterType { name: String, expected: String },

    #[error("Invalid blueprint: {0}")]
    InvalidBlueprint(String),

    #[error("Worklet not found: {0}")]
    WorkletNotFound(String),

    #[error("Worklet already registered: {0}")]
    WorkletExists(String),

    #[error("Unknown agent kind: {0}")]
    UnknownAgentKind(String),

    #[error("Unknown transform kind: {0}")]
    UnknownTransformKind(String),

    #[error("Invalid configuration for {kind}: {reason}")]
    InvalidAgentConfig { kind: String, reason: String },

    #[error("Invalid configuration for transform {kind}: {reason}")]
    InvalidTransformConfig { kind: String, reason: String },

    #[error("Graph mutation rejected: a propagation wave is in progress")]
    WaveInProgress,

    #[error("Wave {wave} did not converge: task {task} changed state {hops} times")]
    Convergence {
        task: TaskId,
        hops: usize,
        wave: WaveId,
    },

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("External collaborator error: {0}")]
    External(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::NoHomeDir => ErrorKind::Io,
            Error::Convergence { .. } => ErrorKind::Convergence,
            Error::Agent(_) => ErrorKind::Agent,
            Error::External(_) => ErrorKind::External,
            _ => ErrorKind::Structural,
        }
    }

    pub fn is_structural(&self) -> bool {
        self.kind() == ErrorKind::Structural
    }
}

pub type Result<T> = std::result::Result<T, Error>;
