//! workgraph: a reactive task-dependency engine.
//!
//! Tasks exchange data through adaptors, derive their state from pluggable
//! agents, and nest into groups. A single [`Manager`] owns the graph and
//! re-evaluates it in bounded propagation waves after every input.

pub mod agents;
pub mod collab;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod log;
pub mod persist;
pub mod worklet;

pub use agents::{Agent, AgentContext, AgentError, AgentSpec, Factory};
pub use config::{ChildDisposition, EngineConfig, FiringOrder};
pub use core::{
    AdaptorId, AdaptorSpec, Endpoint, GroupPolicy, GroupSpec, LocalVerdict, PortData, State, TaskId,
    TaskSpec, TaskStyle, TransformSpec,
};
pub use engine::{GraphMutated, Instantiation, Manager, ManagerHandle, MutationKind, StateChanged, WaveReport};
pub use error::{Error, ErrorKind, Result};
pub use persist::GraphDocument;
pub use worklet::{Bindings, Blueprint, Worklet};
