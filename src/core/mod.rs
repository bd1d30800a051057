//! Core data model of the task graph.
//!
//! Tasks, ports, adaptors, and groups reference each other only by id;
//! the [`Manager`](crate::engine::Manager) is the single owner of every
//! instance.

pub mod adaptor;
pub mod group;
pub mod ids;
pub mod port;
pub mod state;
pub mod task;

pub use adaptor::{Adaptor, AdaptorSpec, Endpoint, Transform, TransformSpec};
pub use group::{GroupData, GroupPolicy};
pub use ids::{AdaptorId, Generation, TaskId, WaveId};
pub use port::{Port, PortData, PortDirection, PortSpec};
pub use state::{CombinePolicy, LocalVerdict, State};
pub use task::{Diagnostic, GroupSpec, Task, TaskSpec, TaskStyle};
