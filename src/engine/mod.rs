//! The propagation engine: the manager, its waves, and the observer feed.

pub mod instantiate;
pub mod manager;
pub mod observer;
pub mod queue;
pub mod topology;
mod undo;
pub mod wave;

pub use instantiate::Instantiation;
pub use manager::Manager;
pub use observer::{GraphMutated, MutationKind, StateChanged, SubscriptionId};
pub use queue::ManagerHandle;
pub use topology::Topology;
pub use wave::WaveReport;
