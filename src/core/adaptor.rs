//! Adaptors: directed data-flow edges between task ports.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ids::{AdaptorId, TaskId};
use super::port::PortData;
use super::state::State;

/// One end of an adaptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub task: TaskId,
    pub port: String,
}

impl Endpoint {
    pub fn new(task: TaskId, port: impl Into<String>) -> Self {
        Self {
            task,
            port: port.into(),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.task.short(), self.port)
    }
}

/// Serializable description of a transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl TransformSpec {
    pub fn new(kind: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            config,
        }
    }

    pub fn identity() -> Self {
        Self::new(Identity::KIND, serde_json::Value::Null)
    }
}

impl Default for TransformSpec {
    fn default() -> Self {
        Self::identity()
    }
}

/// Pluggable conversion applied when an adaptor fires.
pub trait Transform: Send + std::fmt::Debug {
    fn kind(&self) -> &str;

    fn config(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Produce the payload for the target port. `Ok(None)` clears it.
    fn apply(
        &self,
        input: Option<&PortData>,
        source_state: State,
    ) -> std::result::Result<Option<PortData>, String>;
}

/// Passes the source payload through unchanged.
#[derive(Debug, Default)]
pub struct Identity;

impl Identity {
    pub const KIND: &'static str = "identity";
}

impl Transform for Identity {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn apply(&self, input: Option<&PortData>, _: State) -> std::result::Result<Option<PortData>, String> {
        Ok(input.cloned())
    }
}

/// Passes the payload only once the source task is completed.
#[derive(Debug, Default)]
pub struct WhenCompleted;

impl WhenCompleted {
    pub const KIND: &'static str = "when_completed";
}

impl Transform for WhenCompleted {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn apply(
        &self,
        input: Option<&PortData>,
        source_state: State,
    ) -> std::result::Result<Option<PortData>, String> {
        if source_state == State::Completed {
            Ok(input.cloned())
        } else {
            Ok(None)
        }
    }
}

/// Re-tags the payload with a different role/type name.
#[derive(Debug)]
pub struct Retag {
    pub type_name: String,
}

impl Retag {
    pub const KIND: &'static str = "retag";
}

impl Transform for Retag {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn config(&self) -> serde_json::Value {
        json!({ "type_name": self.type_name })
    }

    fn apply(&self, input: Option<&PortData>, _: State) -> std::result::Result<Option<PortData>, String> {
        Ok(input.map(|d| PortData::new(self.type_name.clone(), d.value.clone())))
    }
}

/// Emits the source state as the payload.
#[derive(Debug, Default)]
pub struct StateSignal;

impl StateSignal {
    pub const KIND: &'static str = "state";
}

impl Transform for StateSignal {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn apply(&self, _: Option<&PortData>, source_state: State) -> std::result::Result<Option<PortData>, String> {
        let value = serde_json::to_value(source_state).map_err(|e| e.to_string())?;
        Ok(Some(PortData::new("state", value)))
    }
}

/// Request to create an adaptor.
#[derive(Debug, Clone)]
pub struct AdaptorSpec {
    pub source: Endpoint,
    pub target: Endpoint,
    pub transform: TransformSpec,
    pub enabled: bool,
}

impl AdaptorSpec {
    pub fn new(source: Endpoint, target: Endpoint) -> Self {
        Self {
            source,
            target,
            transform: TransformSpec::identity(),
            enabled: true,
        }
    }

    pub fn with_transform(mut self, transform: TransformSpec) -> Self {
        self.transform = transform;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A live edge owned by the manager.
#[derive(Debug)]
pub struct Adaptor {
    pub(crate) id: AdaptorId,
    pub(crate) seq: u64,
    pub(crate) source: Endpoint,
    pub(crate) target: Endpoint,
    pub(crate) transform: Box<dyn Transform>,
    pub(crate) enabled: bool,
}

impl Adaptor {
    pub fn id(&self) -> AdaptorId {
        self.id
    }

    /// Creation sequence; sibling adaptors fire in this order by default.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn source(&self) -> &Endpoint {
        &self.source
    }

    pub fn target(&self) -> &Endpoint {
        &self.target
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn transform(&self) -> &dyn Transform {
        self.transform.as_ref()
    }

    pub fn transform_spec(&self) -> TransformSpec {
        TransformSpec::new(self.transform.kind(), self.transform.config())
    }
}
