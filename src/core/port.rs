//! Ports and the payloads adaptors carry between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::AdaptorId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

impl std::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

/// Opaque typed payload carried across an adaptor.
///
/// The engine moves and stamps payloads but never interprets `value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortData {
    /// Role or type tag, e.g. `"objects"` or `"mesh:faces"`.
    pub type_name: String,
    pub value: serde_json::Value,
    /// Number of writes into the owning port, starting at 1.
    #[serde(default)]
    pub revision: u64,
    pub written_at: DateTime<Utc>,
}

impl PortData {
    pub fn new(type_name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            type_name: type_name.into(),
            value,
            revision: 0,
            written_at: Utc::now(),
        }
    }

    /// True when the payload carries nothing an agent could use.
    pub fn is_empty(&self) -> bool {
        match &self.value {
            serde_json::Value::Null => true,
            serde_json::Value::String(s) => s.is_empty(),
            serde_json::Value::Array(a) => a.is_empty(),
            serde_json::Value::Object(o) => o.is_empty(),
            _ => false,
        }
    }

    /// Payload equality, ignoring stamps.
    pub fn same_payload(&self, other: &PortData) -> bool {
        self.type_name == other.type_name && self.value == other.value
    }
}

/// Named attachment point on a task.
#[derive(Debug, Clone)]
pub struct Port {
    name: String,
    direction: PortDirection,
    data: Option<PortData>,
    adaptors: Vec<AdaptorId>,
    writes: u64,
}

impl Port {
    pub fn new(name: impl Into<String>, direction: PortDirection) -> Self {
        Self {
            name: name.into(),
            direction,
            data: None,
            adaptors: Vec::new(),
            writes: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    pub fn data(&self) -> Option<&PortData> {
        self.data.as_ref()
    }

    /// Adaptors attached to this port, in attachment order.
    pub fn adaptors(&self) -> &[AdaptorId] {
        &self.adaptors
    }

    /// True if the port holds non-empty data.
    pub fn has_data(&self) -> bool {
        self.data.as_ref().is_some_and(|d| !d.is_empty())
    }

    /// Overwrite the held payload. Returns true if the payload changed;
    /// rewriting an identical payload keeps the existing stamps.
    pub fn write(&mut self, data: Option<PortData>) -> bool {
        let changed = match (&self.data, &data) {
            (None, None) => false,
            (Some(old), Some(new)) => !old.same_payload(new),
            _ => true,
        };
        if !changed {
            return false;
        }
        self.data = data.map(|mut d| {
            self.writes += 1;
            d.revision = self.writes;
            d.written_at = Utc::now();
            d
        });
        changed
    }

    pub(crate) fn restore(&mut self, data: Option<PortData>) {
        if let Some(d) = &data {
            self.writes = self.writes.max(d.revision);
        }
        self.data = data;
    }

    pub(crate) fn attach(&mut self, adaptor: AdaptorId) {
        if !self.adaptors.contains(&adaptor) {
            self.adaptors.push(adaptor);
        }
    }

    pub(crate) fn detach(&mut self, adaptor: AdaptorId) {
        self.adaptors.retain(|a| *a != adaptor);
    }

    pub(crate) fn relink(&mut self, adaptors: Vec<AdaptorId>) {
        self.adaptors = adaptors;
    }
}

/// Port declaration used when building tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub direction: PortDirection,
}

impl PortSpec {
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Input,
        }
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Output,
        }
    }
}
