//! Kind-name registry for agents and transforms.
//!
//! Specs, worklet blueprints, and exported documents describe agents and
//! transforms by kind name plus a JSON config. The factory turns those
//! back into live objects; applications register their own kinds next to
//! the built-ins.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::{
    Agent, AgentSpec, AlwaysAgent, AttributeAgent, PortDataAgent, ResourceAgent, SubmitAgent,
    UpstreamAgent,
};
use crate::core::adaptor::{Identity, Retag, StateSignal, WhenCompleted};
use crate::core::{Transform, TransformSpec};
use crate::error::{Error, Result};

pub type AgentConstructor = Arc<dyn Fn(&serde_json::Value) -> Result<Box<dyn Agent>> + Send + Sync>;
pub type TransformConstructor =
    Arc<dyn Fn(&serde_json::Value) -> Result<Box<dyn Transform>> + Send + Sync>;

/// Treats a null config as an empty object so kinds with all-default
/// fields can be written without one.
fn parse_config<T: DeserializeOwned>(kind: &str, config: &serde_json::Value) -> Result<T> {
    let value = if config.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        config.clone()
    };
    serde_json::from_value(value).map_err(|e| Error::InvalidAgentConfig {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Clone, Default)]
pub struct Factory {
    agents: HashMap<String, AgentConstructor>,
    transforms: HashMap<String, TransformConstructor>,
}

impl Factory {
    /// An empty factory; nothing can be built until kinds are registered.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut f = Self::new();

        f.register_agent(AlwaysAgent::KIND, |c| {
            Ok(Box::new(parse_config::<AlwaysAgent>(AlwaysAgent::KIND, c)?))
        });
        f.register_agent(PortDataAgent::KIND, |c| {
            Ok(Box::new(parse_config::<PortDataAgent>(PortDataAgent::KIND, c)?))
        });
        f.register_agent(UpstreamAgent::KIND, |_| Ok(Box::new(UpstreamAgent)));
        f.register_agent(AttributeAgent::KIND, |c| {
            Ok(Box::new(parse_config::<AttributeAgent>(AttributeAgent::KIND, c)?))
        });
        f.register_agent(ResourceAgent::KIND, |c| {
            Ok(Box::new(parse_config::<ResourceAgent>(ResourceAgent::KIND, c)?))
        });
        f.register_agent(SubmitAgent::KIND, |c| {
            let agent = SubmitAgent::from_config(c).map_err(|e| Error::InvalidAgentConfig {
                kind: SubmitAgent::KIND.to_string(),
                reason: e.to_string(),
            })?;
            Ok(Box::new(agent))
        });

        f.register_transform(Identity::KIND, |_| Ok(Box::new(Identity)));
        f.register_transform(WhenCompleted::KIND, |_| Ok(Box::new(WhenCompleted)));
        f.register_transform(StateSignal::KIND, |_| Ok(Box::new(StateSignal)));
        f.register_transform(Retag::KIND, |c| {
            let type_name = c
                .get("type_name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::InvalidTransformConfig {
                    kind: Retag::KIND.to_string(),
                    reason: "missing string field 'type_name'".to_string(),
                })?;
            Ok(Box::new(Retag {
                type_name: type_name.to_string(),
            }))
        });

        f
    }

    /// Register (or replace) an agent kind.
    pub fn register_agent<F>(&mut self, kind: &str, ctor: F)
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn Agent>> + Send + Sync + 'static,
    {
        self.agents.insert(kind.to_string(), Arc::new(ctor));
    }

    /// Register (or replace) a transform kind.
    pub fn register_transform<F>(&mut self, kind: &str, ctor: F)
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn Transform>> + Send + Sync + 'static,
    {
        self.transforms.insert(kind.to_string(), Arc::new(ctor));
    }

    pub fn has_agent(&self, kind: &str) -> bool {
        self.agents.contains_key(kind)
    }

    pub fn has_transform(&self, kind: &str) -> bool {
        self.transforms.contains_key(kind)
    }

    pub fn agent_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn build_agent(&self, spec: &AgentSpec) -> Result<Box<dyn Agent>> {
        let ctor = self
            .agents
            .get(&spec.kind)
            .ok_or_else(|| Error::UnknownAgentKind(spec.kind.clone()))?;
        ctor(&spec.config)
    }

    pub fn build_transform(&self, spec: &TransformSpec) -> Result<Box<dyn Transform>> {
        let ctor = self
            .transforms
            .get(&spec.kind)
            .ok_or_else(|| Error::UnknownTransformKind(spec.kind.clone()))?;
        ctor(&spec.config)
    }
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut transforms: Vec<&str> = self.transforms.keys().map(String::as_str).collect();
        transforms.sort_unstable();
        f.debug_struct("Factory")
            .field("agents", &self.agent_kinds())
            .field("transforms", &transforms)
            .finish()
    }
}
