//! Agents that consult the attribute and resource collaborators.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Agent, AgentContext, AgentError};
use crate::collab::Completeness;
use crate::core::{LocalVerdict, PortSpec};

/// Checks that the attribute set for a role is filled in.
///
/// With `port` set, the objects carried by that input port are the
/// subject of the query, and the agent is Unavailable until they arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeAgent {
    pub role: String,
    #[serde(default)]
    pub port: Option<String>,
}

impl AttributeAgent {
    pub const KIND: &'static str = "attributes";
}

impl Agent for AttributeAgent {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn config(&self) -> serde_json::Value {
        json!({ "role": self.role, "port": self.port })
    }

    fn ports(&self) -> Vec<PortSpec> {
        self.port.iter().map(|p| PortSpec::input(p.clone())).collect()
    }

    fn evaluate(&mut self, ctx: &mut AgentContext<'_>) -> Result<LocalVerdict, AgentError> {
        let attributes = ctx
            .services()
            .attributes
            .clone()
            .ok_or(AgentError::MissingCollaborator("attribute"))?;

        let subject = match &self.port {
            Some(port) => {
                let p = ctx
                    .port(port)
                    .ok_or_else(|| AgentError::MissingPort(port.clone()))?;
                if !p.has_data() {
                    return Ok(LocalVerdict::Unavailable);
                }
                p.data()
            }
            None => None,
        };

        let completeness = attributes
            .completeness(&self.role, subject)
            .map_err(AgentError::Query)?;
        Ok(match completeness {
            Completeness::Missing => LocalVerdict::Unavailable,
            Completeness::Partial => LocalVerdict::Incomplete,
            Completeness::Complete => LocalVerdict::Completable,
        })
    }
}

fn default_min() -> usize {
    1
}

/// Checks that enough resources of a kind have been gathered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceAgent {
    pub kind: String,
    #[serde(default = "default_min")]
    pub min: usize,
}

impl ResourceAgent {
    pub const KIND: &'static str = "resources";
}

impl Agent for ResourceAgent {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn config(&self) -> serde_json::Value {
        json!({ "kind": self.kind, "min": self.min })
    }

    fn evaluate(&mut self, ctx: &mut AgentContext<'_>) -> Result<LocalVerdict, AgentError> {
        let resources = ctx
            .services()
            .resources
            .clone()
            .ok_or(AgentError::MissingCollaborator("resource"))?;
        let count = resources
            .resource_count(&self.kind)
            .map_err(AgentError::Query)?;
        if count >= self.min {
            Ok(LocalVerdict::Completable)
        } else {
            Ok(LocalVerdict::Incomplete)
        }
    }
}
