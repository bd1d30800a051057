//! Structural agents that need no external collaborator.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Agent, AgentContext, AgentError};
use crate::core::{LocalVerdict, PortSpec, State};

fn default_verdict() -> LocalVerdict {
    LocalVerdict::Completable
}

/// Reports a fixed verdict. The pass-through / always-ready agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlwaysAgent {
    #[serde(default = "default_verdict")]
    pub verdict: LocalVerdict,
}

impl AlwaysAgent {
    pub const KIND: &'static str = "always";

    pub fn new(verdict: LocalVerdict) -> Self {
        Self { verdict }
    }
}

impl Agent for AlwaysAgent {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn config(&self) -> serde_json::Value {
        json!({ "verdict": self.verdict })
    }

    fn evaluate(&mut self, _ctx: &mut AgentContext<'_>) -> Result<LocalVerdict, AgentError> {
        Ok(self.verdict)
    }
}

/// Unavailable until the named input port carries non-empty data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDataAgent {
    pub port: String,
}

impl PortDataAgent {
    pub const KIND: &'static str = "port_data";
}

impl Agent for PortDataAgent {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn config(&self) -> serde_json::Value {
        json!({ "port": self.port })
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::input(self.port.clone())]
    }

    fn evaluate(&mut self, ctx: &mut AgentContext<'_>) -> Result<LocalVerdict, AgentError> {
        let port = ctx
            .port(&self.port)
            .ok_or_else(|| AgentError::MissingPort(self.port.clone()))?;
        if port.has_data() {
            Ok(LocalVerdict::Completable)
        } else {
            Ok(LocalVerdict::Unavailable)
        }
    }
}

/// Unavailable until every task feeding this one is completed.
///
/// Irrelevant upstream tasks and disabled adaptors do not hold it back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamAgent;

impl UpstreamAgent {
    pub const KIND: &'static str = "upstream";
}

impl Agent for UpstreamAgent {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn config(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn evaluate(&mut self, ctx: &mut AgentContext<'_>) -> Result<LocalVerdict, AgentError> {
        let satisfied = ctx
            .upstream()
            .iter()
            .filter(|l| l.enabled)
            .all(|l| matches!(l.state, State::Completed | State::Irrelevant));
        if satisfied {
            Ok(LocalVerdict::Completable)
        } else {
            Ok(LocalVerdict::Unavailable)
        }
    }
}
