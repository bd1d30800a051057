//! Operation-submission runner.
//!
//! The agent never blocks the propagation thread. Its first evaluation
//! hands the operation to the executor and reports Incomplete; the outcome
//! arrives later through the manager's queue and a fresh evaluation turns
//! it into Completed (with the result on the output port) or Incomplete
//! with a failure reason.

use std::any::Any;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Agent, AgentContext, AgentError};
use crate::collab::{OperationOutcome, OperationRequest};
use crate::core::{Generation, LocalVerdict, PortData, PortSpec};
use crate::wlog_debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SubmitStatus {
    #[default]
    Idle,
    Pending {
        generation: Generation,
    },
    Succeeded {
        result: serde_json::Value,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubmitConfig {
    operation: String,
    #[serde(default)]
    parameters: serde_json::Value,
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default = "default_result_type")]
    result_type: String,
    #[serde(default)]
    status: SubmitStatus,
    #[serde(default)]
    submitted_input: Option<serde_json::Value>,
}

fn default_result_type() -> String {
    "result".to_string()
}

#[derive(Debug, Clone)]
pub struct SubmitAgent {
    config: SubmitConfig,
    detached: bool,
}

impl SubmitAgent {
    pub const KIND: &'static str = "submit";

    pub fn new(operation: &str, parameters: serde_json::Value) -> Self {
        Self {
            config: SubmitConfig {
                operation: operation.to_string(),
                parameters,
                input: None,
                output: None,
                result_type: default_result_type(),
                status: SubmitStatus::Idle,
                submitted_input: None,
            },
            detached: false,
        }
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut config: SubmitConfig = serde_json::from_value(config.clone())?;
        // An in-flight submission cannot outlive the manager that made it.
        if matches!(config.status, SubmitStatus::Pending { .. }) {
            config.status = SubmitStatus::Idle;
        }
        Ok(Self {
            config,
            detached: false,
        })
    }

    pub fn with_input(mut self, port: &str) -> Self {
        self.config.input = Some(port.to_string());
        self
    }

    pub fn with_output(mut self, port: &str) -> Self {
        self.config.output = Some(port.to_string());
        self
    }

    pub fn status(&self) -> &SubmitStatus {
        &self.config.status
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

impl Agent for SubmitAgent {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn config(&self) -> serde_json::Value {
        let mut snapshot = self.config.clone();
        if matches!(snapshot.status, SubmitStatus::Pending { .. }) {
            snapshot.status = SubmitStatus::Idle;
            snapshot.submitted_input = None;
        }
        serde_json::to_value(snapshot).unwrap_or_else(|_| json!({ "operation": self.config.operation }))
    }

    fn ports(&self) -> Vec<PortSpec> {
        let mut ports = Vec::new();
        if let Some(p) = &self.config.input {
            ports.push(PortSpec::input(p.clone()));
        }
        if let Some(p) = &self.config.output {
            ports.push(PortSpec::output(p.clone()));
        }
        ports
    }

    fn evaluate(&mut self, ctx: &mut AgentContext<'_>) -> Result<LocalVerdict, AgentError> {
        if self.detached {
            return Ok(LocalVerdict::Incomplete);
        }

        let input = match &self.config.input {
            Some(port) => {
                let p = ctx
                    .port(port)
                    .ok_or_else(|| AgentError::MissingPort(port.clone()))?;
                if !p.has_data() {
                    return Ok(LocalVerdict::Unavailable);
                }
                p.data().cloned()
            }
            None => None,
        };

        // New input invalidates whatever the previous submission produced.
        let input_value = input.as_ref().map(|d| d.value.clone());
        if self.config.status != SubmitStatus::Idle && self.config.submitted_input != input_value {
            wlog_debug!(
                "SubmitAgent input changed on task {}, resubmitting {}",
                ctx.task().short(),
                self.config.operation
            );
            self.config.status = SubmitStatus::Idle;
        }

        match &self.config.status {
            SubmitStatus::Idle => {
                let request = OperationRequest {
                    operation: self.config.operation.clone(),
                    parameters: self.config.parameters.clone(),
                    input,
                };
                match ctx.submit(request) {
                    Ok(generation) => {
                        self.config.status = SubmitStatus::Pending { generation };
                        self.config.submitted_input = input_value;
                        Ok(LocalVerdict::Incomplete)
                    }
                    Err(AgentError::Submission(reason)) => {
                        self.config.status = SubmitStatus::Failed { reason };
                        self.config.submitted_input = input_value;
                        Ok(LocalVerdict::Incomplete)
                    }
                    Err(other) => Err(other),
                }
            }
            SubmitStatus::Pending { .. } | SubmitStatus::Failed { .. } => Ok(LocalVerdict::Incomplete),
            SubmitStatus::Succeeded { result } => {
                if let Some(out) = &self.config.output {
                    let data = PortData::new(self.config.result_type.clone(), result.clone());
                    ctx.write_output(out, Some(data))?;
                }
                Ok(LocalVerdict::Completed)
            }
        }
    }

    fn on_completion(&mut self, generation: Generation, outcome: &OperationOutcome) -> bool {
        if self.detached {
            return false;
        }
        match self.config.status {
            SubmitStatus::Pending { generation: waiting } if waiting == generation => {
                self.config.status = match outcome {
                    OperationOutcome::Succeeded(result) => SubmitStatus::Succeeded {
                        result: result.clone(),
                    },
                    OperationOutcome::Failed(reason) => SubmitStatus::Failed {
                        reason: reason.clone(),
                    },
                };
                true
            }
            _ => false,
        }
    }

    fn checkpoint(&self) -> Option<Box<dyn Any + Send>> {
        Some(Box::new((
            self.config.status.clone(),
            self.config.submitted_input.clone(),
        )))
    }

    fn restore(&mut self, checkpoint: Box<dyn Any + Send>) {
        if let Ok(saved) = checkpoint.downcast::<(SubmitStatus, Option<serde_json::Value>)>() {
            (self.config.status, self.config.submitted_input) = *saved;
        }
    }

    fn reset(&mut self) {
        self.config.status = SubmitStatus::Idle;
        self.config.submitted_input = None;
    }

    fn detach(&mut self) {
        self.detached = true;
    }

    fn failure(&self) -> Option<&str> {
        match &self.config.status {
            SubmitStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}
