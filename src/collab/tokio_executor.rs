//! Operation executor backed by a tokio runtime's blocking pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;

use super::{CompletionSink, OperationExecutor, OperationHandle, OperationOutcome, OperationRequest};
use crate::wlog_debug;

/// A registered operation body.
pub type OperationFn =
    Arc<dyn Fn(OperationRequest) -> std::result::Result<serde_json::Value, String> + Send + Sync>;

/// Runs named operations on `spawn_blocking` and reports through the sink.
///
/// No timeout is imposed; a stalled operation leaves its task waiting.
pub struct TokioExecutor {
    runtime: Handle,
    operations: HashMap<String, OperationFn>,
    counter: AtomicU64,
}

impl TokioExecutor {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            operations: HashMap::new(),
            counter: AtomicU64::new(0),
        }
    }

    /// Register an operation under `name`.
    pub fn register<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(OperationRequest) -> std::result::Result<serde_json::Value, String> + Send + Sync + 'static,
    {
        self.operations.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for TokioExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioExecutor")
            .field("operations", &self.operations.len())
            .finish()
    }
}

impl OperationExecutor for TokioExecutor {
    fn submit(&self, request: OperationRequest, sink: CompletionSink) -> Result<OperationHandle, String> {
        let op = self
            .operations
            .get(&request.operation)
            .cloned()
            .ok_or_else(|| format!("unknown operation '{}'", request.operation))?;
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = OperationHandle(format!("{}-{}", request.operation, n));
        wlog_debug!(
            "TokioExecutor::submit op={} generation={} task={}",
            request.operation,
            sink.generation(),
            sink.task().short()
        );

        self.runtime.spawn_blocking(move || {
            let outcome = match op(request) {
                Ok(value) => OperationOutcome::Succeeded(value),
                Err(reason) => OperationOutcome::Failed(reason),
            };
            sink.deliver(outcome);
        });

        Ok(handle)
    }
}
