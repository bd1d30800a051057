//! In-memory collaborators for embedding applications and tests.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use super::{
    AttributeQuery, Completeness, CompletionSink, OperationExecutor, OperationHandle,
    OperationOutcome, OperationRequest, ResourceQuery,
};
use crate::core::PortData;

/// Attribute completeness keyed by role.
#[derive(Debug, Default)]
pub struct StaticAttributes {
    roles: RwLock<HashMap<String, Completeness>>,
}

impl StaticAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, role: &str, completeness: Completeness) {
        if let Ok(mut roles) = self.roles.write() {
            roles.insert(role.to_string(), completeness);
        }
    }
}

impl AttributeQuery for StaticAttributes {
    fn completeness(&self, role: &str, _subject: Option<&PortData>) -> Result<Completeness, String> {
        let roles = self.roles.read().map_err(|e| e.to_string())?;
        Ok(roles.get(role).copied().unwrap_or(Completeness::Missing))
    }
}

/// Resource counts keyed by kind.
#[derive(Debug, Default)]
pub struct StaticResources {
    counts: RwLock<HashMap<String, usize>>,
}

impl StaticResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, kind: &str, count: usize) {
        if let Ok(mut counts) = self.counts.write() {
            counts.insert(kind.to_string(), count);
        }
    }
}

impl ResourceQuery for StaticResources {
    fn resource_count(&self, kind: &str) -> Result<usize, String> {
        let counts = self.counts.read().map_err(|e| e.to_string())?;
        Ok(counts.get(kind).copied().unwrap_or(0))
    }
}

/// A submission held by [`ManualExecutor`] until someone finishes it.
#[derive(Debug)]
pub struct PendingSubmission {
    pub handle: OperationHandle,
    pub request: OperationRequest,
    pub sink: CompletionSink,
}

impl PendingSubmission {
    pub fn succeed(self, value: serde_json::Value) -> bool {
        self.sink.deliver(OperationOutcome::Succeeded(value))
    }

    pub fn fail(self, reason: &str) -> bool {
        self.sink.deliver(OperationOutcome::Failed(reason.to_string()))
    }
}

/// Executor that only records submissions; the caller completes them,
/// possibly from another thread.
#[derive(Debug, Default)]
pub struct ManualExecutor {
    pending: Mutex<Vec<PendingSubmission>>,
    refuse: Mutex<Option<String>>,
    submitted: Mutex<usize>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make further submissions fail immediately with `reason`.
    pub fn refuse_with(&self, reason: Option<&str>) {
        if let Ok(mut refuse) = self.refuse.lock() {
            *refuse = reason.map(str::to_string);
        }
    }

    /// Total submissions accepted so far.
    pub fn submitted(&self) -> usize {
        self.submitted.lock().map(|n| *n).unwrap_or(0)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Remove and return all outstanding submissions.
    pub fn take_pending(&self) -> Vec<PendingSubmission> {
        self.pending
            .lock()
            .map(|mut p| std::mem::take(&mut *p))
            .unwrap_or_default()
    }
}

impl OperationExecutor for ManualExecutor {
    fn submit(&self, request: OperationRequest, sink: CompletionSink) -> Result<OperationHandle, String> {
        if let Some(reason) = self.refuse.lock().map_err(|e| e.to_string())?.clone() {
            return Err(reason);
        }
        let mut submitted = self.submitted.lock().map_err(|e| e.to_string())?;
        *submitted += 1;
        let handle = OperationHandle(format!("manual-{}", *submitted));
        self.pending
            .lock()
            .map_err(|e| e.to_string())?
            .push(PendingSubmission {
                handle: handle.clone(),
                request,
                sink,
            });
        Ok(handle)
    }
}
