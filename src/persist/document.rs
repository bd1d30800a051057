//! Serializable graph document.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agents::AgentSpec;
use crate::core::{
    AdaptorId, Endpoint, GroupPolicy, PortData, PortDirection, State, TaskId, TaskStyle,
    TransformSpec,
};
use crate::error::Result;
use crate::wlog_debug;
use crate::worklet::Worklet;

pub const DOCUMENT_VERSION: u32 = 1;

fn default_version() -> u32 {
    DOCUMENT_VERSION
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRecord {
    pub name: String,
    pub direction: PortDirection,
    #[serde(default)]
    pub data: Option<PortData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    pub policy: GroupPolicy,
    #[serde(default)]
    pub children: Vec<TaskId>,
    /// Explicitly set child weights, in child order.
    #[serde(default)]
    pub weights: Vec<(TaskId, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub seq: u64,
    pub name: String,
    pub state: State,
    #[serde(default)]
    pub marked_completed: bool,
    #[serde(default = "default_true")]
    pub relevant: bool,
    #[serde(default)]
    pub style: TaskStyle,
    #[serde(default)]
    pub ports: Vec<PortRecord>,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub group: Option<GroupRecord>,
    #[serde(default)]
    pub parent: Option<TaskId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptorRecord {
    pub id: AdaptorId,
    pub seq: u64,
    pub source: Endpoint,
    pub target: Endpoint,
    #[serde(default)]
    pub transform: TransformSpec,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A whole manager's graph: tasks and adaptors in creation order, plus
/// the registered worklets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub adaptors: Vec<AdaptorRecord>,
    #[serde(default)]
    pub worklets: Vec<Worklet>,
    /// Ids of destroyed adaptors.
    #[serde(default)]
    pub retired: Vec<AdaptorId>,
}

impl Default for GraphDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            tasks: Vec::new(),
            adaptors: Vec::new(),
            worklets: Vec::new(),
            retired: Vec::new(),
        }
    }
}

impl GraphDocument {
    pub fn task(&self, id: TaskId) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        wlog_debug!("GraphDocument::load path={}", path.display());
        let contents = fs::read_to_string(path)?;
        let doc = Self::from_json(&contents)?;
        wlog_debug!(
            "Graph document loaded: {} tasks, {} adaptors, {} worklets",
            doc.tasks.len(),
            doc.adaptors.len(),
            doc.worklets.len()
        );
        Ok(doc)
    }

    /// Write atomically: the previous file is kept as `.json.bak` and the
    /// new contents go through a temp file and a rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        if path.exists() {
            let backup_path = path.with_extension("json.bak");
            wlog_debug!("Creating graph backup: {}", backup_path.display());
            fs::copy(path, &backup_path)?;
        }
        let contents = self.to_json()?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &contents)?;
        fs::rename(&temp_path, path)?;
        wlog_debug!("Graph document saved: {}", path.display());
        Ok(())
    }
}
