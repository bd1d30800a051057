use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{wlog_debug, Error, Result};

/// What happens to a group's children when the group is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChildDisposition {
    /// Children move up to the destroyed group's parent (or become roots).
    #[default]
    Promote,
    /// Children are destroyed recursively along with the group.
    Destroy,
}

/// Order in which a task's outgoing adaptors fire within a wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "order")]
pub enum FiringOrder {
    /// Adaptor creation order.
    #[default]
    Creation,
    /// Deterministic pseudo-random order derived from `seed` and the wave id.
    Shuffled { seed: u64 },
}

fn default_hop_bound() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Maximum state changes a single task may make within one wave.
    #[serde(default = "default_hop_bound")]
    pub hop_bound: usize,
    #[serde(default)]
    pub child_disposition: ChildDisposition,
    /// Default `auto_complete` style for tasks created without one.
    #[serde(default)]
    pub auto_complete: bool,
    pub log_file: Option<String>,
    #[serde(default)]
    pub debug: bool,
    // Kept last: it serializes as a TOML table.
    #[serde(default)]
    pub firing_order: FiringOrder,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hop_bound: default_hop_bound(),
            child_disposition: ChildDisposition::default(),
            auto_complete: false,
            log_file: None,
            debug: false,
            firing_order: FiringOrder::default(),
        }
    }
}

impl EngineConfig {
    pub fn workgraph_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".workgraph"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::workgraph_dir()?.join("workgraph.toml"))
    }

    /// Resolved log file path, if one is configured.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_file.as_deref().map(expand_tilde)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        wlog_debug!("EngineConfig::from_path path={}", path.display());
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Load `~/.workgraph/workgraph.toml`, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            wlog_debug!("Config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let config = Self::from_path(&path)?;
        wlog_debug!(
            "Config loaded: hop_bound={}, child_disposition={:?}, firing_order={:?}",
            config.hop_bound,
            config.child_disposition,
            config.firing_order
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::workgraph_dir()?;
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        wlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.hop_bound == 0 {
            return Err(Error::Validation(
                "hop_bound must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
