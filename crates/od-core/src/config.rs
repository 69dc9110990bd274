use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OdError, Result};
use crate::types::DocumentType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    pub session: SessionConfig,
    pub recovery: RecoveryConfig,
    pub supervisor: SupervisorConfig,
    pub extensions: Vec<ExtensionConfig>,
    pub server: ServerConfig,
}

impl DeskConfig {
    /// Load a TOML config file. Missing sections fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| OdError::Config(format!("read {}: {e}", path.display())))?;
        let config = Self::from_toml(&raw)?;
        tracing::debug!(
            path = %path.display(),
            extensions = config.extensions.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: DeskConfig =
            toml::from_str(raw).map_err(|e| OdError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.recovery.retention_hours == 0 {
            return Err(OdError::Config("recovery.retention_hours must be > 0".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for ext in &self.extensions {
            if ext.id.trim().is_empty() {
                return Err(OdError::Config("extension id must not be empty".into()));
            }
            if !seen.insert(ext.id.as_str()) {
                return Err(OdError::Config(format!("duplicate extension id: {}", ext.id)));
            }
        }
        Ok(())
    }
}

/// When bound extensions receive the export triggered by a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushMode {
    /// Save waits for every delivery.
    #[default]
    Sync,
    /// Exports are taken under the session lock, delivery runs on a spawned task.
    Background,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions untouched for this long are torn down by idle eviction.
    pub idle_timeout_secs: Option<u64>,
    pub push_mode: PushMode,
    /// Default deadline for open/save/recover/push when the caller supplies none.
    pub operation_timeout_secs: Option<u64>,
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: Some(4 * 60 * 60),
            push_mode: PushMode::Sync,
            operation_timeout_secs: Some(120),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub dir: PathBuf,
    pub retention_hours: u32,
    /// Remove the record once its document has been written back.
    pub delete_on_recover: bool,
    /// Flag new records so callers confirm before overwriting the original file.
    pub prompt_on_reconnect: bool,
    pub sweep_interval_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        let dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("officedesk")
            .join("recovery");
        Self {
            dir,
            retention_hours: 24,
            delete_on_recover: true,
            prompt_on_reconnect: true,
            sweep_interval_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Restarts attempted for a crashed extension before it is parked in `NotFound`.
    pub restart_limit: u32,
    pub probe_interval_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_limit: 3,
            probe_interval_secs: 60,
        }
    }
}

/// One entry of the extension registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtensionConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Executable started for this extension.
    #[serde(default)]
    pub command: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub document_types: Vec<DocumentType>,
    /// Export formats the extension accepts as input.
    #[serde(default)]
    pub formats: Vec<String>,
}

impl ExtensionConfig {
    pub fn new(id: impl Into<String>, formats: &[&str]) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: "0.0.0".into(),
            command: None,
            args: Vec::new(),
            document_types: DocumentType::ALL.to_vec(),
            formats: formats.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn accepts_format(&self, format: &str) -> bool {
        self.formats.iter().any(|f| f.eq_ignore_ascii_case(format))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8730,
        }
    }
}
