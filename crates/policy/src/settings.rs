//! Persisted safety settings.

use crate::safety::SafetyLevel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Read-only view of the user's safety level, consulted once per decision.
#[async_trait]
pub trait SafetySettings: Send + Sync {
    async fn safety_level(&self) -> SafetyLevel;
}

#[async_trait]
impl SafetySettings for SafetyLevel {
    async fn safety_level(&self) -> SafetyLevel {
        *self
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    safety_level: Option<serde_yaml::Value>,
}

/// YAML file holding the persisted safety level.
///
/// The file is re-read on every lookup so edits made by another process (the
/// settings UI) take effect for the next command.
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored level. A missing file or key yields `None`.
    pub async fn load(&self) -> Result<Option<SafetyLevel>, SettingsError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let file: SettingsFile = serde_yaml::from_str(&content)?;
        let level = file.safety_level.and_then(|value| match value {
            serde_yaml::Value::String(s) => SafetyLevel::from_persisted(&s),
            serde_yaml::Value::Number(n) => SafetyLevel::from_persisted(&n.to_string()),
            _ => None,
        });
        Ok(level)
    }

    pub async fn save(&self, level: SafetyLevel) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = SettingsFile {
            safety_level: Some(serde_yaml::Value::String(level.as_str().to_string())),
        };
        let content = serde_yaml::to_string(&file)?;
        tokio::fs::write(&self.path, content).await?;
        debug!(level = level.as_str(), path = %self.path.display(), "Safety level saved");
        Ok(())
    }
}

#[async_trait]
impl SafetySettings for SettingsStore {
    async fn safety_level(&self) -> SafetyLevel {
        match self.load().await {
            Ok(Some(level)) => level,
            Ok(None) => SafetyLevel::default(),
            Err(e) => {
                warn!(path = %self.path.display(), "Unreadable safety settings, using default: {}", e);
                SafetyLevel::default()
            }
        }
    }
}
