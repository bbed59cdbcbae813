use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use techie_executor::Shell;

pub const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    pub ws_endpoint: String,
    pub api_endpoint: String,
    /// Shell used for commands. Platform default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("./data/settings.yaml")
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_endpoint: "ws://127.0.0.1:8080/ws".to_string(),
            api_endpoint: "http://127.0.0.1:8080".to_string(),
            shell: None,
            settings_path: default_settings_path(),
            token: None,
        }
    }
}

impl ClientConfig {
    /// Config file location, overridable with `TECHIE_CONFIG`.
    pub fn path_from_env() -> PathBuf {
        std::env::var("TECHIE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Replace fields with `TECHIE_WS_ENDPOINT`, `TECHIE_API_ENDPOINT` and
    /// `TECHIE_TOKEN` where `lookup` has a non-empty value.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(endpoint) = set("TECHIE_WS_ENDPOINT") {
            self.ws_endpoint = endpoint;
        }
        if let Some(endpoint) = set("TECHIE_API_ENDPOINT") {
            self.api_endpoint = endpoint;
        }
        if let Some(token) = set("TECHIE_TOKEN") {
            self.token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.ws_endpoint.starts_with("ws://") || self.ws_endpoint.starts_with("wss://")) {
            bail!("ws_endpoint must be a ws:// or wss:// URL, got '{}'", self.ws_endpoint);
        }
        if !(self.api_endpoint.starts_with("http://") || self.api_endpoint.starts_with("https://"))
        {
            bail!("api_endpoint must be an http(s) URL, got '{}'", self.api_endpoint);
        }
        if self.shell.as_deref().is_some_and(|shell| shell.trim().is_empty()) {
            bail!("shell cannot be empty");
        }
        Ok(())
    }

    pub fn shell(&self) -> Shell {
        match &self.shell {
            Some(program) => Shell::from_program(program),
            None => Shell::platform_default(),
        }
    }
}
