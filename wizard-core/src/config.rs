//! Console configuration loaded from TOML.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_PREFIX: &str = "/api/v1";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub api_prefix: String,
    /// Injected into every request that does not name a cluster itself.
    pub cluster_name: Option<String>,
    pub timeout_ms: u64,
    pub requested_by: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            cluster_name: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            requested_by: "ambari".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".wizard-state"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub server: ServerConfig,
    pub polling: PollingConfig,
    pub storage: StorageConfig,
}

impl ConsoleConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let cfg: ConsoleConfig = toml::from_str(text).context("failed to parse console config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Missing file means defaults; a present but broken file is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No config at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.server.base_url)
            .with_context(|| format!("invalid server.base_url {:?}", self.server.base_url))?;
        if !self.server.api_prefix.starts_with('/') {
            anyhow::bail!("server.api_prefix must start with '/'");
        }
        if self.server.timeout_ms == 0 {
            anyhow::bail!("server.timeout_ms must be positive");
        }
        if self.polling.interval_ms == 0 {
            anyhow::bail!("polling.interval_ms must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let cfg = ConsoleConfig::from_toml(
            r#"
[server]
base_url = "https://ambari.example.com:8443"
cluster_name = "c1"
"#,
        )
        .unwrap();
        assert_eq!(cfg.server.api_prefix, "/api/v1");
        assert_eq!(cfg.server.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(cfg.server.cluster_name.as_deref(), Some("c1"));
        assert_eq!(cfg.polling, PollingConfig::default());
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = ConsoleConfig::from_toml("[server]\nbase_url = \"not a url\"\n").unwrap_err();
        assert!(format!("{:#}", err).contains("base_url"));
    }

    #[test]
    fn absent_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let cfg = ConsoleConfig::load_from(&dir.path().join("wizard.toml")).unwrap();
        assert_eq!(cfg, ConsoleConfig::default());
    }

    #[test]
    fn file_values_are_loaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wizard.toml");
        fs::write(&path, "[polling]\ninterval_ms = 250\n[storage]\nstate_dir = \"/tmp/w\"\n").unwrap();
        let cfg = ConsoleConfig::load_from(&path).unwrap();
        assert_eq!(cfg.polling.interval(), Duration::from_millis(250));
        assert_eq!(cfg.storage.state_dir, PathBuf::from("/tmp/w"));
    }
}
