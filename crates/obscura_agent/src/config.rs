//! Agent configuration and on-disk layout.
//!
//! `agent.yaml` holds the registration state; the data directory holds
//! the master key, caches, and the offline result spool:
//!
//! ```text
//! <data_dir>/
//!   master.key                   0600
//!   test-cache/<sha256>.json     24h
//!   collection-cache.json        7d
//!   team-config-cache.json       24h
//!   results/<uuid>.json          encrypted, no TTL
//!   version-state.json           1h
//! <config_dir>/agent.yaml
//! ```

use anyhow::{Context, Result};
use obscura_protocol::Guid;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

const APP_DIR: &str = "obscura-agent";

/// Resolved filesystem layout for this agent.
#[derive(Debug, Clone)]
pub struct AgentPaths {
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl AgentPaths {
    /// Resolve from the environment.
    ///
    /// `OBSCURA_AGENT_HOME` overrides both directories (used by tests and
    /// multi-agent hosts); otherwise the platform data/config dirs apply.
    pub fn resolve() -> Self {
        if let Ok(home) = std::env::var("OBSCURA_AGENT_HOME") {
            let home = PathBuf::from(home);
            return Self {
                data_dir: home.clone(),
                config_dir: home,
            };
        }
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        Self {
            data_dir,
            config_dir,
        }
    }

    pub fn at(root: &Path) -> Self {
        Self {
            data_dir: root.to_path_buf(),
            config_dir: root.to_path_buf(),
        }
    }

    pub fn master_key_file(&self) -> PathBuf {
        self.data_dir.join("master.key")
    }

    pub fn test_cache_dir(&self) -> PathBuf {
        self.data_dir.join("test-cache")
    }

    pub fn collection_cache_file(&self) -> PathBuf {
        self.data_dir.join("collection-cache.json")
    }

    pub fn team_config_cache_file(&self) -> PathBuf {
        self.data_dir.join("team-config-cache.json")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.data_dir.join("results")
    }

    pub fn version_state_file(&self) -> PathBuf {
        self.data_dir.join("version-state.json")
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.data_dir.join("credentials.sealed")
    }

    pub fn updates_dir(&self) -> PathBuf {
        self.data_dir.join("updates")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("agent.yaml")
    }
}

/// Registration state persisted as `agent.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub server_url: String,
    pub api_key: String,
    pub agent_guid: Guid,
    #[serde(default)]
    pub authorized_roots: Vec<String>,
}

impl AgentConfig {
    /// Load the config, or `None` when the agent is unregistered.
    pub fn load(paths: &AgentPaths) -> Result<Option<Self>> {
        let file = paths.config_file();
        if !file.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&file)
            .with_context(|| format!("read {}", file.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse {}", file.display()))?;
        config.validate()?;
        Ok(Some(config))
    }

    pub fn save(&self, paths: &AgentPaths) -> Result<()> {
        self.validate()?;
        let file = paths.config_file();
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let raw = serde_yaml::to_string(self).context("serialize agent config")?;
        fs::write(&file, raw).with_context(|| format!("write {}", file.display()))?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.server_url)
            .with_context(|| format!("invalid server url {}", self.server_url))?;
        Ok(())
    }

    /// True when `path` lies under one of the authorized roots.
    pub fn is_authorized_path(&self, path: &Path) -> bool {
        self.authorized_roots
            .iter()
            .any(|root| path.starts_with(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_round_trip() {
        let dir = TempDir::new().unwrap();
        let paths = AgentPaths::at(dir.path());

        assert!(AgentConfig::load(&paths).unwrap().is_none());

        let config = AgentConfig {
            server_url: "http://127.0.0.1:8470".into(),
            api_key: "oak_test".into(),
            agent_guid: Guid::new(),
            authorized_roots: vec!["/photos".into()],
        };
        config.save(&paths).unwrap();

        let loaded = AgentConfig::load(&paths).unwrap().unwrap();
        assert_eq!(loaded.server_url, config.server_url);
        assert_eq!(loaded.agent_guid, config.agent_guid);
    }

    #[test]
    fn test_rejects_bad_server_url() {
        let dir = TempDir::new().unwrap();
        let paths = AgentPaths::at(dir.path());
        let config = AgentConfig {
            server_url: "not a url".into(),
            api_key: "oak_test".into(),
            agent_guid: Guid::new(),
            authorized_roots: vec![],
        };
        assert!(config.save(&paths).is_err());
    }

    #[test]
    fn test_authorized_path_check() {
        let config = AgentConfig {
            server_url: "http://127.0.0.1:8470".into(),
            api_key: "oak_test".into(),
            agent_guid: Guid::new(),
            authorized_roots: vec!["/photos".into(), "/mnt/archive".into()],
        };
        assert!(config.is_authorized_path(Path::new("/photos/2026/shoot")));
        assert!(config.is_authorized_path(Path::new("/mnt/archive")));
        assert!(!config.is_authorized_path(Path::new("/etc")));
    }
}
