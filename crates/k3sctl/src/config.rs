//! User settings file
//!
//! `~/.k3sctl/config.yaml` overrides the default paths and keeps provider
//! credentials between runs, keyed `{provider}.{flag}`.

use anyhow::{Context, Result};
use cluster_orchestration::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Name of the settings file inside the base directory
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Address the API server binds when nothing else is configured
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8088";

/// Contents of the settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// State directory, `<base>/state` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    /// Aggregate kubeconfig, `<base>/config` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
    /// API listen address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_addr: Option<String>,
    /// Log file used by `serve`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Saved credential flags, keyed `{provider}.{flag}`
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, String>,
}

impl Config {
    /// `~/.k3sctl/config.yaml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Cannot determine home directory")?;
        Ok(home
            .join(cluster_orchestration::HOME_DIR_NAME)
            .join(CONFIG_FILE_NAME))
    }

    /// Load settings; a missing file yields the defaults
    pub async fn load(path: &Path) -> Result<Self> {
        match async_fs::read_to_string(path).await {
            Ok(content) if content.trim().is_empty() => Ok(Self::default()),
            Ok(content) => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Write settings, creating the parent directory
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            async_fs::create_dir_all(dir).await?;
        }
        let content = serde_yaml::to_string(self)?;
        async_fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Orchestrator paths rooted at `base`, with overrides from this file
    pub fn orchestrator_config(&self, base: &Path) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::rooted_at(base);
        if let Some(dir) = &self.state_dir {
            config.state_dir = dir.clone();
        }
        if let Some(path) = &self.kubeconfig {
            config.kubeconfig = path.clone();
        }
        config
    }

    /// Saved value of a credential flag
    pub fn credential(&self, provider: &str, flag: &str) -> Option<&str> {
        self.credentials
            .get(&format!("{provider}.{flag}"))
            .map(String::as_str)
    }

    /// Remember a credential flag. Returns whether the stored value changed.
    pub fn set_credential(&mut self, provider: &str, flag: &str, value: &str) -> bool {
        let key = format!("{provider}.{flag}");
        if self.credentials.get(&key).map(String::as_str) == Some(value) {
            return false;
        }
        self.credentials.insert(key, value.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[smol_potat::test]
    async fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.yaml")).await.unwrap();
        assert_eq!(config, Config::default());
    }

    #[smol_potat::test]
    async fn test_credentials_round_trip_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = Config::default();
        assert!(config.set_credential("demo", "access-key", "AK1"));
        assert!(!config.set_credential("demo", "access-key", "AK1"));
        config.save(&path).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("demo.access-key: AK1"));

        let loaded = Config::load(&path).await.unwrap();
        assert_eq!(loaded.credential("demo", "access-key"), Some("AK1"));
        assert_eq!(loaded.credential("native", "access-key"), None);
    }

    #[test]
    fn test_path_overrides() {
        let config = Config {
            state_dir: Some("/srv/state".into()),
            ..Default::default()
        };
        let paths = config.orchestrator_config(Path::new("/home/me/.k3sctl"));
        assert_eq!(paths.state_dir, PathBuf::from("/srv/state"));
        assert_eq!(paths.kubeconfig, PathBuf::from("/home/me/.k3sctl/config"));
    }
}
