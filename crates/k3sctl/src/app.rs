//! Wiring of settings, state store, providers and orchestrator

use crate::config::Config;
use anyhow::Result;
use cluster_orchestration::provider::DemoCloud;
use cluster_orchestration::{Orchestrator, ProviderRegistry, SshInstaller};
use cluster_state::FileStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Inventory file of the demo provider, next to the settings file
pub const DEMO_CLOUD_FILE: &str = "demo-cloud.yaml";

/// Everything a command needs
pub struct App {
    /// Loaded settings
    pub config: Config,
    /// Where the settings came from
    pub config_path: PathBuf,
    /// Orchestrator over the file store
    pub orchestrator: Orchestrator,
}

impl App {
    /// Load settings and open the state directory.
    ///
    /// `state_dir` overrides both the default and the settings file.
    pub async fn open(config_path: Option<PathBuf>, state_dir: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => Config::default_path()?,
        };
        let config = Config::load(&config_path).await?;
        let base = config_path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let mut paths = config.orchestrator_config(&base);
        if let Some(dir) = state_dir {
            paths.state_dir = dir;
        }
        debug!("State directory: {}", paths.state_dir.display());
        debug!("Kubeconfig: {}", paths.kubeconfig.display());

        let store = FileStore::new(&paths.state_dir).await?;
        let cloud = DemoCloud::open(base.join(DEMO_CLOUD_FILE)).await?;
        let orchestrator = Orchestrator::new(
            paths,
            ProviderRegistry::with_demo_cloud(cloud),
            Arc::new(store),
            Arc::new(SshInstaller::new()),
        );

        Ok(Self {
            config,
            config_path,
            orchestrator,
        })
    }

    /// Persist credential flag values used by a successful command
    pub async fn remember_credentials(
        &mut self,
        provider: &str,
        values: &[(String, String)],
    ) -> Result<()> {
        let mut changed = false;
        for (flag, value) in values {
            changed |= self.config.set_credential(provider, flag, value);
        }
        if changed {
            self.config.save(&self.config_path).await?;
            debug!("Saved {} credential(s) to {}", provider, self.config_path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[smol_potat::test]
    async fn test_open_lays_out_base_directory() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");

        let mut app = App::open(Some(config_path.clone()), None).await.unwrap();
        assert_eq!(app.orchestrator.config().state_dir, dir.path().join("state"));
        assert!(dir.path().join("state").is_dir());

        app.remember_credentials("demo", &[("access-key".into(), "AK1".into())])
            .await
            .unwrap();
        let reloaded = Config::load(&config_path).await.unwrap();
        assert_eq!(reloaded.credential("demo", "access-key"), Some("AK1"));
    }
}
