//! Paths used by the orchestrator

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the per-user directory holding state, kubeconfig and settings
pub const HOME_DIR_NAME: &str = ".k3sctl";

/// Orchestrator configuration, built once at startup and passed in explicitly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Directory holding one state file per cluster
    pub state_dir: PathBuf,
    /// Aggregate kubeconfig file that receives one context per cluster
    pub kubeconfig: PathBuf,
}

impl OrchestratorConfig {
    /// Layout rooted at `base`: `base/state` and `base/config`
    pub fn rooted_at(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            state_dir: base.join("state"),
            kubeconfig: base.join("config"),
        }
    }

    /// Layout under `~/.k3sctl`
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::InvalidOption("cannot determine home directory".into()))?;
        Ok(Self::rooted_at(home.join(HOME_DIR_NAME)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rooted_layout() {
        let config = OrchestratorConfig::rooted_at("/var/lib/k3sctl");
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/k3sctl/state"));
        assert_eq!(config.kubeconfig, PathBuf::from("/var/lib/k3sctl/config"));
    }
}
