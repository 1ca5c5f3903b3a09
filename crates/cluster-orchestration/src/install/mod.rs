//! k3s installation on provisioned nodes

pub mod script;
pub mod ssh;

pub use ssh::{SshInstaller, SshRunner};

use crate::Result;
use async_trait::async_trait;
use cluster_state::{ClusterDescriptor, ClusterIdentity, Node, SshSettings};
use serde::{Deserialize, Serialize};

/// Port of the k3s API server
pub const API_PORT: u16 = 6443;

/// Port the dashboard UI is exposed on
pub const UI_PORT: u16 = 8999;

/// Everything an installer needs to know about the cluster
#[derive(Debug, Clone)]
pub struct InstallContext {
    /// Cluster identity, also the kubeconfig context name
    pub identity: ClusterIdentity,
    /// Descriptor with defaults applied
    pub descriptor: ClusterDescriptor,
    /// Effective SSH settings
    pub ssh: SshSettings,
}

/// How later nodes join the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    /// Node join token
    pub token: String,
    /// Server URL, `https://{ip}:6443`
    pub server_url: String,
}

impl JoinInfo {
    /// Join info pointing at `address`
    pub fn new(token: impl Into<String>, address: &str) -> Self {
        Self {
            token: token.into(),
            server_url: format!("https://{address}:{API_PORT}"),
        }
    }
}

/// A manifest applied to the cluster after install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// File name stem
    pub name: String,
    /// YAML content
    pub content: String,
}

/// Installs and removes k3s on nodes
#[async_trait]
pub trait Installer: Send + Sync {
    /// Install a server. With `join` unset the node initializes the cluster.
    async fn install_master(
        &self,
        ctx: &InstallContext,
        node: &Node,
        join: Option<&JoinInfo>,
    ) -> Result<JoinInfo>;

    /// Install an agent joining through `join`
    async fn install_worker(&self, ctx: &InstallContext, node: &Node, join: &JoinInfo)
    -> Result<()>;

    /// Apply manifests through a master
    async fn deploy_manifests(
        &self,
        ctx: &InstallContext,
        master: &Node,
        manifests: &[Manifest],
    ) -> Result<()>;

    /// Kubeconfig of the cluster, with the server address reachable from here
    async fn fetch_kubeconfig(&self, ctx: &InstallContext, master: &Node) -> Result<String>;

    /// Remove k3s from a node
    async fn uninstall(&self, ctx: &InstallContext, node: &Node) -> Result<()>;
}

/// Dashboard manifest deployed when the UI is enabled
pub fn ui_manifest() -> Manifest {
    Manifest {
        name: "ui".into(),
        content: format!(
            r#"apiVersion: helm.cattle.io/v1
kind: HelmChart
metadata:
  name: kubernetes-dashboard
  namespace: kube-system
spec:
  chart: kubernetes-dashboard
  repo: https://kubernetes.github.io/dashboard/
  version: 2.7.0
  targetNamespace: kubernetes-dashboard
  valuesContent: |-
    service:
      type: LoadBalancer
      externalPort: {UI_PORT}
"#
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_info_url() {
        let join = JoinInfo::new("K10abc", "10.0.0.5");
        assert_eq!(join.server_url, "https://10.0.0.5:6443");
    }

    #[test]
    fn test_ui_manifest_exposes_port() {
        let manifest = ui_manifest();
        assert!(manifest.content.contains("externalPort: 8999"));
        let parsed: serde_yaml::Value = serde_yaml::from_str(&manifest.content).unwrap();
        assert_eq!(parsed["kind"], serde_yaml::Value::from("HelmChart"));
    }
}
