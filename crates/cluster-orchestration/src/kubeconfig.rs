//! Aggregate kubeconfig file holding one context per cluster
//!
//! Updates are read-modify-write. Two writers racing on the file can lose one
//! update; cluster state itself is unaffected.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

/// Kubeconfig document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KubeConfig {
    /// Always `v1`
    #[serde(default = "api_version", rename = "apiVersion")]
    pub api_version: String,
    /// Always `Config`
    #[serde(default = "kind")]
    pub kind: String,
    /// Cluster endpoints
    #[serde(default)]
    pub clusters: Vec<Named>,
    /// Contexts binding a cluster to a user
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    /// Credentials
    #[serde(default)]
    pub users: Vec<Named>,
    /// Selected context
    #[serde(default)]
    pub current_context: String,
    /// Client preferences
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub preferences: Value,
}

fn api_version() -> String {
    "v1".into()
}

fn kind() -> String {
    "Config".into()
}

/// Named cluster or user entry; the body is kept opaque
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Named {
    /// Entry name
    pub name: String,
    /// Body under the `cluster` or `user` key
    #[serde(flatten)]
    pub body: serde_yaml::Mapping,
}

/// Named context entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    /// Context name
    pub name: String,
    /// Context body
    pub context: ContextRef,
}

/// Cluster and user a context points at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRef {
    /// Cluster entry name
    pub cluster: String,
    /// User entry name
    pub user: String,
    /// Default namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl KubeConfig {
    /// Empty document
    pub fn new() -> Self {
        Self {
            api_version: api_version(),
            kind: kind(),
            ..Default::default()
        }
    }

    /// Parse a kubeconfig document
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::Kubeconfig(e.to_string()))
    }

    /// Take the first cluster and user of `incoming`, rename both to
    /// `context`, and store them under a context of the same name.
    pub fn merge(&mut self, context: &str, incoming: &KubeConfig) -> Result<()> {
        let mut cluster = incoming
            .clusters
            .first()
            .cloned()
            .ok_or_else(|| Error::Kubeconfig("incoming kubeconfig has no cluster".into()))?;
        let mut user = incoming
            .users
            .first()
            .cloned()
            .ok_or_else(|| Error::Kubeconfig("incoming kubeconfig has no user".into()))?;
        cluster.name = context.to_string();
        user.name = context.to_string();

        self.remove(context);
        self.clusters.push(cluster);
        self.users.push(user);
        self.contexts.push(NamedContext {
            name: context.to_string(),
            context: ContextRef {
                cluster: context.to_string(),
                user: context.to_string(),
                namespace: None,
            },
        });
        self.current_context = context.to_string();
        Ok(())
    }

    /// Drop the context and the cluster and user entries of the same name.
    /// Returns whether anything was removed.
    pub fn remove(&mut self, context: &str) -> bool {
        let before = self.clusters.len() + self.users.len() + self.contexts.len();
        self.clusters.retain(|c| c.name != context);
        self.users.retain(|u| u.name != context);
        self.contexts.retain(|c| c.name != context);
        if self.current_context == context {
            self.current_context.clear();
        }
        before != self.clusters.len() + self.users.len() + self.contexts.len()
    }

    /// Whether a context of this name exists
    pub fn has_context(&self, context: &str) -> bool {
        self.contexts.iter().any(|c| c.name == context)
    }
}

/// Load the file, or an empty document when it does not exist
pub async fn load(path: &Path) -> Result<KubeConfig> {
    match async_fs::read_to_string(path).await {
        Ok(content) if content.trim().is_empty() => Ok(KubeConfig::new()),
        Ok(content) => KubeConfig::parse(&content),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(KubeConfig::new()),
        Err(e) => Err(Error::Kubeconfig(format!("reading {}: {e}", path.display()))),
    }
}

/// Write the file through a temporary file in the same directory
pub async fn store(path: &Path, config: &KubeConfig) -> Result<()> {
    let io_err = |e: std::io::Error| Error::Kubeconfig(format!("writing {}: {e}", path.display()));
    let content = serde_yaml::to_string(config).map_err(|e| Error::Kubeconfig(e.to_string()))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    async_fs::create_dir_all(dir).await.map_err(io_err)?;

    let tmp = dir.join(format!(".kubeconfig.{}.tmp", Uuid::new_v4()));
    async_fs::write(&tmp, content).await.map_err(io_err)?;
    if let Err(e) = async_fs::rename(&tmp, path).await {
        let _ = async_fs::remove_file(&tmp).await;
        return Err(io_err(e));
    }
    Ok(())
}

/// Merge the kubeconfig of a new cluster into the file under `context`
pub async fn merge_cluster(path: &Path, context: &str, kubeconfig: &str) -> Result<()> {
    let incoming = KubeConfig::parse(kubeconfig)?;
    let mut config = load(path).await?;
    config.merge(context, &incoming)?;
    store(path, &config).await?;
    debug!("Merged context {} into {}", context, path.display());
    Ok(())
}

/// Remove the context of a cluster from the file. A missing file or context
/// is not an error.
pub async fn remove_context(path: &Path, context: &str) -> Result<()> {
    let mut config = load(path).await?;
    if config.remove(context) {
        store(path, &config).await?;
        debug!("Removed context {} from {}", context, path.display());
    }
    Ok(())
}
