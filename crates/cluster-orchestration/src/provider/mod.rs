//! Provider capability
//!
//! A provider realizes compute instances for a cluster on one backend (a
//! cloud, or a list of existing machines). The orchestrator treats it as a
//! black box: it hands over the descriptor, asks for nodes, and asks for
//! teardown. One provider value serves one workflow.

pub mod demo;
pub mod native;
pub mod registry;

pub use demo::{DemoCloud, DemoProvider};
pub use native::NativeProvider;
pub use registry::{ProviderFactory, ProviderRegistry};

use crate::{Error, Result, install::Installer, install::Manifest};
use async_trait::async_trait;
use cluster_state::{
    ClusterDescriptor, ClusterIdentity, ClusterInfo, ClusterState, Node, SshSettings,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Nodes handed out by a provider, masters first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provisioned {
    /// Control-plane nodes
    pub masters: Vec<Node>,
    /// Worker nodes
    pub workers: Vec<Node>,
}

impl Provisioned {
    /// Number of nodes
    pub fn len(&self) -> usize {
        self.masters.len() + self.workers.len()
    }

    /// Whether no node was allocated
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Provisioning error together with whatever was allocated before it
#[derive(Debug)]
pub struct PrepareFailure {
    /// Instances that exist despite the failure
    pub allocated: Provisioned,
    /// The failure itself
    pub error: Error,
}

impl PrepareFailure {
    /// Failure before anything was allocated
    pub fn empty(error: Error) -> Self {
        Self {
            allocated: Provisioned::default(),
            error,
        }
    }
}

/// Command-line or form field accepted by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSpec {
    /// Flag name without dashes, also the option key
    pub name: String,
    /// Help text
    pub usage: String,
    /// Environment variable supplying the value
    pub env: Option<String>,
    /// Must be given on the command line
    pub required: bool,
    /// Default value
    pub default: Option<String>,
}

impl FlagSpec {
    /// Optional flag without env binding or default
    pub fn new(name: impl Into<String>, usage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            usage: usage.into(),
            env: None,
            required: false,
            default: None,
        }
    }

    /// Bind to an environment variable
    pub fn env(mut self, var: impl Into<String>) -> Self {
        self.env = Some(var.into());
        self
    }

    /// Mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set a default value
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Polymorphic backend interface
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry name of this provider
    fn name(&self) -> &str;

    /// Replace the descriptor this provider acts on
    fn set_metadata(&mut self, descriptor: &ClusterDescriptor);

    /// Current descriptor
    fn metadata(&self) -> &ClusterDescriptor;

    /// Provider options, including defaults the caller did not set
    fn options(&self) -> Map<String, Value>;

    /// Validate and store provider options
    fn set_options(&mut self, options: &Map<String, Value>) -> Result<()>;

    /// Nodes of an existing cluster, for delete, join and existence checks
    fn set_nodes(&mut self, masters: &[Node], workers: &[Node]);

    /// Identity of the cluster described by the current metadata
    fn cluster_identity(&self) -> ClusterIdentity {
        self.metadata().identity()
    }

    /// SSH parameters used when the caller sets none
    fn ssh_defaults(&self) -> SshSettings {
        SshSettings {
            user: Some("root".into()),
            port: Some(22),
            ..Default::default()
        }
    }

    /// Pre-flight validation before anything is persisted
    async fn create_check(&self, ssh: &SshSettings) -> Result<()>;

    /// Allocate `master + worker` instances
    async fn prepare(&mut self, ssh: &SshSettings) -> std::result::Result<Provisioned, PrepareFailure>;

    /// Allocate additional instances for an existing cluster
    async fn prepare_join(
        &mut self,
        ssh: &SshSettings,
        masters: u32,
        workers: u32,
    ) -> std::result::Result<Provisioned, PrepareFailure>;

    /// Extra manifests applied after install
    fn manifests(&self) -> Vec<Manifest> {
        Vec::new()
    }

    /// Installer to use instead of the orchestrator's own
    fn installer(&self) -> Option<Arc<dyn Installer>> {
        None
    }

    /// Tear down the backing infrastructure
    async fn delete_cluster(&mut self, force: bool) -> Result<()>;

    /// Whether the infrastructure still exists, with the instance IDs found
    async fn is_cluster_exist(&self) -> Result<(bool, Vec<String>)>;

    /// Live view of the cluster
    async fn describe(&self, state: &ClusterState, _kubeconfig: &Path) -> Result<ClusterInfo> {
        Ok(ClusterInfo::from(state))
    }

    /// Release whatever the current workflow allocated
    async fn rollback(&mut self) -> Result<()>;

    /// Credential flags (persisted per provider)
    fn credential_flags(&self) -> Vec<FlagSpec> {
        Vec::new()
    }

    /// Provider option flags
    fn option_flags(&self) -> Vec<FlagSpec> {
        Vec::new()
    }

    /// Example command line for help output
    fn usage_example(&self) -> String {
        format!("k3sctl create --provider {} --name <name> --master 1", self.name())
    }
}

/// Read a string option, falling back to the flag default
pub(crate) fn option_or_default(
    options: &Map<String, Value>,
    flags: &[FlagSpec],
    key: &str,
) -> Option<String> {
    match options.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => flags
            .iter()
            .find(|f| f.name == key)
            .and_then(|f| f.default.clone()),
    }
}

/// Split a comma separated list option
pub(crate) fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_option_lookup_falls_back_to_default() {
        let flags = vec![
            FlagSpec::new("instance-type", "size").default_value("small"),
            FlagSpec::new("max-instances", "quota"),
        ];
        let mut options = Map::new();
        options.insert("max-instances".into(), json!(3));

        assert_eq!(
            option_or_default(&options, &flags, "instance-type").as_deref(),
            Some("small")
        );
        assert_eq!(
            option_or_default(&options, &flags, "max-instances").as_deref(),
            Some("3")
        );
        assert_eq!(option_or_default(&options, &flags, "zone"), None);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(Some(" 10.0.0.1, 10.0.0.2,,")),
            vec!["10.0.0.1", "10.0.0.2"]
        );
        assert!(split_list(None).is_empty());
    }
}
