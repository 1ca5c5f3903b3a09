//! Data models for cluster state records

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default k3s release channel
pub const DEFAULT_K3S_CHANNEL: &str = "stable";

/// Default k3s install script location
pub const DEFAULT_INSTALL_SCRIPT: &str = "https://get.k3s.io";

/// Default pod network CIDR
pub const DEFAULT_CLUSTER_CIDR: &str = "10.42.0.0/16";

/// SSH connection parameters used to reach cluster nodes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Login user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// SSH port (22 when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Path to the private key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    /// Passphrase for the private key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_passphrase: Option<String>,
    /// Path to an SSH certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<String>,
    /// Password authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Use the local ssh-agent
    pub agent_auth: bool,
}

impl SshSettings {
    /// Fill every unset field from `defaults`; fields already set are kept.
    pub fn or(&self, defaults: &SshSettings) -> SshSettings {
        SshSettings {
            user: pick(&self.user, &defaults.user),
            port: self.port.or(defaults.port),
            key_path: pick(&self.key_path, &defaults.key_path),
            key_passphrase: pick(&self.key_passphrase, &defaults.key_passphrase),
            cert_path: pick(&self.cert_path, &defaults.cert_path),
            password: pick(&self.password, &defaults.password),
            agent_auth: self.agent_auth || defaults.agent_auth,
        }
    }
}

/// Returns `preferred` when it holds a non-empty value, otherwise `fallback`.
pub(crate) fn pick(preferred: &Option<String>, fallback: &Option<String>) -> Option<String> {
    match preferred {
        Some(value) if !value.is_empty() => Some(value.clone()),
        _ => fallback.clone(),
    }
}

/// Caller-supplied description of a cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterDescriptor {
    /// Cluster name
    pub name: String,
    /// Provider backend name
    pub provider: String,
    /// Region or equivalent qualifier, empty when the provider has none
    pub region: String,
    /// SSH connection parameters
    pub ssh: SshSettings,
    /// Pinned k3s version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k3s_version: Option<String>,
    /// k3s release channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k3s_channel: Option<String>,
    /// Install script URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_script: Option<String>,
    /// Number of master nodes
    pub master: u32,
    /// Number of worker nodes
    pub worker: u32,
    /// Extra arguments for `k3s server`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_extra_args: Option<String>,
    /// Extra arguments for `k3s agent`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_extra_args: Option<String>,
    /// Private registry configuration (path to registries.yaml)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    /// External datastore endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datastore: Option<String>,
    /// Cluster join token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Public IP of an existing server to join
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Pod network CIDR
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_cidr: Option<String>,
    /// Deploy the dashboard UI
    pub ui: bool,
    /// Deploy the provider's cloud controller manager
    pub cloud_controller_manager: bool,
    /// HA mode with embedded etcd
    pub cluster: bool,
    /// Provider-specific options
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl ClusterDescriptor {
    /// Create a descriptor with a name and provider and everything else unset
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            ..Default::default()
        }
    }

    /// Identity derived from name, region and provider
    pub fn identity(&self) -> ClusterIdentity {
        ClusterIdentity::new(&self.name, &self.region, &self.provider)
    }

    /// Fill channel, install script and CIDR when the caller left them empty
    pub fn apply_defaults(&mut self) {
        fill(&mut self.k3s_channel, DEFAULT_K3S_CHANNEL);
        fill(&mut self.install_script, DEFAULT_INSTALL_SCRIPT);
        fill(&mut self.cluster_cidr, DEFAULT_CLUSTER_CIDR);
    }

    /// Read a provider option as a string
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }
}

fn fill(field: &mut Option<String>, default: &str) {
    if field.as_deref().is_none_or(str::is_empty) {
        *field = Some(default.to_string());
    }
}

/// Unique key of a cluster: `{name}.{region}.{provider}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterIdentity {
    /// Cluster name
    pub name: String,
    /// Region qualifier, possibly empty
    pub region: String,
    /// Provider name
    pub provider: String,
}

impl ClusterIdentity {
    /// Build an identity from its parts without validation
    pub fn new(
        name: impl Into<String>,
        region: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            provider: provider.into(),
        }
    }

    /// Check that name and provider are present and no part uses reserved characters
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidIdentity("cluster name is required".into()));
        }
        if self.provider.is_empty() {
            return Err(Error::InvalidIdentity("provider is required".into()));
        }
        for (field, value) in [
            ("name", &self.name),
            ("region", &self.region),
            ("provider", &self.provider),
        ] {
            if let Some(c) = value
                .chars()
                .find(|c| matches!(c, '.' | '_' | '/' | '\\') || c.is_whitespace())
            {
                return Err(Error::InvalidIdentity(format!(
                    "{field} {value:?} contains reserved character {c:?}"
                )));
            }
        }
        Ok(())
    }

    /// File name of the record holding this identity in the given status
    pub fn record_name(&self, status: Status) -> String {
        format!("{}_{}", self, status.suffix())
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.name, self.region, self.provider)
    }
}

impl FromStr for ClusterIdentity {
    type Err = Error;

    /// Accepts `name.region.provider` and the short form `name.provider`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        let identity = match parts.as_slice() {
            [name, provider] => ClusterIdentity::new(*name, "", *provider),
            [name, region, provider] => ClusterIdentity::new(*name, *region, *provider),
            _ => return Err(Error::InvalidIdentity(s.to_string())),
        };
        identity.validate()?;
        Ok(identity)
    }
}

/// Split a record file name into identity and status.
///
/// Returns `None` for temporary files and anything that is not a record.
pub fn parse_record_name(file_name: &str) -> Option<(ClusterIdentity, Status)> {
    if file_name.starts_with('.') {
        return None;
    }
    let (id, suffix) = file_name.rsplit_once('_')?;
    let status = Status::from_suffix(suffix)?;
    let identity = id.parse().ok()?;
    Some((identity, status))
}

/// Lifecycle status of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Intent persisted, infrastructure being provisioned
    Creating,
    /// Cluster is up
    Running,
    /// A workflow failed; record kept for inspection
    Failed,
    /// Nodes are being added
    Join,
    /// Cluster is being upgraded
    Upgrading,
}

impl Status {
    /// Suffix used in record file names
    pub fn suffix(self) -> &'static str {
        match self {
            Status::Creating => "Creating",
            Status::Running => "Running",
            Status::Failed => "Failed",
            Status::Join | Status::Upgrading => "Join",
        }
    }

    /// Parse a record file suffix
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "Creating" => Some(Status::Creating),
            "Running" => Some(Status::Running),
            "Failed" => Some(Status::Failed),
            "Join" => Some(Status::Join),
            _ => None,
        }
    }

    /// Whether a workflow is still driving this record
    pub fn is_transient(self) -> bool {
        matches!(self, Status::Creating | Status::Join | Status::Upgrading)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Creating => "creating",
            Status::Running => "running",
            Status::Failed => "failed",
            Status::Join => "join",
            Status::Upgrading => "upgrading",
        };
        f.write_str(s)
    }
}

/// One provisioned compute instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    /// Provider-assigned instance ID
    pub instance_id: String,
    /// Control-plane role
    pub master: bool,
    /// Public addresses
    pub public_ip_address: Vec<String>,
    /// Private addresses
    pub internal_ip_address: Vec<String>,
    /// Provider-reported instance status
    pub instance_status: String,
    /// Allocated by the workflow currently running
    pub rollback: bool,
}

impl Node {
    /// Address used to reach the node over SSH, public first
    pub fn address(&self) -> Option<&str> {
        self.public_ip_address
            .first()
            .or_else(|| self.internal_ip_address.first())
            .map(String::as_str)
    }

    /// Address other nodes use to reach this one, private first
    pub fn internal_address(&self) -> Option<&str> {
        self.internal_ip_address
            .first()
            .or_else(|| self.public_ip_address.first())
            .map(String::as_str)
    }
}

/// Persisted record of a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    /// Lookup key
    pub identity: ClusterIdentity,
    /// Descriptor snapshot
    pub descriptor: ClusterDescriptor,
    /// Lifecycle status
    pub status: Status,
    /// Control-plane nodes in install order
    #[serde(default)]
    pub master_nodes: Vec<Node>,
    /// Worker nodes in install order
    #[serde(default)]
    pub worker_nodes: Vec<Node>,
    /// When the record was first written
    pub created_at: DateTime<Utc>,
    /// Last modification
    pub updated_at: DateTime<Utc>,
}

impl ClusterState {
    /// New record for `descriptor` with no nodes
    pub fn new(descriptor: ClusterDescriptor, status: Status) -> Self {
        let now = Utc::now();
        Self {
            identity: descriptor.identity(),
            descriptor,
            status,
            master_nodes: Vec::new(),
            worker_nodes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// String form of the identity
    pub fn id(&self) -> String {
        self.identity.to_string()
    }

    /// Change status and bump the modification time
    pub fn set_status(&mut self, status: Status) {
        self.status = status;
        self.touch();
    }

    /// Bump the modification time
    pub fn touch(&mut self) {
        // Keep ordering strict for records rewritten within the same clock tick
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::microseconds(1)
        };
    }

    /// All nodes, masters first
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.master_nodes.iter().chain(self.worker_nodes.iter())
    }

    /// Clear the rollback marker on every node
    pub fn commit_nodes(&mut self) {
        for node in self
            .master_nodes
            .iter_mut()
            .chain(self.worker_nodes.iter_mut())
        {
            node.rollback = false;
        }
    }

    /// File name of this record
    pub fn record_name(&self) -> String {
        self.identity.record_name(self.status)
    }
}

/// Node line of a cluster listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Instance ID
    pub instance_id: String,
    /// `master` or `worker`
    pub role: String,
    /// Public address
    pub external_ip: Vec<String>,
    /// Private address
    pub internal_ip: Vec<String>,
    /// Instance status as reported by the provider
    pub status: String,
    /// Kubelet version when known
    pub version: Option<String>,
}

impl From<&Node> for NodeInfo {
    fn from(node: &Node) -> Self {
        NodeInfo {
            instance_id: node.instance_id.clone(),
            role: if node.master { "master" } else { "worker" }.to_string(),
            external_ip: node.public_ip_address.clone(),
            internal_ip: node.internal_ip_address.clone(),
            status: node.instance_status.clone(),
            version: None,
        }
    }
}

/// Listing view of a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Identity string
    pub id: String,
    /// Cluster name
    pub name: String,
    /// Region qualifier
    pub region: String,
    /// Provider name
    pub provider: String,
    /// Lifecycle status
    pub status: Status,
    /// Number of masters
    pub master: usize,
    /// Number of workers
    pub worker: usize,
    /// k3s version or channel
    pub version: String,
    /// Per-node details
    pub nodes: Vec<NodeInfo>,
}

impl From<&ClusterState> for ClusterInfo {
    fn from(state: &ClusterState) -> Self {
        let d = &state.descriptor;
        let version = d
            .k3s_version
            .clone()
            .filter(|v| !v.is_empty())
            .or_else(|| d.k3s_channel.clone())
            .unwrap_or_default();
        ClusterInfo {
            id: state.id(),
            name: state.identity.name.clone(),
            region: state.identity.region.clone(),
            provider: state.identity.provider.clone(),
            status: state.status,
            master: state.master_nodes.len(),
            worker: state.worker_nodes.len(),
            version,
            nodes: state.nodes().map(NodeInfo::from).collect(),
        }
    }
}
