//! Simulated cloud provider
//!
//! `demo` allocates instances from a [`DemoCloud`] inventory instead of a real
//! cloud API, and installs k3s by recording it on the instance. The inventory
//! lives in memory or in a YAML file, so the full lifecycle can be exercised
//! on one machine.

use super::{FlagSpec, PrepareFailure, Provider, Provisioned, option_or_default};
use crate::install::{InstallContext, Installer, JoinInfo, Manifest};
use crate::{Error, Result};
use anyhow::anyhow;
use async_trait::async_trait;
use cluster_state::{ClusterDescriptor, ClusterIdentity, ClusterInfo, ClusterState, Node, SshSettings};
use futures::lock::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const INSTANCE_TYPES: &[&str] = &["small", "medium", "large"];

/// One simulated instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoInstance {
    /// Instance ID
    pub id: String,
    /// Identity of the owning cluster
    pub cluster: String,
    /// Control-plane role
    pub master: bool,
    /// Public address
    pub public_ip: String,
    /// Private address
    pub private_ip: String,
    /// Instance size
    pub instance_type: String,
    /// Installed k3s role, if any
    #[serde(default)]
    pub k3s: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Inventory {
    next: u32,
    instances: BTreeMap<String, DemoInstance>,
}

/// Shared inventory of simulated instances
#[derive(Debug, Clone, Default)]
pub struct DemoCloud {
    inventory: Arc<Mutex<Inventory>>,
    path: Option<PathBuf>,
}

impl DemoCloud {
    /// In-memory inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Inventory persisted at `path`, loaded if the file exists
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inventory = match async_fs::read_to_string(&path).await {
            Ok(content) => serde_yaml::from_str(&content)
                .map_err(|e| anyhow!("corrupt demo inventory {}: {e}", path.display()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Inventory::default(),
            Err(e) => return Err(anyhow!("reading {}: {e}", path.display()).into()),
        };
        Ok(Self {
            inventory: Arc::new(Mutex::new(inventory)),
            path: Some(path),
        })
    }

    async fn update<R>(&self, f: impl FnOnce(&mut Inventory) -> R + Send) -> Result<R> {
        let mut inventory = self.inventory.lock().await;
        let result = f(&mut inventory);
        if let Some(path) = &self.path {
            let content = serde_yaml::to_string(&*inventory).map_err(anyhow::Error::from)?;
            if let Some(dir) = path.parent() {
                async_fs::create_dir_all(dir).await.map_err(anyhow::Error::from)?;
            }
            async_fs::write(path, content)
                .await
                .map_err(|e| anyhow!("writing {}: {e}", path.display()))?;
        }
        Ok(result)
    }

    /// Start a new instance for `cluster`
    pub async fn allocate(&self, cluster: &str, master: bool, instance_type: &str) -> Result<Node> {
        let cluster = cluster.to_string();
        let instance_type = instance_type.to_string();
        let instance = self
            .update(move |inv| {
                inv.next += 1;
                let n = inv.next;
                let instance = DemoInstance {
                    id: format!("demo-{n:05}"),
                    cluster,
                    master,
                    public_ip: format!("198.51.{}.{}", n / 250, n % 250 + 1),
                    private_ip: format!("10.0.{}.{}", n / 250, n % 250 + 1),
                    instance_type,
                    k3s: None,
                };
                inv.instances.insert(instance.id.clone(), instance.clone());
                instance
            })
            .await?;
        debug!("Allocated demo instance {}", instance.id);
        Ok(Node {
            instance_id: instance.id,
            master,
            public_ip_address: vec![instance.public_ip],
            internal_ip_address: vec![instance.private_ip],
            instance_status: "running".into(),
            rollback: true,
        })
    }

    /// Terminate instances; unknown IDs are ignored
    pub async fn release(&self, ids: &[String]) -> Result<()> {
        let ids = ids.to_vec();
        self.update(move |inv| {
            for id in &ids {
                inv.instances.remove(id);
            }
        })
        .await
    }

    /// Instances tagged with `cluster`
    pub async fn instances_of(&self, cluster: &str) -> Vec<DemoInstance> {
        let inventory = self.inventory.lock().await;
        inventory
            .instances
            .values()
            .filter(|i| i.cluster == cluster)
            .cloned()
            .collect()
    }

    /// Look up one instance
    pub async fn instance(&self, id: &str) -> Option<DemoInstance> {
        self.inventory.lock().await.instances.get(id).cloned()
    }

    async fn set_k3s(&self, id: &str, role: Option<&str>) -> Result<()> {
        let id = id.to_string();
        let role = role.map(str::to_string);
        let found = self
            .update(move |inv| match inv.instances.get_mut(&id) {
                Some(instance) => {
                    instance.k3s = role;
                    true
                }
                None => false,
            })
            .await?;
        if found {
            Ok(())
        } else {
            Err(anyhow!("instance is gone").into())
        }
    }
}

/// Provider allocating from a [`DemoCloud`]
pub struct DemoProvider {
    cloud: DemoCloud,
    descriptor: ClusterDescriptor,
    options: Map<String, Value>,
    masters: Vec<Node>,
    workers: Vec<Node>,
    allocated: Vec<String>,
}

impl DemoProvider {
    /// Provider bound to `cloud`
    pub fn new(cloud: DemoCloud) -> Self {
        Self {
            cloud,
            descriptor: ClusterDescriptor::default(),
            options: Map::new(),
            masters: Vec::new(),
            workers: Vec::new(),
            allocated: Vec::new(),
        }
    }

    fn option(&self, key: &str) -> Option<String> {
        option_or_default(&self.options, &self.option_flags(), key)
    }

    fn quota(&self) -> Option<usize> {
        self.option("max-instances").and_then(|q| q.parse().ok())
    }

    async fn allocate(&mut self, masters: u32, workers: u32) -> std::result::Result<Provisioned, PrepareFailure> {
        let cluster = self.cluster_identity().to_string();
        let instance_type = self.option("instance-type").unwrap_or_else(|| "small".into());
        let quota = self.quota();
        let mut provisioned = Provisioned::default();

        let roles = std::iter::repeat_n(true, masters as usize)
            .chain(std::iter::repeat_n(false, workers as usize));
        for master in roles {
            if quota.is_some_and(|q| provisioned.len() >= q) {
                return Err(PrepareFailure {
                    allocated: provisioned,
                    error: Error::Provider(anyhow!(
                        "instance quota of {} reached for {}",
                        quota.unwrap_or_default(),
                        cluster
                    )),
                });
            }
            match self.cloud.allocate(&cluster, master, &instance_type).await {
                Ok(node) => {
                    self.allocated.push(node.instance_id.clone());
                    if master {
                        provisioned.masters.push(node);
                    } else {
                        provisioned.workers.push(node);
                    }
                }
                Err(error) => {
                    return Err(PrepareFailure {
                        allocated: provisioned,
                        error,
                    });
                }
            }
        }

        info!("[demo] allocated {} instance(s) for {}", provisioned.len(), cluster);
        Ok(provisioned)
    }
}

#[async_trait]
impl Provider for DemoProvider {
    fn name(&self) -> &str {
        "demo"
    }

    fn set_metadata(&mut self, descriptor: &ClusterDescriptor) {
        self.descriptor = descriptor.clone();
    }

    fn metadata(&self) -> &ClusterDescriptor {
        &self.descriptor
    }

    fn options(&self) -> Map<String, Value> {
        let mut options = self.options.clone();
        for flag in self.option_flags() {
            if let (false, Some(default)) = (options.contains_key(&flag.name), flag.default) {
                options.insert(flag.name, Value::String(default));
            }
        }
        options
    }

    fn set_options(&mut self, options: &Map<String, Value>) -> Result<()> {
        if let Some(kind) = options.get("instance-type").and_then(Value::as_str) {
            if !INSTANCE_TYPES.contains(&kind) {
                return Err(Error::InvalidOption(format!(
                    "instance-type must be one of {}",
                    INSTANCE_TYPES.join(", ")
                )));
            }
        }
        if let Some(quota) = options.get("max-instances") {
            let valid = match quota {
                Value::Number(n) => n.as_u64().is_some(),
                Value::String(s) => s.parse::<u64>().is_ok(),
                _ => false,
            };
            if !valid {
                return Err(Error::InvalidOption(
                    "max-instances must be a non-negative integer".into(),
                ));
            }
        }
        for (key, value) in options {
            self.options.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn set_nodes(&mut self, masters: &[Node], workers: &[Node]) {
        self.masters = masters.to_vec();
        self.workers = workers.to_vec();
    }

    fn cluster_identity(&self) -> ClusterIdentity {
        let region = self
            .option("region")
            .unwrap_or_else(|| self.descriptor.region.clone());
        ClusterIdentity::new(&self.descriptor.name, region, "demo")
    }

    async fn create_check(&self, _ssh: &SshSettings) -> Result<()> {
        let cluster = self.cluster_identity().to_string();
        let existing = self.cloud.instances_of(&cluster).await;
        if !existing.is_empty() {
            return Err(Error::InvalidOption(format!(
                "cluster {cluster} already has {} instance(s)",
                existing.len()
            )));
        }
        Ok(())
    }

    async fn prepare(&mut self, _ssh: &SshSettings) -> std::result::Result<Provisioned, PrepareFailure> {
        let (masters, workers) = (self.descriptor.master, self.descriptor.worker);
        self.allocate(masters, workers).await
    }

    async fn prepare_join(
        &mut self,
        _ssh: &SshSettings,
        masters: u32,
        workers: u32,
    ) -> std::result::Result<Provisioned, PrepareFailure> {
        self.allocate(masters, workers).await
    }

    fn installer(&self) -> Option<Arc<dyn Installer>> {
        Some(Arc::new(DemoInstaller {
            cloud: self.cloud.clone(),
        }))
    }

    async fn delete_cluster(&mut self, _force: bool) -> Result<()> {
        let cluster = self.cluster_identity().to_string();
        let ids: Vec<String> = self
            .cloud
            .instances_of(&cluster)
            .await
            .into_iter()
            .map(|i| i.id)
            .collect();
        info!("[demo] terminating {} instance(s) of {}", ids.len(), cluster);
        self.cloud.release(&ids).await
    }

    async fn is_cluster_exist(&self) -> Result<(bool, Vec<String>)> {
        let ids: Vec<String> = self
            .cloud
            .instances_of(&self.cluster_identity().to_string())
            .await
            .into_iter()
            .map(|i| i.id)
            .collect();
        Ok((!ids.is_empty(), ids))
    }

    async fn describe(&self, state: &ClusterState, _kubeconfig: &Path) -> Result<ClusterInfo> {
        let mut info = ClusterInfo::from(state);
        for node in &mut info.nodes {
            node.status = match self.cloud.instance(&node.instance_id).await {
                Some(instance) if instance.k3s.is_some() => "ready".into(),
                Some(_) => "running".into(),
                None => "terminated".into(),
            };
        }
        Ok(info)
    }

    async fn rollback(&mut self) -> Result<()> {
        let ids = std::mem::take(&mut self.allocated);
        info!("[demo] rolling back {} instance(s)", ids.len());
        self.cloud.release(&ids).await
    }

    fn credential_flags(&self) -> Vec<FlagSpec> {
        vec![FlagSpec::new("access-key", "Access key of the demo cloud account").env("DEMO_ACCESS_KEY")]
    }

    fn option_flags(&self) -> Vec<FlagSpec> {
        vec![
            FlagSpec::new("region", "Region the instances run in"),
            FlagSpec::new("instance-type", "Instance size: small, medium or large")
                .default_value("small"),
            FlagSpec::new("max-instances", "Fail provisioning after this many instances"),
        ]
    }
}

/// Installer that records k3s roles on demo instances
struct DemoInstaller {
    cloud: DemoCloud,
}

#[async_trait]
impl Installer for DemoInstaller {
    async fn install_master(
        &self,
        ctx: &InstallContext,
        node: &Node,
        join: Option<&JoinInfo>,
    ) -> Result<JoinInfo> {
        self.cloud.set_k3s(&node.instance_id, Some("server")).await?;
        info!("[{}] k3s server ready on {}", ctx.identity, node.instance_id);
        Ok(match join {
            Some(join) => join.clone(),
            None => {
                let token = ctx
                    .descriptor
                    .token
                    .clone()
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| format!("K10{}", Uuid::new_v4().simple()));
                JoinInfo::new(token, node.internal_address().unwrap_or("127.0.0.1"))
            }
        })
    }

    async fn install_worker(
        &self,
        ctx: &InstallContext,
        node: &Node,
        join: &JoinInfo,
    ) -> Result<()> {
        if join.token.is_empty() {
            return Err(anyhow!("empty join token").into());
        }
        self.cloud.set_k3s(&node.instance_id, Some("agent")).await?;
        info!("[{}] k3s agent ready on {}", ctx.identity, node.instance_id);
        Ok(())
    }

    async fn deploy_manifests(
        &self,
        ctx: &InstallContext,
        _master: &Node,
        manifests: &[Manifest],
    ) -> Result<()> {
        for manifest in manifests {
            debug!("[{}] applied manifest {}", ctx.identity, manifest.name);
        }
        Ok(())
    }

    async fn fetch_kubeconfig(&self, ctx: &InstallContext, master: &Node) -> Result<String> {
        let server = master.address().unwrap_or("127.0.0.1");
        let token = Uuid::new_v4().simple().to_string();
        Ok(format!(
            r#"apiVersion: v1
kind: Config
clusters:
- name: default
  cluster:
    server: https://{server}:6443
    insecure-skip-tls-verify: true
users:
- name: default
  user:
    token: {token}
contexts:
- name: default
  context:
    cluster: default
    user: default
current-context: default
# {}
"#,
            ctx.identity
        ))
    }

    async fn uninstall(&self, _ctx: &InstallContext, node: &Node) -> Result<()> {
        self.cloud.set_k3s(&node.instance_id, None).await
    }
}
