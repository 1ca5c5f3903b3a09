//! Test doubles for orchestration workflows
//!
//! [`ScriptedCloud`] backs a provider whose behaviour tests can steer, and
//! [`RecordingInstaller`] records every install step instead of running it.

use crate::install::{InstallContext, Installer, JoinInfo, Manifest};
use crate::provider::{PrepareFailure, Provider, ProviderRegistry, Provisioned};
use crate::{Error, Result};
use anyhow::anyhow;
use async_trait::async_trait;
use cluster_state::{ClusterDescriptor, Node, SshSettings};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};

/// Knobs and observations of a [`ScriptedCloud`]
#[derive(Debug, Default)]
pub struct Script {
    /// Fail `prepare` once this many instances were allocated
    pub fail_after: Option<usize>,
    /// Report the infrastructure as gone
    pub gone: bool,
    /// Fail the existence check
    pub fail_exists: bool,
    /// Fail `delete_cluster`
    pub fail_delete: bool,
    /// Provider calls in order
    pub calls: Vec<String>,
    /// Instances currently allocated
    pub instances: Vec<String>,
    next: u32,
}

/// Shared state behind every [`ScriptedProvider`] built from one registry
#[derive(Debug, Clone, Default)]
pub struct ScriptedCloud {
    script: Arc<Mutex<Script>>,
}

impl ScriptedCloud {
    /// Fresh cloud that succeeds at everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect or change the script
    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Provider calls so far
    pub fn calls(&self) -> Vec<String> {
        self.script().calls.clone()
    }

    /// How often `call` was made
    pub fn count(&self, call: &str) -> usize {
        self.script().calls.iter().filter(|c| *c == call).count()
    }

    /// Registry exposing this cloud as the `scripted` provider
    pub fn registry(&self) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        let cloud = self.clone();
        registry.register(
            "scripted",
            Arc::new(move || Box::new(ScriptedProvider::new(cloud.clone())) as Box<dyn Provider>),
        );
        registry
    }

    fn record(&self, call: &str) {
        self.script().calls.push(call.to_string());
    }
}

/// Provider driven by a [`ScriptedCloud`]
pub struct ScriptedProvider {
    cloud: ScriptedCloud,
    descriptor: ClusterDescriptor,
    options: Map<String, Value>,
    allocated: Vec<String>,
}

impl ScriptedProvider {
    /// Provider bound to `cloud`
    pub fn new(cloud: ScriptedCloud) -> Self {
        Self {
            cloud,
            descriptor: ClusterDescriptor::default(),
            options: Map::new(),
            allocated: Vec::new(),
        }
    }

    fn allocate(&mut self, masters: u32, workers: u32) -> std::result::Result<Provisioned, PrepareFailure> {
        let mut provisioned = Provisioned::default();
        let roles = std::iter::repeat_n(true, masters as usize)
            .chain(std::iter::repeat_n(false, workers as usize));
        for master in roles {
            let mut script = self.cloud.script();
            if script.fail_after.is_some_and(|n| script.instances.len() >= n) {
                return Err(PrepareFailure {
                    allocated: provisioned,
                    error: Error::Provider(anyhow!("capacity exhausted")),
                });
            }
            script.next += 1;
            let n = script.next;
            let id = format!("i-{n}");
            script.instances.push(id.clone());
            drop(script);

            self.allocated.push(id.clone());
            let node = Node {
                instance_id: id,
                master,
                public_ip_address: vec![format!("203.0.113.{n}")],
                internal_ip_address: vec![format!("10.0.0.{n}")],
                instance_status: "running".into(),
                rollback: true,
            };
            if master {
                provisioned.masters.push(node);
            } else {
                provisioned.workers.push(node);
            }
        }
        Ok(provisioned)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn set_metadata(&mut self, descriptor: &ClusterDescriptor) {
        self.descriptor = descriptor.clone();
    }

    fn metadata(&self) -> &ClusterDescriptor {
        &self.descriptor
    }

    fn options(&self) -> Map<String, Value> {
        self.options.clone()
    }

    fn set_options(&mut self, options: &Map<String, Value>) -> Result<()> {
        self.options.extend(options.clone());
        Ok(())
    }

    fn set_nodes(&mut self, _masters: &[Node], _workers: &[Node]) {}

    async fn create_check(&self, _ssh: &SshSettings) -> Result<()> {
        self.cloud.record("create_check");
        Ok(())
    }

    async fn prepare(&mut self, _ssh: &SshSettings) -> std::result::Result<Provisioned, PrepareFailure> {
        self.cloud.record("prepare");
        let (masters, workers) = (self.descriptor.master, self.descriptor.worker);
        self.allocate(masters, workers)
    }

    async fn prepare_join(
        &mut self,
        _ssh: &SshSettings,
        masters: u32,
        workers: u32,
    ) -> std::result::Result<Provisioned, PrepareFailure> {
        self.cloud.record("prepare_join");
        self.allocate(masters, workers)
    }

    async fn delete_cluster(&mut self, _force: bool) -> Result<()> {
        self.cloud.record("delete_cluster");
        let mut script = self.cloud.script();
        if script.fail_delete {
            return Err(anyhow!("delete refused").into());
        }
        script.instances.clear();
        Ok(())
    }

    async fn is_cluster_exist(&self) -> Result<(bool, Vec<String>)> {
        self.cloud.record("is_cluster_exist");
        let script = self.cloud.script();
        if script.fail_exists {
            return Err(anyhow!("credentials expired").into());
        }
        Ok((!script.gone, script.instances.clone()))
    }

    async fn rollback(&mut self) -> Result<()> {
        self.cloud.record("rollback");
        let ids = std::mem::take(&mut self.allocated);
        self.cloud.script().instances.retain(|i| !ids.contains(i));
        Ok(())
    }
}

/// Installer that records each step as `step:instance`
#[derive(Debug, Clone, Default)]
pub struct RecordingInstaller {
    calls: Arc<Mutex<Vec<String>>>,
    fail_on: Arc<Mutex<Option<String>>>,
}

impl RecordingInstaller {
    /// Installer that succeeds everywhere
    pub fn new() -> Self {
        Self::default()
    }

    /// Make installs on `instance_id` fail
    pub fn fail_on(&self, instance_id: &str) {
        *self.fail_on.lock().unwrap_or_else(|e| e.into_inner()) = Some(instance_id.to_string());
    }

    /// Steps so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn step(&self, step: &str, node: &Node) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("{step}:{}", node.instance_id));
        let fail_on = self.fail_on.lock().unwrap_or_else(|e| e.into_inner());
        if fail_on.as_deref() == Some(node.instance_id.as_str()) {
            return Err(anyhow!("install on {} failed", node.instance_id).into());
        }
        Ok(())
    }
}

#[async_trait]
impl Installer for RecordingInstaller {
    async fn install_master(
        &self,
        _ctx: &InstallContext,
        node: &Node,
        join: Option<&JoinInfo>,
    ) -> Result<JoinInfo> {
        self.step("master", node)?;
        Ok(match join {
            Some(join) => join.clone(),
            None => JoinInfo::new("K10test", node.internal_address().unwrap_or_default()),
        })
    }

    async fn install_worker(&self, _ctx: &InstallContext, node: &Node, _join: &JoinInfo) -> Result<()> {
        self.step("worker", node)
    }

    async fn deploy_manifests(
        &self,
        _ctx: &InstallContext,
        master: &Node,
        manifests: &[Manifest],
    ) -> Result<()> {
        for manifest in manifests {
            self.step(&format!("manifest {}", manifest.name), master)?;
        }
        Ok(())
    }

    async fn fetch_kubeconfig(&self, _ctx: &InstallContext, master: &Node) -> Result<String> {
        self.step("kubeconfig", master)?;
        let server = master.address().unwrap_or_default();
        Ok(format!(
            "apiVersion: v1\nkind: Config\nclusters:\n- name: default\n  cluster:\n    server: https://{server}:6443\nusers:\n- name: default\n  user:\n    token: test\ncontexts:\n- name: default\n  context:\n    cluster: default\n    user: default\ncurrent-context: default\n"
        ))
    }

    async fn uninstall(&self, _ctx: &InstallContext, node: &Node) -> Result<()> {
        self.step("uninstall", node)
    }
}
