//! Provider for machines that already exist
//!
//! `native` does not allocate anything. Nodes come from the `master-ips` and
//! `worker-ips` options, and teardown means uninstalling k3s over SSH.

use super::{FlagSpec, PrepareFailure, Provider, Provisioned, option_or_default, split_list};
use crate::install::{InstallContext, Installer, SshInstaller};
use crate::{Error, Result};
use async_trait::async_trait;
use cluster_state::{ClusterDescriptor, Node, SshSettings};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Provider backed by a fixed list of hosts
pub struct NativeProvider {
    descriptor: ClusterDescriptor,
    options: Map<String, Value>,
    masters: Vec<Node>,
    workers: Vec<Node>,
    prepared: Vec<Node>,
    installer: SshInstaller,
}

impl Default for NativeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeProvider {
    /// Provider with no hosts configured
    pub fn new() -> Self {
        Self {
            descriptor: ClusterDescriptor::default(),
            options: Map::new(),
            masters: Vec::new(),
            workers: Vec::new(),
            prepared: Vec::new(),
            installer: SshInstaller::new(),
        }
    }

    fn ips(&self, key: &str) -> Vec<String> {
        split_list(option_or_default(&self.options, &self.option_flags(), key).as_deref())
    }

    fn context(&self, ssh: SshSettings) -> InstallContext {
        InstallContext {
            identity: self.cluster_identity(),
            descriptor: self.descriptor.clone(),
            ssh,
        }
    }

    fn known(&self, ip: &str) -> bool {
        self.masters
            .iter()
            .chain(self.workers.iter())
            .any(|n| n.public_ip_address.iter().any(|a| a == ip))
    }

    fn host(ip: &str, master: bool) -> Node {
        Node {
            instance_id: ip.to_string(),
            master,
            public_ip_address: vec![ip.to_string()],
            internal_ip_address: vec![ip.to_string()],
            instance_status: "running".into(),
            rollback: true,
        }
    }

    fn select(&mut self, masters: usize, workers: usize) -> Provisioned {
        let pick = |ips: Vec<String>, count: usize, master: bool, me: &Self| -> Vec<Node> {
            ips.iter()
                .filter(|ip| !me.known(ip))
                .take(count)
                .map(|ip| Self::host(ip, master))
                .collect()
        };
        let provisioned = Provisioned {
            masters: pick(self.ips("master-ips"), masters, true, self),
            workers: pick(self.ips("worker-ips"), workers, false, self),
        };
        self.prepared.extend(
            provisioned
                .masters
                .iter()
                .chain(provisioned.workers.iter())
                .cloned(),
        );
        provisioned
    }
}

#[async_trait]
impl Provider for NativeProvider {
    fn name(&self) -> &str {
        "native"
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
        for (key, value) in options {
            if !value.is_string() && !value.is_null() {
                return Err(Error::InvalidOption(format!(
                    "{key} must be a comma separated list of addresses"
                )));
            }
            self.options.insert(key.clone(), value.clone());
        }
        // Node counts follow the host lists
        self.descriptor.master = self.ips("master-ips").len() as u32;
        self.descriptor.worker = self.ips("worker-ips").len() as u32;
        Ok(())
    }

    fn set_nodes(&mut self, masters: &[Node], workers: &[Node]) {
        self.masters = masters.to_vec();
        self.workers = workers.to_vec();
    }

    async fn create_check(&self, _ssh: &SshSettings) -> Result<()> {
        if self.ips("master-ips").is_empty() {
            return Err(Error::InvalidOption("master-ips is required".into()));
        }
        Ok(())
    }

    async fn prepare(&mut self, _ssh: &SshSettings) -> std::result::Result<Provisioned, PrepareFailure> {
        let provisioned = self.select(usize::MAX, usize::MAX);
        if provisioned.masters.is_empty() {
            return Err(PrepareFailure::empty(Error::InvalidOption(
                "no master host available".into(),
            )));
        }
        Ok(provisioned)
    }

    async fn prepare_join(
        &mut self,
        _ssh: &SshSettings,
        masters: u32,
        workers: u32,
    ) -> std::result::Result<Provisioned, PrepareFailure> {
        let provisioned = self.select(masters as usize, workers as usize);
        if provisioned.is_empty() {
            return Err(PrepareFailure::empty(Error::InvalidOption(
                "no new hosts in master-ips or worker-ips".into(),
            )));
        }
        Ok(provisioned)
    }

    async fn delete_cluster(&mut self, force: bool) -> Result<()> {
        let ctx = self.context(self.descriptor.ssh.or(&self.ssh_defaults()));
        let nodes: Vec<Node> = self.masters.iter().chain(self.workers.iter()).cloned().collect();
        // Agents first so masters do not see them disappear one by one
        for node in nodes.iter().rev() {
            if let Err(e) = self.installer.uninstall(&ctx, node).await {
                if !force {
                    return Err(e);
                }
                warn!("[native] ignoring uninstall failure on {}: {}", node.instance_id, e);
            }
        }
        Ok(())
    }

    async fn is_cluster_exist(&self) -> Result<(bool, Vec<String>)> {
        let ids = self
            .masters
            .iter()
            .chain(self.workers.iter())
            .map(|n| n.instance_id.clone())
            .collect();
        Ok((true, ids))
    }

    async fn rollback(&mut self) -> Result<()> {
        let ctx = self.context(self.descriptor.ssh.or(&self.ssh_defaults()));
        let nodes = std::mem::take(&mut self.prepared);
        info!("[native] rolling back k3s on {} host(s)", nodes.len());
        for node in &nodes {
            if let Err(e) = self.installer.uninstall(&ctx, node).await {
                warn!("[native] rollback on {} failed: {}", node.instance_id, e);
            }
        }
        Ok(())
    }

    fn option_flags(&self) -> Vec<FlagSpec> {
        vec![
            FlagSpec::new("master-ips", "Comma separated addresses of server hosts")
                .required(),
            FlagSpec::new("worker-ips", "Comma separated addresses of agent hosts"),
        ]
    }

    fn usage_example(&self) -> String {
        "k3sctl create --provider native --name edge --master-ips 192.168.1.10 --worker-ips 192.168.1.11,192.168.1.12".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> NativeProvider {
        let mut p = NativeProvider::new();
        p.set_metadata(&ClusterDescriptor::new("edge", "native"));
        let mut options = Map::new();
        options.insert("master-ips".into(), json!("192.168.1.10"));
        options.insert("worker-ips".into(), json!("192.168.1.11, 192.168.1.12"));
        p.set_options(&options).unwrap();
        p
    }

    #[test]
    fn test_counts_follow_host_lists() {
        let p = provider();
        assert_eq!(p.metadata().master, 1);
        assert_eq!(p.metadata().worker, 2);
        assert_eq!(p.cluster_identity().to_string(), "edge..native");
    }

    #[smol_potat::test]
    async fn test_prepare_maps_hosts() {
        let mut p = provider();
        let nodes = p.prepare(&SshSettings::default()).await.unwrap();
        assert_eq!(nodes.masters[0].instance_id, "192.168.1.10");
        assert!(nodes.masters[0].master);
        assert_eq!(nodes.workers.len(), 2);
        assert!(nodes.workers.iter().all(|n| n.rollback && !n.master));
    }

    #[smol_potat::test]
    async fn test_join_skips_known_hosts() {
        let mut p = provider();
        let existing = p.prepare(&SshSettings::default()).await.unwrap();
        p.set_nodes(&existing.masters, &existing.workers);

        let mut options = Map::new();
        options.insert("worker-ips".into(), json!("192.168.1.11,192.168.1.13"));
        p.set_options(&options).unwrap();

        let added = p.prepare_join(&SshSettings::default(), 0, 5).await.unwrap();
        assert!(added.masters.is_empty());
        assert_eq!(added.workers.len(), 1);
        assert_eq!(added.workers[0].instance_id, "192.168.1.13");
    }

    #[smol_potat::test]
    async fn test_create_check_requires_masters() {
        let p = NativeProvider::new();
        assert!(matches!(
            p.create_check(&SshSettings::default()).await,
            Err(Error::InvalidOption(_))
        ));
    }
}
