//! Cluster lifecycle workflows

use crate::config::OrchestratorConfig;
use crate::events::ClusterWatch;
use crate::install::{InstallContext, Installer, JoinInfo, UI_PORT, ui_manifest};
use crate::kubeconfig;
use crate::provider::{Provider, ProviderRegistry, option_or_default};
use crate::{Error, Result};
use anyhow::anyhow;
use cluster_state::{
    ClusterDescriptor, ClusterIdentity, ClusterInfo, ClusterState, Node, SshSettings, StateStore,
    Status, merge_into,
};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Asks the user to approve a destructive action
pub trait Confirm: Sync {
    /// Whether the action described by `prompt` may go ahead
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool + Sync,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Result of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Infrastructure, context and record are gone
    Deleted,
    /// The user declined; nothing changed
    Cancelled,
    /// No record existed and `force` was set
    NotFound,
}

/// What a successful create hands back to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSummary {
    /// Cluster identity
    pub id: String,
    /// Kubeconfig context added for the cluster
    pub context: String,
    /// Dashboard address when the UI was deployed
    pub ui_url: Option<String>,
    /// UI deployed behind the provider's load balancer
    pub ui_via_load_balancer: bool,
}

impl fmt::Display for CreateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cluster {} is running", self.id)?;
        write!(f, "Use `kubectl config use-context {}` to reach it", self.context)?;
        if let Some(url) = &self.ui_url {
            write!(f, "\nDashboard: {url}")?;
        } else if self.ui_via_load_balancer {
            write!(
                f,
                "\nDashboard: run `kubectl get svc -n kubernetes-dashboard` for the load balancer address"
            )?;
        }
        Ok(())
    }
}

struct InflightGuard {
    set: Arc<Mutex<HashSet<ClusterIdentity>>>,
    identity: ClusterIdentity,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.identity);
    }
}

/// Runs create, join, delete and list against one state store
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    registry: ProviderRegistry,
    store: Arc<dyn StateStore>,
    installer: Arc<dyn Installer>,
    inflight: Arc<Mutex<HashSet<ClusterIdentity>>>,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(
        config: OrchestratorConfig,
        registry: ProviderRegistry,
        store: Arc<dyn StateStore>,
        installer: Arc<dyn Installer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            store,
            installer,
            inflight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Paths in use
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Provider registry
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    fn claim(&self, identity: &ClusterIdentity) -> Result<InflightGuard> {
        let mut set = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(identity.clone()) {
            return Err(Error::Conflict(format!(
                "another operation on {identity} is in progress"
            )));
        }
        Ok(InflightGuard {
            set: self.inflight.clone(),
            identity: identity.clone(),
        })
    }

    fn is_inflight(&self, identity: &ClusterIdentity) -> bool {
        let set = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        set.contains(identity)
    }

    /// Build a provider that knows the stored cluster and its nodes
    fn provider_for(&self, state: &ClusterState) -> Result<Box<dyn Provider>> {
        let mut provider = self.registry.build(&state.identity.provider)?;
        provider.set_metadata(&state.descriptor);
        provider.set_options(&state.descriptor.options)?;
        provider.set_nodes(&state.master_nodes, &state.worker_nodes);
        Ok(provider)
    }

    /// Find the stored record a request refers to. Without a region the
    /// name must be unique under the provider.
    async fn locate(&self, identity: &ClusterIdentity) -> Result<ClusterState> {
        if identity.region.is_empty() {
            Ok(self.store.find(&identity.name, &identity.provider).await?)
        } else {
            Ok(self.store.get(identity).await?)
        }
    }

    /// Validate a create request and persist it as `Creating`.
    ///
    /// Nothing is allocated yet; call [`PendingCreate::run`] to provision.
    /// Errors here leave no record behind.
    pub async fn start_create(&self, descriptor: ClusterDescriptor) -> Result<PendingCreate> {
        let mut provider = self.registry.build(&descriptor.provider)?;

        let mut requested = descriptor;
        requested.apply_defaults();
        provider.set_metadata(&requested);
        provider.set_options(&requested.options)?;

        let mut descriptor = provider.metadata().clone();
        descriptor.options = provider.options();
        let mut flags = provider.credential_flags();
        flags.extend(provider.option_flags());
        for flag in flags.iter().filter(|f| f.required) {
            if option_or_default(&descriptor.options, &[], &flag.name).is_none() {
                return Err(Error::InvalidOption(format!(
                    "option {} is required by provider {}",
                    flag.name,
                    provider.name()
                )));
            }
        }
        if descriptor.master < 1 {
            return Err(Error::InvalidOption("at least one master is required".into()));
        }
        let identity = provider.cluster_identity();
        identity.validate()?;
        descriptor.region = identity.region.clone();
        provider.set_metadata(&descriptor);

        if descriptor.ip.as_deref().is_some_and(|ip| !ip.is_empty())
            && descriptor.token.as_deref().is_none_or(str::is_empty)
        {
            return Err(Error::InvalidOption(
                "joining an existing server requires a token".into(),
            ));
        }

        let ssh = descriptor.ssh.or(&provider.ssh_defaults());
        let guard = self.claim(&identity)?;
        if self.store.exists(&identity).await? {
            return Err(Error::Conflict(format!("cluster {identity} already exists")));
        }
        provider.create_check(&ssh).await.map_err(|e| match e {
            Error::InvalidOption(_) => e,
            other => Error::InvalidOption(other.to_string()),
        })?;

        let state = ClusterState::new(descriptor, Status::Creating);
        self.store.create(&state).await?;
        info!("[{}] cluster record created", identity);

        Ok(PendingCreate {
            orchestrator: self.clone(),
            provider,
            state,
            ssh,
            _guard: guard,
        })
    }

    /// Create a cluster and wait for it to reach `Running`
    pub async fn create(&self, descriptor: ClusterDescriptor) -> Result<CreateSummary> {
        self.start_create(descriptor).await?.run().await
    }

    /// Validate a join request and mark the cluster as joining.
    ///
    /// `overrides.master` and `overrides.worker` are the numbers of nodes
    /// to add.
    pub async fn start_join(&self, overrides: ClusterDescriptor) -> Result<PendingJoin> {
        let mut provider = self.registry.build(&overrides.provider)?;
        provider.set_metadata(&overrides);
        provider.set_options(&overrides.options)?;
        let (masters, workers) = (provider.metadata().master, provider.metadata().worker);
        if masters == 0 && workers == 0 {
            return Err(Error::InvalidOption(
                "nothing to join: set master or worker".into(),
            ));
        }

        let located = self.locate(&provider.cluster_identity()).await?;
        let guard = self.claim(&located.identity)?;
        // the record may have changed before the claim
        let stored = self.store.get(&located.identity).await?;
        if stored.status != Status::Running {
            return Err(Error::InvalidOption(format!(
                "cluster {} is {}, only running clusters can be joined",
                stored.identity, stored.status
            )));
        }

        let mut state = merge_into(&stored, &overrides);
        provider.set_metadata(&state.descriptor);
        provider.set_options(&state.descriptor.options)?;
        provider.set_nodes(&state.master_nodes, &state.worker_nodes);
        let ssh = state.descriptor.ssh.or(&provider.ssh_defaults());

        state.set_status(Status::Join);
        self.store.save(&state).await?;
        info!(
            "[{}] joining {} master(s) and {} worker(s)",
            state.identity, masters, workers
        );

        Ok(PendingJoin {
            orchestrator: self.clone(),
            provider,
            state,
            ssh,
            masters,
            workers,
            _guard: guard,
        })
    }

    /// Add nodes to a running cluster and wait for them
    pub async fn join(&self, overrides: ClusterDescriptor) -> Result<ClusterInfo> {
        self.start_join(overrides).await?.run().await
    }

    /// Delete the cluster `overrides` names.
    ///
    /// Without `force` the user is asked first, and a failure to clean up the
    /// kubeconfig or the state record aborts the delete. With `force` those
    /// failures are logged and a missing record is not an error.
    pub async fn delete(
        &self,
        overrides: ClusterDescriptor,
        force: bool,
        confirm: &dyn Confirm,
    ) -> Result<DeleteOutcome> {
        let mut provider = self.registry.build(&overrides.provider)?;
        provider.set_metadata(&overrides);
        provider.set_options(&overrides.options)?;

        let stored = match self.locate(&provider.cluster_identity()).await {
            Ok(state) => state,
            Err(Error::NotFound(what)) if force => {
                warn!("Nothing to delete for {}", what);
                return Ok(DeleteOutcome::NotFound);
            }
            Err(e) => return Err(e),
        };
        let state = merge_into(&stored, &overrides);
        self.remove(provider, state, force, confirm).await
    }

    /// Delete a cluster by identity, as the API does
    pub async fn delete_by_id(
        &self,
        identity: &ClusterIdentity,
        force: bool,
    ) -> Result<DeleteOutcome> {
        let state = match self.store.get(identity).await {
            Ok(state) => state,
            Err(cluster_state::Error::NotFound(_)) if force => return Ok(DeleteOutcome::NotFound),
            Err(e) => return Err(e.into()),
        };
        let provider = self.registry.build(&state.identity.provider)?;
        self.remove(provider, state, force, &|_: &str| true).await
    }

    async fn remove(
        &self,
        mut provider: Box<dyn Provider>,
        state: ClusterState,
        force: bool,
        confirm: &dyn Confirm,
    ) -> Result<DeleteOutcome> {
        let identity = state.identity.clone();
        let _guard = self.claim(&identity)?;
        if !self.store.exists(&identity).await? {
            if force {
                warn!("[{}] record disappeared, nothing to delete", identity);
                return Ok(DeleteOutcome::NotFound);
            }
            return Err(Error::NotFound(identity.to_string()));
        }

        if !force && !confirm.confirm(&format!("Delete cluster {identity}? [y/N]")) {
            info!("[{}] delete cancelled", identity);
            return Ok(DeleteOutcome::Cancelled);
        }

        provider.set_metadata(&state.descriptor);
        provider.set_options(&state.descriptor.options)?;
        provider.set_nodes(&state.master_nodes, &state.worker_nodes);
        provider.delete_cluster(force).await?;

        let context = identity.to_string();
        if let Err(e) = kubeconfig::remove_context(&self.config.kubeconfig, &context).await {
            if !force {
                return Err(e);
            }
            warn!("[{}] could not remove kubeconfig context: {}", identity, e);
        }
        if let Err(e) = self.store.delete(&identity, force).await {
            if !force {
                return Err(e.into());
            }
            warn!("[{}] could not remove state record: {}", identity, e);
        }

        info!("[{}] cluster deleted", identity);
        Ok(DeleteOutcome::Deleted)
    }

    /// All clusters, reconciled with their providers.
    ///
    /// A cluster whose infrastructure is gone is dropped together with its
    /// kubeconfig context. Records still being created, failed records and
    /// clusters with a workflow running in this process are listed as stored.
    pub async fn list(&self) -> Result<Vec<ClusterInfo>> {
        let mut clusters = Vec::new();

        for state in self.store.list().await? {
            let id = state.identity.clone();
            if matches!(state.status, Status::Creating | Status::Failed) || self.is_inflight(&id) {
                clusters.push(ClusterInfo::from(&state));
                continue;
            }

            let provider = match self.provider_for(&state) {
                Ok(provider) => provider,
                Err(e) => {
                    warn!("[{}] cannot load provider: {}", id, e);
                    clusters.push(ClusterInfo::from(&state));
                    continue;
                }
            };

            match provider.is_cluster_exist().await {
                Ok((true, _)) => {
                    let info = match provider.describe(&state, &self.config.kubeconfig).await {
                        Ok(info) => info,
                        Err(e) => {
                            debug!("[{}] describe failed: {}", id, e);
                            ClusterInfo::from(&state)
                        }
                    };
                    clusters.push(info);
                }
                Ok((false, _)) => {
                    info!("[{}] infrastructure no longer exists, dropping record", id);
                    let context = id.to_string();
                    if let Err(e) =
                        kubeconfig::remove_context(&self.config.kubeconfig, &context).await
                    {
                        warn!("[{}] could not remove kubeconfig context: {}", id, e);
                    }
                    if let Err(e) = self.store.delete(&id, true).await {
                        warn!("[{}] could not remove state record: {}", id, e);
                    }
                }
                Err(e) => {
                    warn!("[{}] existence check failed: {}", id, e);
                    clusters.push(ClusterInfo::from(&state));
                }
            }
        }

        clusters.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(clusters)
    }

    /// Stored record of a cluster
    pub async fn get(&self, identity: &ClusterIdentity) -> Result<ClusterState> {
        Ok(self.store.get(identity).await?)
    }

    /// Live view of a cluster from its provider
    pub async fn describe(&self, identity: &ClusterIdentity) -> Result<ClusterInfo> {
        let state = self.get(identity).await?;
        let provider = self.provider_for(&state)?;
        provider.describe(&state, &self.config.kubeconfig).await
    }

    /// Stream of cluster events from the state directory
    pub fn watch(&self) -> Result<ClusterWatch> {
        ClusterWatch::new(&self.config.state_dir, self.store.clone())
    }
}

fn install_context(state: &ClusterState, ssh: &SshSettings) -> InstallContext {
    InstallContext {
        identity: state.identity.clone(),
        descriptor: state.descriptor.clone(),
        ssh: ssh.clone(),
    }
}

/// A persisted create request waiting to be provisioned
pub struct PendingCreate {
    orchestrator: Orchestrator,
    provider: Box<dyn Provider>,
    state: ClusterState,
    ssh: SshSettings,
    _guard: InflightGuard,
}

impl PendingCreate {
    /// Identity of the cluster being created
    pub fn identity(&self) -> &ClusterIdentity {
        &self.state.identity
    }

    /// Provision, install and record the cluster.
    ///
    /// On failure the record is saved as `Failed` with whatever nodes were
    /// allocated, and the provider is asked to roll back.
    pub async fn run(mut self) -> Result<CreateSummary> {
        match self.provision().await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                let id = self.state.identity.clone();
                error!("[{}] create failed: {}", id, e);
                self.state.set_status(Status::Failed);
                if let Err(save) = self.orchestrator.store.save(&self.state).await {
                    error!("[{}] could not record failure: {}", id, save);
                }
                if let Err(rollback) = self.provider.rollback().await {
                    warn!("[{}] rollback failed: {}", id, rollback);
                }
                Err(e)
            }
        }
    }

    async fn provision(&mut self) -> Result<CreateSummary> {
        let store = self.orchestrator.store.clone();
        let id = self.state.identity.clone();

        let provisioned = match self.provider.prepare(&self.ssh).await {
            Ok(provisioned) => provisioned,
            Err(failure) => {
                self.state.master_nodes = failure.allocated.masters;
                self.state.worker_nodes = failure.allocated.workers;
                return Err(failure.error);
            }
        };
        info!("[{}] provisioned {} node(s)", id, provisioned.len());
        self.state.master_nodes = provisioned.masters;
        self.state.worker_nodes = provisioned.workers;
        self.state.touch();
        store.save(&self.state).await?;

        let first = self
            .state
            .master_nodes
            .first()
            .cloned()
            .ok_or_else(|| Error::Provider(anyhow!("provider returned no master node")))?;
        let installer = self
            .provider
            .installer()
            .unwrap_or_else(|| self.orchestrator.installer.clone());
        let ctx = install_context(&self.state, &self.ssh);

        let existing = match (&ctx.descriptor.ip, &ctx.descriptor.token) {
            (Some(ip), Some(token)) if !ip.is_empty() => Some(JoinInfo::new(token.clone(), ip)),
            _ => None,
        };
        let join = installer.install_master(&ctx, &first, existing.as_ref()).await?;
        for node in self.state.master_nodes.iter().skip(1) {
            installer.install_master(&ctx, node, Some(&join)).await?;
        }
        for node in &self.state.worker_nodes {
            installer.install_worker(&ctx, node, &join).await?;
        }

        let mut manifests = self.provider.manifests();
        if ctx.descriptor.ui {
            manifests.push(ui_manifest());
        }
        if !manifests.is_empty() {
            installer.deploy_manifests(&ctx, &first, &manifests).await?;
        }

        let context = id.to_string();
        let raw = installer.fetch_kubeconfig(&ctx, &first).await?;
        kubeconfig::merge_cluster(&self.orchestrator.config.kubeconfig, &context, &raw).await?;

        self.state.descriptor.token = Some(join.token);
        self.state.commit_nodes();
        self.state.set_status(Status::Running);
        store.save(&self.state).await?;
        info!("[{}] cluster is running", id);

        let d = &self.state.descriptor;
        let ui_url = match (d.ui, d.cloud_controller_manager, first.address()) {
            (true, false, Some(address)) => Some(format!("https://{address}:{UI_PORT}")),
            _ => None,
        };
        Ok(CreateSummary {
            id: context.clone(),
            context,
            ui_url,
            ui_via_load_balancer: d.ui && d.cloud_controller_manager,
        })
    }
}

/// A persisted join request waiting for its nodes
pub struct PendingJoin {
    orchestrator: Orchestrator,
    provider: Box<dyn Provider>,
    state: ClusterState,
    ssh: SshSettings,
    masters: u32,
    workers: u32,
    _guard: InflightGuard,
}

impl PendingJoin {
    /// Identity of the cluster being extended
    pub fn identity(&self) -> &ClusterIdentity {
        &self.state.identity
    }

    /// Provision and install the new nodes.
    ///
    /// On failure the record is saved as `Failed` and the provider rolls back
    /// the nodes it added.
    pub async fn run(mut self) -> Result<ClusterInfo> {
        match self.extend().await {
            Ok(info) => Ok(info),
            Err(e) => {
                let id = self.state.identity.clone();
                error!("[{}] join failed: {}", id, e);
                self.state.set_status(Status::Failed);
                if let Err(save) = self.orchestrator.store.save(&self.state).await {
                    error!("[{}] could not record failure: {}", id, save);
                }
                if let Err(rollback) = self.provider.rollback().await {
                    warn!("[{}] rollback failed: {}", id, rollback);
                }
                Err(e)
            }
        }
    }

    fn record(&mut self, masters: Vec<Node>, workers: Vec<Node>) {
        self.state.master_nodes.extend(masters);
        self.state.worker_nodes.extend(workers);
    }

    async fn extend(&mut self) -> Result<ClusterInfo> {
        let store = self.orchestrator.store.clone();
        let id = self.state.identity.clone();

        let server = self
            .state
            .master_nodes
            .first()
            .and_then(|n| n.internal_address().map(str::to_string))
            .ok_or_else(|| Error::Provider(anyhow!("cluster {id} has no master to join")))?;
        let token = self
            .state
            .descriptor
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Provider(anyhow!("cluster {id} has no join token recorded")))?;
        let join = JoinInfo::new(token, &server);

        let added = match self
            .provider
            .prepare_join(&self.ssh, self.masters, self.workers)
            .await
        {
            Ok(added) => added,
            Err(failure) => {
                self.record(failure.allocated.masters, failure.allocated.workers);
                return Err(failure.error);
            }
        };
        info!("[{}] provisioned {} new node(s)", id, added.len());
        self.record(added.masters.clone(), added.workers.clone());
        self.state.touch();
        store.save(&self.state).await?;

        let installer = self
            .provider
            .installer()
            .unwrap_or_else(|| self.orchestrator.installer.clone());
        let ctx = install_context(&self.state, &self.ssh);
        for node in &added.masters {
            installer.install_master(&ctx, node, Some(&join)).await?;
        }
        for node in &added.workers {
            installer.install_worker(&ctx, node, &join).await?;
        }

        self.state.commit_nodes();
        self.state.set_status(Status::Running);
        store.save(&self.state).await?;
        info!("[{}] join complete", id);
        Ok(ClusterInfo::from(&self.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_display() {
        let summary = CreateSummary {
            id: "dev..demo".into(),
            context: "dev..demo".into(),
            ui_url: Some("https://203.0.113.1:8999".into()),
            ui_via_load_balancer: false,
        };
        let text = summary.to_string();
        assert!(text.contains("kubectl config use-context dev..demo"));
        assert!(text.ends_with("Dashboard: https://203.0.113.1:8999"));
    }

    #[test]
    fn test_closure_confirm() {
        let yes = |_: &str| true;
        let no = |prompt: &str| prompt.is_empty();
        assert!(yes.confirm("Delete?"));
        assert!(!no.confirm("Delete?"));
    }
}
