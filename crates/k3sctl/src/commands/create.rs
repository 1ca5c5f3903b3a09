use super::{InstallArgs, SshArgs, TargetArgs, provider_options};
use anyhow::Result;
use clap::{ArgMatches, Args};
use cluster_state::ClusterDescriptor;
use k3sctl::App;
use serde_json::{Map, Value};

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Number of master nodes
    #[arg(long, default_value_t = 1)]
    pub master: u32,

    /// Number of worker nodes
    #[arg(long, default_value_t = 0)]
    pub worker: u32,

    #[command(flatten)]
    pub ssh: SshArgs,

    #[command(flatten)]
    pub install: InstallArgs,

    /// External datastore endpoint
    #[arg(long)]
    pub datastore: Option<String>,

    /// Cluster join token
    #[arg(long, env = "K3SCTL_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Join the server at this address instead of initializing a new one
    #[arg(long)]
    pub ip: Option<String>,

    /// Pod network CIDR
    #[arg(long)]
    pub cluster_cidr: Option<String>,

    /// Deploy the Kubernetes dashboard
    #[arg(long)]
    pub ui: bool,

    /// Deploy the provider's cloud controller manager
    #[arg(long)]
    pub cloud_controller_manager: bool,

    /// HA control plane with embedded etcd
    #[arg(long)]
    pub cluster: bool,
}

impl CreateArgs {
    fn descriptor(&self, options: Map<String, Value>) -> ClusterDescriptor {
        let mut d = ClusterDescriptor::new(&self.target.name, &self.target.provider);
        d.master = self.master;
        d.worker = self.worker;
        d.ssh = self.ssh.settings();
        self.install.apply(&mut d);
        d.datastore = self.datastore.clone();
        d.token = self.token.clone();
        d.ip = self.ip.clone();
        d.cluster_cidr = self.cluster_cidr.clone();
        d.ui = self.ui;
        d.cloud_controller_manager = self.cloud_controller_manager;
        d.cluster = self.cluster;
        d.options = options;
        d
    }
}

pub async fn run(app: &mut App, args: CreateArgs, matches: &ArgMatches) -> Result<()> {
    let (options, credentials) = provider_options(app, &args.target.provider, matches)?;
    let summary = app.orchestrator.create(args.descriptor(options)).await?;
    app.remember_credentials(&args.target.provider, &credentials)
        .await?;

    println!("{summary}");
    Ok(())
}
