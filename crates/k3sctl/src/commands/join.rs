use super::{InstallArgs, SshArgs, TargetArgs, provider_options};
use anyhow::Result;
use clap::{ArgMatches, Args};
use cluster_state::ClusterDescriptor;
use k3sctl::App;

#[derive(Args, Debug)]
pub struct JoinArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Number of master nodes to add
    #[arg(long, default_value_t = 0)]
    pub master: u32,

    /// Number of worker nodes to add
    #[arg(long, default_value_t = 0)]
    pub worker: u32,

    #[command(flatten)]
    pub ssh: SshArgs,

    #[command(flatten)]
    pub install: InstallArgs,
}

pub async fn run(app: &mut App, args: JoinArgs, matches: &ArgMatches) -> Result<()> {
    let (options, credentials) = provider_options(app, &args.target.provider, matches)?;

    let mut overrides = ClusterDescriptor::new(&args.target.name, &args.target.provider);
    overrides.master = args.master;
    overrides.worker = args.worker;
    overrides.ssh = args.ssh.settings();
    args.install.apply(&mut overrides);
    overrides.options = options;

    let info = app.orchestrator.join(overrides).await?;
    app.remember_credentials(&args.target.provider, &credentials)
        .await?;

    println!(
        "Cluster {} now has {} master(s) and {} worker(s)",
        info.id, info.master, info.worker
    );
    Ok(())
}
