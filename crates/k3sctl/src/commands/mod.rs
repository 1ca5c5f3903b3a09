pub mod create;
pub mod delete;
pub mod describe;
pub mod join;
pub mod list;
pub mod serve;

use anyhow::Result;
use clap::{ArgMatches, Args, ValueEnum};
use cluster_state::{ClusterDescriptor, SshSettings};
use k3sctl::{App, flags};
use serde_json::{Map, Value};

/// Cluster addressed by a command
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Provider backend (pass it first to see the provider's own flags)
    #[arg(short, long)]
    pub provider: String,

    /// Cluster name
    #[arg(short, long)]
    pub name: String,
}

/// How to reach the nodes
#[derive(Args, Debug, Default)]
pub struct SshArgs {
    /// SSH login user
    #[arg(long)]
    pub ssh_user: Option<String>,

    /// SSH port
    #[arg(long)]
    pub ssh_port: Option<u16>,

    /// Private key file
    #[arg(long)]
    pub ssh_key_path: Option<String>,

    /// Passphrase of the private key
    #[arg(long, env = "K3SCTL_SSH_KEY_PASSPHRASE", hide_env_values = true)]
    pub ssh_key_passphrase: Option<String>,

    /// SSH certificate file
    #[arg(long)]
    pub ssh_key_cert_path: Option<String>,

    /// Password login
    #[arg(long, env = "K3SCTL_SSH_PASSWORD", hide_env_values = true)]
    pub ssh_password: Option<String>,

    /// Use the local ssh-agent
    #[arg(long)]
    pub ssh_agent_auth: bool,
}

impl SshArgs {
    pub fn settings(&self) -> SshSettings {
        SshSettings {
            user: self.ssh_user.clone(),
            port: self.ssh_port,
            key_path: self.ssh_key_path.clone(),
            key_passphrase: self.ssh_key_passphrase.clone(),
            cert_path: self.ssh_key_cert_path.clone(),
            password: self.ssh_password.clone(),
            agent_auth: self.ssh_agent_auth,
        }
    }
}

/// k3s install parameters
#[derive(Args, Debug, Default)]
pub struct InstallArgs {
    /// k3s version to install, overrides the channel
    #[arg(long)]
    pub k3s_version: Option<String>,

    /// k3s release channel
    #[arg(long)]
    pub k3s_channel: Option<String>,

    /// URL of the k3s install script
    #[arg(long)]
    pub k3s_install_script: Option<String>,

    /// Extra arguments for k3s server
    #[arg(long)]
    pub master_extra_args: Option<String>,

    /// Extra arguments for k3s agent
    #[arg(long)]
    pub worker_extra_args: Option<String>,

    /// Private registry configuration file (registries.yaml)
    #[arg(long)]
    pub registry: Option<String>,
}

impl InstallArgs {
    pub fn apply(&self, d: &mut ClusterDescriptor) {
        d.k3s_version = self.k3s_version.clone();
        d.k3s_channel = self.k3s_channel.clone();
        d.install_script = self.k3s_install_script.clone();
        d.master_extra_args = self.master_extra_args.clone();
        d.worker_extra_args = self.worker_extra_args.clone();
        d.registry = self.registry.clone();
    }
}

/// Output format of read commands
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Credential flags given explicitly, to be saved after success
pub type NewCredentials = Vec<(String, String)>;

/// Provider options from the command line, with saved credentials filled in
pub fn provider_options(
    app: &App,
    provider: &str,
    matches: &ArgMatches,
) -> Result<(Map<String, Value>, NewCredentials)> {
    let backend = app.orchestrator.registry().build(provider)?;
    let mut options = flags::collect(matches, &flags::provider_flags(backend.as_ref()));

    let mut fresh = Vec::new();
    for flag in backend.credential_flags() {
        match options.get(&flag.name).and_then(Value::as_str) {
            Some(value) => fresh.push((flag.name.clone(), value.to_string())),
            None => {
                if let Some(saved) = app.config.credential(provider, &flag.name) {
                    options.insert(flag.name.clone(), Value::String(saved.to_string()));
                }
            }
        }
    }

    Ok((options, fresh))
}
