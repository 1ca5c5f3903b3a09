//! Installer running commands over the `ssh` client

use super::{InstallContext, Installer, JoinInfo, Manifest, script};
use crate::{Error, Result};
use anyhow::{Context, anyhow};
use async_process::Command;
use async_trait::async_trait;
use cluster_state::{Node, SshSettings};
use tracing::{debug, info};

/// Invocation of the local ssh client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshInvocation {
    /// Program to execute
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment
    pub env: Vec<(String, String)>,
}

impl SshInvocation {
    /// Build the invocation that runs `command` on `host`
    pub fn new(ssh: &SshSettings, host: &str, command: &str) -> Self {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ];

        if let Some(port) = ssh.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(key) = ssh.key_path.as_deref().filter(|k| !k.is_empty()) {
            args.push("-i".to_string());
            args.push(key.to_string());
            if !ssh.agent_auth {
                args.push("-o".to_string());
                args.push("IdentitiesOnly=yes".to_string());
            }
        }
        if let Some(cert) = ssh.cert_path.as_deref().filter(|c| !c.is_empty()) {
            args.push("-o".to_string());
            args.push(format!("CertificateFile={cert}"));
        }

        let target = match ssh.user.as_deref().filter(|u| !u.is_empty()) {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        };
        args.push(target);
        args.push(command.to_string());

        let secret = ssh
            .password
            .as_deref()
            .map(|p| (p, None))
            .or_else(|| ssh.key_passphrase.as_deref().map(|p| (p, Some("passphrase"))));

        match secret {
            Some((secret, prompt)) => {
                let mut wrapped = Vec::new();
                if let Some(prompt) = prompt {
                    wrapped.push("-P".to_string());
                    wrapped.push(prompt.to_string());
                }
                wrapped.push("-e".to_string());
                wrapped.push("ssh".to_string());
                wrapped.extend(args);
                Self {
                    program: "sshpass".to_string(),
                    args: wrapped,
                    env: vec![("SSHPASS".to_string(), secret.to_string())],
                }
            }
            None => {
                // Without a secret ssh must never stop to prompt
                let mut batch = vec!["-o".to_string(), "BatchMode=yes".to_string()];
                batch.extend(args);
                Self {
                    program: "ssh".to_string(),
                    args: batch,
                    env: Vec::new(),
                }
            }
        }
    }
}

/// Runs shell commands on remote hosts
#[derive(Debug, Clone, Default)]
pub struct SshRunner;

impl SshRunner {
    /// Create a runner
    pub fn new() -> Self {
        Self
    }

    /// Run `command` on `host` and return its standard output
    pub async fn run(&self, ssh: &SshSettings, host: &str, command: &str) -> Result<String> {
        let invocation = SshInvocation::new(ssh, host, command);
        debug!("Running on {}: {}", host, command);

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", invocation.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Provider(anyhow!(
                "command on {} exited with {}: {}",
                host,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Installer driving the k3s install script over SSH
#[derive(Debug, Clone, Default)]
pub struct SshInstaller {
    runner: SshRunner,
}

impl SshInstaller {
    /// Create an installer
    pub fn new() -> Self {
        Self {
            runner: SshRunner::new(),
        }
    }

    fn host(node: &Node) -> Result<&str> {
        node.address().ok_or_else(|| {
            Error::Provider(anyhow!("node {} has no reachable address", node.instance_id))
        })
    }

    async fn push_registry(&self, ctx: &InstallContext, host: &str) -> Result<()> {
        let Some(path) = ctx.descriptor.registry.as_deref().filter(|p| !p.is_empty()) else {
            return Ok(());
        };
        let content = async_fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read registry config {path}"))?;
        let cmd = script::write_file_command(&ctx.ssh, script::REGISTRIES_PATH, &content);
        self.runner.run(&ctx.ssh, host, &cmd).await?;
        Ok(())
    }
}

#[async_trait]
impl Installer for SshInstaller {
    async fn install_master(
        &self,
        ctx: &InstallContext,
        node: &Node,
        join: Option<&JoinInfo>,
    ) -> Result<JoinInfo> {
        let host = Self::host(node)?;
        info!("[{}] installing k3s server on {}", ctx.identity, host);

        self.push_registry(ctx, host).await?;
        let cmd = script::master_command(&ctx.descriptor, &ctx.ssh, node, join);
        self.runner.run(&ctx.ssh, host, &cmd).await?;

        match join {
            Some(join) => Ok(join.clone()),
            None => {
                let token = self
                    .runner
                    .run(&ctx.ssh, host, &script::token_command(&ctx.ssh))
                    .await?;
                let address = node.internal_address().unwrap_or(host);
                Ok(JoinInfo::new(token.trim(), address))
            }
        }
    }

    async fn install_worker(
        &self,
        ctx: &InstallContext,
        node: &Node,
        join: &JoinInfo,
    ) -> Result<()> {
        let host = Self::host(node)?;
        info!("[{}] installing k3s agent on {}", ctx.identity, host);

        self.push_registry(ctx, host).await?;
        let cmd = script::worker_command(&ctx.descriptor, &ctx.ssh, node, join);
        self.runner.run(&ctx.ssh, host, &cmd).await?;
        Ok(())
    }

    async fn deploy_manifests(
        &self,
        ctx: &InstallContext,
        master: &Node,
        manifests: &[Manifest],
    ) -> Result<()> {
        let host = Self::host(master)?;
        for manifest in manifests {
            debug!("[{}] deploying manifest {}", ctx.identity, manifest.name);
            let cmd = script::manifest_command(&ctx.ssh, manifest);
            self.runner.run(&ctx.ssh, host, &cmd).await?;
        }
        Ok(())
    }

    async fn fetch_kubeconfig(&self, ctx: &InstallContext, master: &Node) -> Result<String> {
        let host = Self::host(master)?;
        let raw = self
            .runner
            .run(&ctx.ssh, host, &script::kubeconfig_command(&ctx.ssh))
            .await?;
        Ok(script::rewrite_server(&raw, host))
    }

    async fn uninstall(&self, ctx: &InstallContext, node: &Node) -> Result<()> {
        let host = Self::host(node)?;
        info!("[{}] removing k3s from {}", ctx.identity, host);
        let cmd = script::uninstall_command(&ctx.ssh, node.master);
        self.runner.run(&ctx.ssh, host, &cmd).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_based_invocation() {
        let ssh = SshSettings {
            user: Some("ubuntu".into()),
            port: Some(2222),
            key_path: Some("/home/me/.ssh/id_ed25519".into()),
            ..Default::default()
        };
        let inv = SshInvocation::new(&ssh, "203.0.113.1", "uptime");
        assert_eq!(inv.program, "ssh");
        assert!(inv.env.is_empty());

        let args = inv.args.join(" ");
        assert!(args.starts_with("-o BatchMode=yes"));
        assert!(args.contains("-p 2222"));
        assert!(args.contains("-i /home/me/.ssh/id_ed25519 -o IdentitiesOnly=yes"));
        assert!(args.ends_with("ubuntu@203.0.113.1 uptime"));
    }

    #[test]
    fn test_password_uses_sshpass() {
        let ssh = SshSettings {
            user: Some("root".into()),
            password: Some("hunter2".into()),
            ..Default::default()
        };
        let inv = SshInvocation::new(&ssh, "10.0.0.1", "id");
        assert_eq!(inv.program, "sshpass");
        assert_eq!(inv.args[..2], ["-e".to_string(), "ssh".to_string()]);
        assert_eq!(inv.env, vec![("SSHPASS".to_string(), "hunter2".to_string())]);
        // secret never lands on the command line
        assert!(!inv.args.iter().any(|a| a.contains("hunter2")));
    }

    #[test]
    fn test_key_passphrase_matches_prompt() {
        let ssh = SshSettings {
            key_path: Some("/k".into()),
            key_passphrase: Some("pw".into()),
            agent_auth: true,
            ..Default::default()
        };
        let inv = SshInvocation::new(&ssh, "h", "true");
        assert_eq!(inv.program, "sshpass");
        assert_eq!(inv.args[..4], ["-P", "passphrase", "-e", "ssh"].map(String::from));
        assert!(!inv.args.contains(&"IdentitiesOnly=yes".to_string()));
    }
}
