//! Shell commands run on nodes
//!
//! All builders are pure so the exact command lines can be checked without a
//! remote host.

use super::{JoinInfo, Manifest};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cluster_state::{ClusterDescriptor, Node, SshSettings};

/// Server token written by k3s on the first master
pub const TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/node-token";

/// Kubeconfig written by k3s on every master
pub const KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";

/// Directory k3s auto-applies manifests from
pub const MANIFEST_DIR: &str = "/var/lib/rancher/k3s/server/manifests";

/// Private registry configuration read by k3s
pub const REGISTRIES_PATH: &str = "/etc/rancher/k3s/registries.yaml";

/// Quote `value` for a POSIX shell
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `sudo ` unless logging in as root
pub fn sudo(ssh: &SshSettings) -> &'static str {
    match ssh.user.as_deref() {
        None | Some("root") => "",
        Some(_) => "sudo ",
    }
}

fn install_env(d: &ClusterDescriptor) -> Vec<String> {
    let mut env = Vec::new();
    if let Some(version) = d.k3s_version.as_deref().filter(|v| !v.is_empty()) {
        env.push(format!("INSTALL_K3S_VERSION={}", quote(version)));
    } else if let Some(channel) = d.k3s_channel.as_deref().filter(|c| !c.is_empty()) {
        env.push(format!("INSTALL_K3S_CHANNEL={}", quote(channel)));
    }
    env
}

fn pipe_install(d: &ClusterDescriptor, ssh: &SshSettings, env: Vec<String>, exec: String) -> String {
    let script = d
        .install_script
        .as_deref()
        .unwrap_or(cluster_state::DEFAULT_INSTALL_SCRIPT);
    let mut parts = vec![format!("curl -sfL {} |", quote(script)), sudo(ssh).trim().to_string()];
    parts.extend(env);
    parts.push(format!("INSTALL_K3S_EXEC={}", quote(exec.trim())));
    parts.push("sh -".to_string());
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Install command for a server node.
///
/// Without `join` the node initializes the cluster; with it the node joins
/// the existing control plane.
pub fn master_command(
    d: &ClusterDescriptor,
    ssh: &SshSettings,
    node: &Node,
    join: Option<&JoinInfo>,
) -> String {
    let mut env = install_env(d);
    let mut exec = vec!["server".to_string()];

    match join {
        None => {
            if let Some(token) = d.token.as_deref().filter(|t| !t.is_empty()) {
                env.push(format!("K3S_TOKEN={}", quote(token)));
            }
            if d.cluster && d.datastore.as_deref().is_none_or(str::is_empty) {
                exec.push("--cluster-init".into());
            }
        }
        Some(join) => {
            env.push(format!("K3S_TOKEN={}", quote(&join.token)));
            exec.push(format!("--server {}", join.server_url));
        }
    }

    if let Some(datastore) = d.datastore.as_deref().filter(|s| !s.is_empty()) {
        exec.push(format!("--datastore-endpoint={datastore}"));
    }
    if let Some(cidr) = d.cluster_cidr.as_deref().filter(|s| !s.is_empty()) {
        exec.push(format!("--cluster-cidr={cidr}"));
    }
    if let Some(ip) = node.public_ip_address.first() {
        exec.push(format!("--tls-san {ip}"));
        exec.push(format!("--node-external-ip {ip}"));
    }
    if d.cloud_controller_manager {
        exec.push("--disable-cloud-controller".into());
    }
    if let Some(extra) = d.master_extra_args.as_deref().filter(|s| !s.is_empty()) {
        exec.push(extra.to_string());
    }

    pipe_install(d, ssh, env, exec.join(" "))
}

/// Install command for an agent node
pub fn worker_command(
    d: &ClusterDescriptor,
    ssh: &SshSettings,
    node: &Node,
    join: &JoinInfo,
) -> String {
    let mut env = install_env(d);
    env.push(format!("K3S_URL={}", quote(&join.server_url)));
    env.push(format!("K3S_TOKEN={}", quote(&join.token)));

    let mut exec = vec!["agent".to_string()];
    if let Some(ip) = node.public_ip_address.first() {
        exec.push(format!("--node-external-ip {ip}"));
    }
    if let Some(extra) = d.worker_extra_args.as_deref().filter(|s| !s.is_empty()) {
        exec.push(extra.to_string());
    }

    pipe_install(d, ssh, env, exec.join(" "))
}

/// Write `content` to `path` on the node
pub fn write_file_command(ssh: &SshSettings, path: &str, content: &str) -> String {
    let dir = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(".");
    let sudo = sudo(ssh);
    format!(
        "{sudo}mkdir -p {} && echo {} | base64 -d | {sudo}tee {} >/dev/null",
        quote(dir),
        quote(&STANDARD.encode(content)),
        quote(path),
    )
}

/// Drop a manifest into the auto-deploy directory
pub fn manifest_command(ssh: &SshSettings, manifest: &Manifest) -> String {
    write_file_command(
        ssh,
        &format!("{MANIFEST_DIR}/{}.yaml", manifest.name),
        &manifest.content,
    )
}

/// Print the node token
pub fn token_command(ssh: &SshSettings) -> String {
    format!("{}cat {TOKEN_PATH}", sudo(ssh))
}

/// Print the kubeconfig
pub fn kubeconfig_command(ssh: &SshSettings) -> String {
    format!("{}cat {KUBECONFIG_PATH}", sudo(ssh))
}

/// Remove k3s from a node
pub fn uninstall_command(ssh: &SshSettings, master: bool) -> String {
    let script = if master {
        "/usr/local/bin/k3s-uninstall.sh"
    } else {
        "/usr/local/bin/k3s-agent-uninstall.sh"
    };
    format!("{}{script}", sudo(ssh))
}

/// Point the kubeconfig at `address` instead of the loopback interface
pub fn rewrite_server(kubeconfig: &str, address: &str) -> String {
    kubeconfig
        .replace("https://127.0.0.1:", &format!("https://{address}:"))
        .replace("https://localhost:", &format!("https://{address}:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(ip: &str) -> Node {
        Node {
            instance_id: "i-1".into(),
            public_ip_address: vec![ip.into()],
            ..Default::default()
        }
    }

    fn descriptor() -> ClusterDescriptor {
        let mut d = ClusterDescriptor::new("dev", "demo");
        d.apply_defaults();
        d
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_init_master_command() {
        let mut d = descriptor();
        d.cluster = true;
        d.master_extra_args = Some("--disable traefik".into());
        let ssh = SshSettings::default();

        let cmd = master_command(&d, &ssh, &node("203.0.113.1"), None);
        assert!(cmd.starts_with("curl -sfL 'https://get.k3s.io' | INSTALL_K3S_CHANNEL='stable'"));
        assert!(cmd.contains("server --cluster-init"));
        assert!(cmd.contains("--tls-san 203.0.113.1"));
        assert!(cmd.contains("--disable traefik"));
        assert!(!cmd.contains("K3S_URL"));
        assert!(cmd.ends_with("sh -"));
    }

    #[test]
    fn test_empty_datastore_keeps_embedded_etcd() {
        let mut d = descriptor();
        d.cluster = true;
        d.datastore = Some(String::new());

        let cmd = master_command(&d, &SshSettings::default(), &node("203.0.113.1"), None);
        assert!(cmd.contains("server --cluster-init"));
        assert!(!cmd.contains("--datastore-endpoint"));

        d.datastore = Some("mysql://k3s@tcp(db:3306)/k3s".into());
        let cmd = master_command(&d, &SshSettings::default(), &node("203.0.113.1"), None);
        assert!(!cmd.contains("--cluster-init"));
        assert!(cmd.contains("--datastore-endpoint=mysql://k3s@tcp(db:3306)/k3s"));
    }

    #[test]
    fn test_joining_master_uses_token() {
        let d = descriptor();
        let ssh = SshSettings {
            user: Some("ubuntu".into()),
            ..Default::default()
        };
        let join = JoinInfo::new("K10secret", "10.0.0.1");

        let cmd = master_command(&d, &ssh, &node("203.0.113.2"), Some(&join));
        assert!(cmd.contains("| sudo INSTALL_K3S_CHANNEL"));
        assert!(cmd.contains("K3S_TOKEN='K10secret'"));
        assert!(cmd.contains("server --server https://10.0.0.1:6443"));
        assert!(!cmd.contains("--cluster-init"));
    }

    #[test]
    fn test_worker_command() {
        let mut d = descriptor();
        d.k3s_version = Some("v1.29.4+k3s1".into());
        let join = JoinInfo::new("K10secret", "10.0.0.1");

        let cmd = worker_command(&d, &SshSettings::default(), &node("203.0.113.3"), &join);
        assert!(cmd.contains("INSTALL_K3S_VERSION='v1.29.4+k3s1'"));
        assert!(!cmd.contains("INSTALL_K3S_CHANNEL"));
        assert!(cmd.contains("K3S_URL='https://10.0.0.1:6443'"));
        assert!(cmd.contains("INSTALL_K3S_EXEC='agent --node-external-ip 203.0.113.3'"));
    }

    #[test]
    fn test_manifest_command_encodes_content() {
        let manifest = Manifest {
            name: "ccm".into(),
            content: "kind: List\n".into(),
        };
        let cmd = manifest_command(&SshSettings::default(), &manifest);
        assert!(cmd.contains(&STANDARD.encode("kind: List\n")));
        assert!(cmd.contains("/var/lib/rancher/k3s/server/manifests/ccm.yaml"));
    }

    #[test]
    fn test_rewrite_server() {
        let config = "server: https://127.0.0.1:6443\n";
        assert_eq!(
            rewrite_server(config, "203.0.113.1"),
            "server: https://203.0.113.1:6443\n"
        );
    }
}
