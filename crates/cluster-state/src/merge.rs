//! Merge of a partial caller descriptor over a persisted record
//!
//! Delete and join commands usually carry little more than a name and a
//! provider. The full configuration lives in the stored record, so the
//! caller's input is layered on top of it with these rules:
//!
//! | Field | Source |
//! |---|---|
//! | name, region, provider | stored record |
//! | status, nodes, timestamps | stored record |
//! | token, datastore, ip, cidr, ui, ccm, HA flag, node counts | stored record |
//! | channel, version, install script, registry, extra args, ssh | caller when set, else stored |
//! | provider options | per key, caller when present, else stored |

use crate::models::{ClusterDescriptor, ClusterState, pick};

/// Layer `overrides` over `existing` and return the merged record.
pub fn merge_into(existing: &ClusterState, overrides: &ClusterDescriptor) -> ClusterState {
    let mut merged = existing.clone();
    let d = &mut merged.descriptor;
    let stored = &existing.descriptor;

    d.k3s_version = pick(&overrides.k3s_version, &stored.k3s_version);
    d.k3s_channel = pick(&overrides.k3s_channel, &stored.k3s_channel);
    d.install_script = pick(&overrides.install_script, &stored.install_script);
    d.registry = pick(&overrides.registry, &stored.registry);
    d.master_extra_args = pick(&overrides.master_extra_args, &stored.master_extra_args);
    d.worker_extra_args = pick(&overrides.worker_extra_args, &stored.worker_extra_args);
    d.ssh = overrides.ssh.or(&stored.ssh);

    for (key, value) in &overrides.options {
        if !value.is_null() {
            d.options.insert(key.clone(), value.clone());
        }
    }

    // A stored descriptor always agrees with the stored identity
    d.name = existing.identity.name.clone();
    d.region = existing.identity.region.clone();
    d.provider = existing.identity.provider.clone();

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Node, SshSettings, Status};
    use serde_json::json;

    fn stored() -> ClusterState {
        let mut d = ClusterDescriptor::new("dev", "demo");
        d.region = "eu-1".into();
        d.k3s_channel = Some("stable".into());
        d.k3s_version = Some("v1.29.4+k3s1".into());
        d.registry = Some("/etc/registries.yaml".into());
        d.token = Some("secret".into());
        d.master = 1;
        d.worker = 2;
        d.ui = true;
        d.ssh = SshSettings {
            user: Some("root".into()),
            port: Some(22),
            ..Default::default()
        };
        d.options.insert("instance-type".into(), json!("small"));
        d.options.insert("access-key".into(), json!("AK"));
        let mut state = ClusterState::new(d, Status::Running);
        state.master_nodes.push(Node {
            instance_id: "i-1".into(),
            master: true,
            ..Default::default()
        });
        state
    }

    #[test]
    fn test_identity_is_never_overwritten() {
        let existing = stored();
        let mut overrides = ClusterDescriptor::new("other", "elsewhere");
        overrides.region = "us-2".into();

        let merged = merge_into(&existing, &overrides);
        assert_eq!(merged.identity, existing.identity);
        assert_eq!(merged.descriptor.name, "dev");
        assert_eq!(merged.descriptor.region, "eu-1");
        assert_eq!(merged.descriptor.provider, "demo");
    }

    #[test]
    fn test_empty_overrides_inherit_everything() {
        let existing = stored();
        let merged = merge_into(&existing, &ClusterDescriptor::new("dev", "demo"));
        assert_eq!(merged, existing);
    }

    #[test]
    fn test_set_tunables_win() {
        let existing = stored();
        let mut overrides = ClusterDescriptor::new("dev", "demo");
        overrides.k3s_channel = Some("latest".into());
        overrides.k3s_version = Some(String::new());
        overrides.ssh.user = Some("ubuntu".into());
        overrides
            .options
            .insert("instance-type".into(), json!("large"));

        let merged = merge_into(&existing, &overrides);
        let d = &merged.descriptor;
        assert_eq!(d.k3s_channel.as_deref(), Some("latest"));
        // empty string counts as unset
        assert_eq!(d.k3s_version.as_deref(), Some("v1.29.4+k3s1"));
        assert_eq!(d.registry.as_deref(), Some("/etc/registries.yaml"));
        assert_eq!(d.ssh.user.as_deref(), Some("ubuntu"));
        assert_eq!(d.ssh.port, Some(22));
        assert_eq!(d.options["instance-type"], json!("large"));
        assert_eq!(d.options["access-key"], json!("AK"));
    }

    #[test]
    fn test_runtime_fields_come_from_store() {
        let existing = stored();
        let mut overrides = ClusterDescriptor::new("dev", "demo");
        overrides.token = Some("forged".into());
        overrides.master = 5;
        overrides.ui = false;

        let merged = merge_into(&existing, &overrides);
        assert_eq!(merged.status, Status::Running);
        assert_eq!(merged.master_nodes.len(), 1);
        assert_eq!(merged.descriptor.token.as_deref(), Some("secret"));
        assert_eq!(merged.descriptor.master, 1);
        assert!(merged.descriptor.ui);
        assert_eq!(merged.updated_at, existing.updated_at);
    }
}
