//! Cluster change events for API watchers

use crate::Result;
use cluster_state::{ClusterInfo, StateEvent, StateStore, StateWatcher, Status};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A cluster record appeared
pub const RESOURCE_CREATE: &str = "resource.create";

/// A cluster record changed status or content
pub const RESOURCE_CHANGE: &str = "resource.change";

/// A cluster record is gone
pub const RESOURCE_REMOVE: &str = "resource.remove";

/// Event delivered to watchers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEvent {
    /// One of the `RESOURCE_*` names
    pub name: String,
    /// Cluster identity
    pub id: String,
    /// Current view of the cluster, absent on removal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterInfo>,
}

/// Stream of [`ClusterEvent`]s backed by a state directory watcher
pub struct ClusterWatch {
    watcher: StateWatcher,
    store: Arc<dyn StateStore>,
}

impl ClusterWatch {
    /// Watch `dir`, loading records from `store`
    pub fn new(dir: impl AsRef<Path>, store: Arc<dyn StateStore>) -> Result<Self> {
        Ok(Self {
            watcher: StateWatcher::new(dir)?,
            store,
        })
    }

    /// Next event, or `None` when the watcher stopped
    pub async fn next(&self) -> Option<ClusterEvent> {
        loop {
            let (name, identity, status) = match self.watcher.recv().await? {
                StateEvent::Created { identity, status } => (RESOURCE_CREATE, identity, status),
                StateEvent::Changed { identity, status } => (RESOURCE_CHANGE, identity, status),
                StateEvent::Removed { identity } => {
                    return Some(ClusterEvent {
                        name: RESOURCE_REMOVE.into(),
                        id: identity.to_string(),
                        cluster: None,
                    });
                }
            };

            match self.store.get(&identity).await {
                Ok(state) => {
                    let mut info = ClusterInfo::from(&state);
                    // Watchers see a join in progress as an upgrade
                    info.status = match status {
                        Status::Join => Status::Upgrading,
                        other => other,
                    };
                    return Some(ClusterEvent {
                        name: name.into(),
                        id: identity.to_string(),
                        cluster: Some(info),
                    });
                }
                Err(e) => debug!("Skipping event for {}: {}", identity, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_state::{ClusterDescriptor, ClusterState, FileStore};
    use std::time::Duration;
    use tempfile::tempdir;

    async fn next_event(watch: &ClusterWatch) -> Option<ClusterEvent> {
        smol::future::or(watch.next(), async {
            smol::Timer::after(Duration::from_secs(5)).await;
            None
        })
        .await
    }

    #[smol_potat::test]
    async fn test_join_is_reported_as_upgrading() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path()).await.unwrap());
        let mut state = ClusterState::new(ClusterDescriptor::new("dev", "demo"), Status::Running);
        store.create(&state).await.unwrap();

        let watch = ClusterWatch::new(dir.path(), store.clone()).unwrap();
        state.set_status(Status::Join);
        store.save(&state).await.unwrap();

        let event = next_event(&watch).await.expect("no event");
        assert_eq!(event.name, RESOURCE_CHANGE);
        assert_eq!(event.id, "dev..demo");
        assert_eq!(event.cluster.unwrap().status, Status::Upgrading);
    }
}
