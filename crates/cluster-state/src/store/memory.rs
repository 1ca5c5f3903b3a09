//! In-memory state store

use super::StateStore;
use crate::{
    error::{Error, Result},
    models::{ClusterIdentity, ClusterState},
};
use async_trait::async_trait;
use futures::lock::Mutex;
use std::collections::HashMap;

/// In-memory state store, used by tests and short-lived tools
pub struct MemoryStore {
    records: Mutex<HashMap<ClusterIdentity, ClusterState>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn create(&self, state: &ClusterState) -> Result<()> {
        let mut records = self.records.lock().await;
        if records.contains_key(&state.identity) {
            return Err(Error::Conflict(state.id()));
        }
        records.insert(state.identity.clone(), state.clone());
        Ok(())
    }

    async fn save(&self, state: &ClusterState) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(state.identity.clone(), state.clone());
        Ok(())
    }

    async fn get(&self, identity: &ClusterIdentity) -> Result<ClusterState> {
        let records = self.records.lock().await;
        records
            .get(identity)
            .cloned()
            .ok_or_else(|| Error::NotFound(identity.to_string()))
    }

    async fn list(&self) -> Result<Vec<ClusterState>> {
        let records = self.records.lock().await;
        Ok(records.values().cloned().collect())
    }

    async fn delete(&self, identity: &ClusterIdentity, force: bool) -> Result<()> {
        let mut records = self.records.lock().await;
        match records.remove(identity) {
            Some(_) => Ok(()),
            None if force => Ok(()),
            None => Err(Error::NotFound(identity.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClusterDescriptor, Status};

    fn state(name: &str, region: &str) -> ClusterState {
        let mut d = ClusterDescriptor::new(name, "demo");
        d.region = region.into();
        ClusterState::new(d, Status::Running)
    }

    #[smol_potat::test]
    async fn test_memory_store_operations() {
        let store = MemoryStore::new();
        let s = state("dev", "");

        store.create(&s).await.unwrap();
        assert!(matches!(store.create(&s).await, Err(Error::Conflict(_))));

        let loaded = store.get(&s.identity).await.unwrap();
        assert_eq!(loaded, s);
        assert_eq!(store.list().await.unwrap().len(), 1);

        store.delete(&s.identity, false).await.unwrap();
        assert!(matches!(
            store.delete(&s.identity, false).await,
            Err(Error::NotFound(_))
        ));
        store.delete(&s.identity, true).await.unwrap();
    }

    #[smol_potat::test]
    async fn test_find_across_regions() {
        let store = MemoryStore::new();
        store.save(&state("dev", "eu-1")).await.unwrap();
        store.save(&state("prod", "eu-1")).await.unwrap();

        let found = store.find("dev", "demo").await.unwrap();
        assert_eq!(found.identity.region, "eu-1");
        assert!(matches!(
            store.find("dev", "other").await,
            Err(Error::NotFound(_))
        ));

        store.save(&state("dev", "us-2")).await.unwrap();
        match store.find("dev", "demo").await {
            Err(Error::Ambiguous { candidates, .. }) => {
                assert_eq!(candidates, vec!["dev.eu-1.demo", "dev.us-2.demo"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }
}
