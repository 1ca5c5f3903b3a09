//! State store implementations

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::{
    error::{Error, Result},
    models::{ClusterIdentity, ClusterState},
};
use async_trait::async_trait;

/// Trait for cluster state storage backends
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store a new record, failing with `Conflict` if the identity is taken
    async fn create(&self, state: &ClusterState) -> Result<()>;

    /// Insert or replace the record for `state.identity`
    async fn save(&self, state: &ClusterState) -> Result<()>;

    /// Load a record by identity
    async fn get(&self, identity: &ClusterIdentity) -> Result<ClusterState>;

    /// All records, in no particular order
    async fn list(&self) -> Result<Vec<ClusterState>>;

    /// Remove a record. With `force` a missing record is not an error.
    async fn delete(&self, identity: &ClusterIdentity, force: bool) -> Result<()>;

    /// Find the record for `name` under `provider`, whatever its region
    async fn find(&self, name: &str, provider: &str) -> Result<ClusterState> {
        let mut matches: Vec<ClusterState> = self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.identity.name == name && s.identity.provider == provider)
            .collect();

        match matches.len() {
            0 => Err(Error::NotFound(format!("{name} ({provider})"))),
            1 => Ok(matches.remove(0)),
            _ => {
                let mut candidates: Vec<String> = matches.iter().map(|s| s.id()).collect();
                candidates.sort();
                Err(Error::Ambiguous {
                    name: name.to_string(),
                    candidates,
                })
            }
        }
    }

    /// Whether a record exists for `identity`
    async fn exists(&self, identity: &ClusterIdentity) -> Result<bool> {
        match self.get(identity).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
